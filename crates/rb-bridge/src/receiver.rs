//! HTTP receiver for completion callbacks
//!
//! The service POSTs its result back either as a JSON body naming a file it
//! wrote (`{"image_path": "..."}`, same-machine setups) or as the raw image
//! bytes. Each accepted request becomes exactly one [`CallbackTask`].
//!
//! Failures are per request: a handler never takes the listener down.

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Router,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rb_core::ReceiverError;

use crate::tasks::{CallbackTask, TaskSender};

/// Header naming the host image to update
pub const IMAGE_NAME_HEADER: &str = "x-blender-image-name";

/// Largest body accepted (raw EXR results get big)
pub const MAX_BODY_SIZE: usize = 256 * 1024 * 1024;

/// Bound on joining the listener task when stopping
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Prefix for temp files holding raw results
pub const TEMP_PREFIX: &str = "blender_bridge_";

const OK_BODY: &str = "OK";
const MISSING_TARGET_BODY: &str = "Bad Request: Missing X-Blender-Image-Name header";
const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

/// Lifecycle of the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Stopped,
    Starting,
    Listening,
    Stopping,
}

impl std::fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiverState::Stopped => write!(f, "stopped"),
            ReceiverState::Starting => write!(f, "starting"),
            ReceiverState::Listening => write!(f, "listening"),
            ReceiverState::Stopping => write!(f, "stopping"),
        }
    }
}

/// State shared with every request handler
#[derive(Clone)]
struct CallbackContext {
    tasks: TaskSender,
    /// Snapshot of the host's selection when the receiver started
    default_target: Option<String>,
    temp_dir: PathBuf,
}

/// Build the callback router.
///
/// Accepts `POST` on any path.
pub fn router(tasks: TaskSender, default_target: Option<String>, temp_dir: PathBuf) -> Router {
    let context = CallbackContext {
        tasks,
        default_target: default_target.filter(|t| !t.trim().is_empty()),
        temp_dir,
    };

    Router::new()
        .route("/", post(handle_callback))
        .route("/*path", post(handle_callback))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(context)
}

async fn handle_callback(
    State(context): State<CallbackContext>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let target = headers
        .get(IMAGE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| context.default_target.clone());

    let Some(target) = target else {
        tracing::warn!("Callback without target image name and no default set");
        return (StatusCode::BAD_REQUEST, MISSING_TARGET_BODY);
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let (Some(content_type), true) = (content_type, headers.contains_key(header::CONTENT_LENGTH))
    else {
        tracing::error!("Callback for '{}' without Content-Type/Content-Length", target);
        return (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY);
    };

    tracing::debug!(
        "Callback for '{}': {} bytes of {}",
        target,
        body.len(),
        content_type
    );

    let shared_path = if media_type(content_type) == "application/json" {
        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(value) => value
                .get("image_path")
                .and_then(|p| p.as_str())
                .map(PathBuf::from),
            Err(e) => {
                tracing::error!("Malformed JSON callback: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY);
            }
        }
    } else {
        None
    };

    let task = match shared_path {
        Some(path) => CallbackTask::shared(path, target),
        None => {
            let suffix = suffix_for(content_type);
            let dir = context.temp_dir.clone();
            let written =
                tokio::task::spawn_blocking(move || write_temp_file(&dir, &suffix, &body)).await;
            match written {
                Ok(Ok(path)) => CallbackTask::received(path, target),
                Ok(Err(e)) => {
                    tracing::error!("Failed to store callback body: {}", e);
                    return (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY);
                }
                Err(e) => {
                    tracing::error!("Temp file writer panicked: {}", e);
                    return (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY);
                }
            }
        }
    };

    tracing::info!(
        "Queued update of '{}' from {}",
        task.target,
        task.source.display()
    );
    if let Err(task) = context.tasks.push(task) {
        tracing::error!("Task queue closed, dropping result for '{}'", task.target);
        task.discard_file();
        return (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY);
    }

    (StatusCode::OK, OK_BODY)
}

/// `type/subtype` with parameters stripped, lower-cased
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Temp file suffix derived from the content type's subtype
pub fn suffix_for(content_type: &str) -> String {
    media_type(content_type)
        .split_once('/')
        .map(|(_, subtype)| subtype.trim())
        .filter(|subtype| !subtype.is_empty())
        .map(|subtype| format!(".{}", subtype))
        .unwrap_or_else(|| ".tmp".to_string())
}

fn write_temp_file(dir: &Path, suffix: &str, body: &[u8]) -> std::io::Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(suffix)
        .tempfile_in(dir)?;
    file.write_all(body)?;
    file.flush()?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

struct RunningListener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Callback listener with explicit start/stop
pub struct CallbackReceiver {
    tasks: TaskSender,
    temp_dir: PathBuf,
    state: Arc<Mutex<ReceiverState>>,
    running: Option<RunningListener>,
}

impl CallbackReceiver {
    /// Create a stopped receiver that pushes into `tasks`
    pub fn new(tasks: TaskSender) -> Self {
        Self {
            tasks,
            temp_dir: std::env::temp_dir(),
            state: Arc::new(Mutex::new(ReceiverState::Stopped)),
            running: None,
        }
    }

    /// Write raw results into `dir` instead of the system temp directory
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> ReceiverState {
        *self.state.lock()
    }

    /// Address the listener is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Bind `0.0.0.0:<port>` and start serving.
    ///
    /// A running listener is fully stopped first. `default_target` is
    /// captured now and used for requests without the name header.
    pub async fn start(
        &mut self,
        port: u16,
        default_target: Option<String>,
    ) -> Result<SocketAddr, ReceiverError> {
        self.stop().await;

        *self.state.lock() = ReceiverState::Starting;

        let listener = match TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await {
            Ok(listener) => listener,
            Err(source) => {
                *self.state.lock() = ReceiverState::Stopped;
                tracing::error!("Failed to start callback receiver on port {}: {}", port, source);
                return Err(ReceiverError::Bind { port, source });
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                *self.state.lock() = ReceiverState::Stopped;
                return Err(ReceiverError::Listener(e));
            }
        };

        let app = router(self.tasks.clone(), default_target, self.temp_dir.clone());
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let state = Arc::clone(&self.state);

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!("Callback receiver error: {}", e);
            }
            *state.lock() = ReceiverState::Stopped;
            tracing::debug!("Callback receiver task exited");
        });

        *self.state.lock() = ReceiverState::Listening;
        tracing::info!("Callback receiver listening on {}", local_addr);

        self.running = Some(RunningListener {
            local_addr,
            cancel,
            handle,
        });
        Ok(local_addr)
    }

    /// Stop the listener, waiting at most [`STOP_JOIN_TIMEOUT`] for it to exit
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        *self.state.lock() = ReceiverState::Stopping;
        running.cancel.cancel();

        let mut handle = running.handle;
        match tokio::time::timeout(STOP_JOIN_TIMEOUT, &mut handle).await {
            Ok(_) => tracing::info!("Callback receiver on {} stopped", running.local_addr),
            Err(_) => {
                tracing::warn!(
                    "Callback receiver did not stop within {:?}, aborting",
                    STOP_JOIN_TIMEOUT
                );
                handle.abort();
                let _ = handle.await;
            }
        }

        *self.state.lock() = ReceiverState::Stopped;
    }
}
