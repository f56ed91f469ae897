//! Listen command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::host::DirectoryHost;
use crate::output::{format_tunnel_status, print_info, print_success, print_warning};
use rb_bridge::tasks::{TaskQueue, TickOutcome, POLL_INTERVAL};
use rb_bridge::Bridge;
use rb_core::BridgeConfig;

/// Options for `render-bridge listen`
#[derive(Debug, Clone)]
pub struct ListenOptions {
    /// Directory results are written into
    pub output_dir: PathBuf,
    /// Accept only these target names
    pub only: Vec<String>,
}

/// Run the callback receiver and write every result into a directory
pub async fn listen_command(config: &BridgeConfig, options: ListenOptions) -> Result<()> {
    let mut host = DirectoryHost::new(&options.output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", options.output_dir))?
        .with_targets(options.only);

    let (bridge, mut queue) = Bridge::new();
    let addr = bridge.start_receiver(config).await?;
    print_success(&format!("Receiver listening on {}", addr));

    if config.tunneling() {
        if let Err(e) = bridge.ensure_tunnel(config).await {
            bridge.shutdown().await;
            return Err(e).context("Failed to establish SSH tunnel");
        }
        println!("{}", format_tunnel_status(&bridge.tunnel_status().await));
    }

    print_info(&format!(
        "Writing results to {:?}, press Ctrl+C to stop",
        options.output_dir
    ));

    tokio::select! {
        _ = super::shutdown_signal() => {}
        _ = run_host_loop(&mut queue, &mut host, None) => {}
    }

    let discarded = queue.discard_pending();
    if discarded > 0 {
        print_warning(&format!("Discarded {} unapplied results", discarded));
    }
    bridge.shutdown().await;
    Ok(())
}

/// Tick `queue` every [`POLL_INTERVAL`] until `limit` results were applied.
///
/// With no limit the loop runs until the future is dropped.
pub(crate) async fn run_host_loop(
    queue: &mut TaskQueue,
    host: &mut DirectoryHost,
    limit: Option<usize>,
) -> usize {
    let mut applied = 0;
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;
        match queue.tick(host) {
            TickOutcome::Applied(task) => {
                applied += 1;
                print_success(&format!(
                    "Updated '{}' ({})",
                    task.target,
                    host.destination(&task.target, &task.source).display()
                ));
                if limit.is_some_and(|limit| applied >= limit) {
                    return applied;
                }
            }
            TickOutcome::Dropped(task) => print_warning(&format!(
                "Unknown target '{}', result kept at {}",
                task.target,
                task.source.display()
            )),
            TickOutcome::Failed(task) => print_warning(&format!(
                "Could not apply result for '{}', kept at {}",
                task.target,
                task.source.display()
            )),
            TickOutcome::Idle => {}
        }
    }
}
