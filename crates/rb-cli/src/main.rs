//! render-bridge CLI
//!
//! Sends images to a remote image-generation service and receives the
//! processed results back, directly or through an SSH relay:
//! - Connection test (ping)
//! - File transfer, optionally waiting for the result
//! - Standalone callback receiver writing results to a directory
//! - Tunnel-only mode

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rb_protocol::RenderType;
use render_bridge::commands::{self, ListenOptions, Overrides, SendOptions};
use render_bridge::output::print_error;

#[derive(Parser)]
#[command(name = "render-bridge")]
#[command(author, version, about = "Bridge renders to an image-generation service")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log filter used when RUST_LOG is unset (overrides -v/-q)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Service address (overrides config), e.g. tcp://gpu-box:5555
    #[arg(long, global = true)]
    address: Option<String>,

    /// Callback receiver port (overrides config)
    #[arg(long, global = true)]
    receiver_port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the service answers, bringing up the tunnel if configured
    Ping,

    /// Send an image to the service
    Send {
        /// Image file to send
        file: PathBuf,

        /// Image the result should update (overrides config)
        #[arg(short, long)]
        target: Option<String>,

        /// How the image was produced: standard, multilayer_exr, direct_image
        #[arg(short = 'r', long, default_value = "standard")]
        render_type: RenderType,

        /// Channel map entry, LOGICAL=CHANNEL (repeatable)
        #[arg(long = "channel", value_parser = commands::parse_channel)]
        channels: Vec<(String, String)>,

        /// View layer for --pass and --aov
        #[arg(long)]
        layer: Option<String>,

        /// Enabled render pass by logical name, e.g. depth (repeatable)
        #[arg(long = "pass")]
        passes: Vec<String>,

        /// Active custom AOV name (repeatable)
        #[arg(long = "aov")]
        aovs: Vec<String>,

        /// Never delete the file after sending
        #[arg(long)]
        keep_source: bool,

        /// Wait for the result and write it into this directory
        #[arg(short, long)]
        wait: Option<PathBuf>,

        /// Seconds to wait for the result
        #[arg(long, default_value_t = 300)]
        wait_timeout: u64,
    },

    /// Run the callback receiver and write results to a directory
    Listen {
        /// Directory results are written into
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Only accept these target names (repeatable)
        #[arg(long)]
        only: Vec<String>,
    },

    /// Bring up the SSH tunnel and keep it open
    Tunnel,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let log_level = cli.log_level.as_deref().unwrap_or(log_level);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_ref();
    let mut overrides = Overrides {
        service_address: cli.address.clone(),
        receiver_port: cli.receiver_port,
        target_image: None,
    };

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path),
            ConfigAction::Init { force } => commands::config_init(config_path, force),
            ConfigAction::Path => commands::config_path(config_path),
        },
        Commands::Ping => {
            let config = commands::load_bridge_config(config_path, &overrides)?;
            commands::ping_command(&config).await
        }
        Commands::Send {
            file,
            target,
            render_type,
            channels,
            layer,
            passes,
            aovs,
            keep_source,
            wait,
            wait_timeout,
        } => {
            overrides.target_image = target;
            let config = commands::load_bridge_config(config_path, &overrides)?;
            let options = SendOptions {
                file,
                render_type,
                channels,
                layer,
                passes,
                aovs,
                keep_source,
                wait,
                wait_timeout: Duration::from_secs(wait_timeout),
            };
            commands::send_command(&config, options).await
        }
        Commands::Listen { output_dir, only } => {
            let config = commands::load_bridge_config(config_path, &overrides)?;
            commands::listen_command(&config, ListenOptions { output_dir, only }).await
        }
        Commands::Tunnel => {
            let config = commands::load_bridge_config(config_path, &overrides)?;
            commands::tunnel_command(&config).await
        }
    }
}
