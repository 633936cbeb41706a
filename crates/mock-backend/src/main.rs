//! Attendance mock backend
//!
//! `serve` runs the stub in the foreground for manual front-end work. `worker`
//! is the process the test-side supervisor spawns; it speaks the line protocol
//! on stdin/stdout and logs to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use attendance_common::{ForceAction, ResponseCatalog, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
use attendance_mock_backend::worker;

#[derive(Parser, Debug)]
#[command(name = "attendance-mock-backend")]
#[command(about = "Canned-response HTTP stub for attendance front-end tests")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve canned responses until interrupted
    Serve {
        /// Interface to bind
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Failure injection: none, success or fail
        #[arg(short, long, default_value = "none")]
        force_action: ForceAction,

        /// Catalog file (.json or .toml) keyed by method, then endpoint
        #[arg(short, long)]
        catalog: Option<PathBuf>,
    },

    /// Run as a supervised worker (configuration on stdin, events on stdout)
    #[command(hide = true)]
    Worker,
}

fn init_logging(debug: bool, ansi: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // stdout belongs to the worker protocol
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(ansi))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            force_action,
            catalog,
        } => {
            init_logging(cli.debug, true);
            info!("Attendance mock backend v{}", env!("CARGO_PKG_VERSION"));

            let catalog = match catalog {
                Some(path) => {
                    info!("Loading catalog from {}", path.display());
                    ResponseCatalog::load(&path)?
                }
                None => ResponseCatalog::default(),
            };
            let config = ServerConfig::new()
                .with_catalog(catalog)
                .with_force_action(force_action)
                .with_host(host)
                .with_port(port);

            worker::serve_standalone(config).await?;
        }
        Commands::Worker => {
            init_logging(cli.debug, false);
            worker::run_worker(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
        }
    }

    Ok(())
}
