//! CLI entrypoint: argument parsing, tracing setup, config load, serve.

use camino::Utf8PathBuf;
use clap::Parser;
use crboost_config::Config;
use std::io::IsTerminal;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::server;
use crate::store::{ProjectStore, ServerContext};

/// Exit code for configuration problems; anything else fatal is 1.
const EXIT_CONFIG: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "crboost-server",
    about = "Headnode orchestrator for cryo-ET processing pipelines",
    version
)]
struct Cli {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Listen port.
    #[arg(long, default_value_t = 8081)]
    port: u16,

    /// Path to the server configuration document.
    #[arg(long, default_value = "crboost.toml")]
    config: Utf8PathBuf,

    /// Verbose (debug-level) logging.
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "crboost=debug,info"
    } else {
        "crboost=info,warn"
    };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let use_color = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .with_target(verbose)
        .compact()
        .init();
}

/// Run the server. Returns the process exit code on failure; `Ok(())` is a
/// clean shutdown.
pub fn run() -> Result<(), i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(&cli.config).map_err(|e| {
        error!("configuration error: {e}");
        EXIT_CONFIG
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error!("failed to start runtime: {e}");
            1
        })?;

    runtime.block_on(async move {
        let store = Arc::new(ProjectStore::new(ServerContext::new(config)));
        let app = server::router(store);

        let addr = format!("{}:{}", cli.host, cli.port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            error!("could not bind {addr}: {e}");
            1
        })?;
        info!(%addr, "crboost-server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown requested");
            })
            .await
            .map_err(|e| {
                error!("server error: {e}");
                1
            })
    })
}
