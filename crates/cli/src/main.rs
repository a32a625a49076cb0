mod auth_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    pipebridge_config::PipebridgeConfig,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "pipebridge", about = "pipebridge: Pipedream tools for AI agents over MCP")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./pipebridge.toml and the user config dir).
    #[arg(long, global = true, env = "PIPEBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Serve,
    /// Pipedream authorization for a user.
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
    /// Purge stale state nonces and unrecoverable credentials once.
    Sweep,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> PipebridgeConfig {
    let mut config = match &cli.config {
        Some(path) => pipebridge_config::load_from(path),
        None => pipebridge_config::discover_and_load(),
    };
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config
}

async fn serve(config: PipebridgeConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
        }
        signal.cancel();
    });
    pipebridge_gateway::serve(&config, shutdown).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "pipebridge starting");
    let config = load_config(&cli);

    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Auth { action }) => auth_commands::handle_auth(&config, action).await,
        Some(Commands::Sweep) => auth_commands::sweep(&config).await,
    }
}
