mod config_commands;
mod db_commands;
mod decode_commands;

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    parley_config::ParleyConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "parley", about = "Parley: WhatsApp Business gateway with AI replies")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and ~/.config/parley/).
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
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
    /// Run pending database migrations.
    Migrate,
    /// Decode a webhook delivery and print its events as JSON lines.
    Decode {
        /// Path to the delivery body, or `-` for stdin.
        file: PathBuf,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
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
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ParleyConfig> {
    match &cli.config {
        Some(path) => parley_config::load_config(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(parley_config::discover_and_load()),
    }
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let config = load_config(cli)?;
    let bind = cli.bind.clone().unwrap_or_else(|| config.server.bind.clone());
    let port = cli.port.unwrap_or(config.server.port);

    let gateway = parley_gateway::build_gateway(&config).await?;
    let state = parley_gateway::AppState::new(
        Arc::new(gateway),
        Duration::from_secs(config.server.request_timeout_secs),
    );
    parley_gateway::serve(&bind, port, parley_gateway::build_router(state)).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match &cli.command {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "parley starting");
            serve(&cli).await
        },
        Some(Commands::Migrate) => db_commands::migrate(&load_config(&cli)?).await,
        Some(Commands::Decode { file }) => decode_commands::handle_decode(file),
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
    }
}
