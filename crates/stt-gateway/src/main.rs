//! CLI entry point - the composition root.
//!
//! This is the only place that turns process-level inputs (argv, env) into
//! a [`stt_web::ServerConfig`] and hands off to [`stt_web::start_server`].
//! Everything else is wired up inside `stt-web`'s own bootstrap.

use clap::Parser;
use stt_web::{ServerConfig, start_server};

/// Multi-provider speech-to-text comparator and voice-agent gateway.
#[derive(Parser, Debug)]
#[command(name = "stt-gateway", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "STT_GATEWAY_PORT", default_value_t = 8787)]
    port: u16,

    /// Allowed CORS origin. May be repeated. Omit to allow any origin.
    #[arg(long = "allow-origin", env = "STT_GATEWAY_ALLOW_ORIGIN", value_delimiter = ',')]
    allow_origin: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = ServerConfig::with_defaults();
    config.port = cli.port;
    if !cli.allow_origin.is_empty() {
        config = config.with_allowed_origins(cli.allow_origin);
    }

    start_server(config).await?;
    Ok(())
}
