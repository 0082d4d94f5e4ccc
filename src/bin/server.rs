use std::path::PathBuf;

use clap::Parser;
use flatland_sim::config::{init_tracing, ServerConfig};
use flatland_sim::server;

/// Authoritative simulation server.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    tick_ms: Option<u64>,
    #[arg(long)]
    seed: Option<u64>,
    /// JSON level definitions to serve instead of the built-in world.
    #[arg(long)]
    levels: Option<PathBuf>,
}

impl Cli {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(tick_ms) = self.tick_ms.filter(|ms| *ms > 0) {
            config.tick_ms = tick_ms;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.levels.is_some() {
            config.levels_path = self.levels;
        }
        config
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let config = Cli::parse().apply(ServerConfig::from_env());

    if let Err(err) = server::run(config).await {
        tracing::error!(%err, "server stopped");
        std::process::exit(1);
    }
}
