use clap::Parser;
use flatland_sim::client::{ClientSession, LogRenderer, StdinInput};
use flatland_sim::config::{init_tracing, ClientConfig};
use flatland_sim::registry::ClassRegistry;

/// Terminal client: type keys (`wasd`, `g` grab, `c` cast, `p` portal) and press enter.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let session = match ClientSession::connect(&config, ClassRegistry::with_builtin_classes()).await {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(%err, addr = %config.server_addr(), "could not join");
            std::process::exit(1);
        }
    };

    let mut renderer = LogRenderer::default();
    if let Err(err) = session.run(StdinInput::spawn(), &mut renderer, &config).await {
        tracing::error!(%err, "session ended");
        std::process::exit(1);
    }
    tracing::info!("disconnected");
}
