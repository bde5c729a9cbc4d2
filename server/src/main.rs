use clap::Parser;
use log::info;
use rollback_server::config::HttpConfigProvider;
use rollback_server::{RelayServer, ServerConfig};
use shared::GAME_SERVER_PORT;

/// Authoritative UDP relay for rollback-netcode matches.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value_t = GAME_SERVER_PORT)]
    port: u16,

    /// Base URL of the match configuration service
    #[arg(long, env = "MATCH_CONFIG_URL")]
    config_url: String,

    /// Largest player count a match configuration may request
    #[arg(long, default_value_t = 2)]
    max_players: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info");
    }

    let args = Args::parse();
    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_players_cap: args.max_players,
        ..ServerConfig::default()
    };

    info!(
        "Starting rollback relay on {} (config service {})",
        config.bind_addr, args.config_url
    );

    let provider = HttpConfigProvider::new(args.config_url);
    let server = RelayServer::bind(config, provider).await?;
    server.run().await?;

    Ok(())
}
