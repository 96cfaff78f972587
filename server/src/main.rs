use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Simulation ticks per second
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "64")]
    max_clients: usize,

    /// Seconds before an idle connection is dropped
    #[arg(long, default_value = "30")]
    client_timeout: u64,

    /// Seconds before trade requests and invites expire
    #[arg(long, default_value = "30")]
    invite_timeout: u64,

    /// JSON spawn list; the built-in map is used when omitted
    #[arg(long)]
    map: Option<PathBuf>,

    /// JSON guild store; guilds are kept in memory only when omitted
    #[arg(long)]
    guilds: Option<PathBuf>,

    /// Seed for monster wandering and loot rolls
    #[arg(long, default_value = "24301")]
    seed: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            tick_rate: args.tick_rate,
            max_clients: args.max_clients,
            client_timeout: Duration::from_secs(args.client_timeout),
            invite_timeout_ms: args.invite_timeout.saturating_mul(1000),
            map_file: args.map,
            guild_file: args.guilds,
            seed: args.seed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ServerConfig::from(Args::parse());
    info!(
        "Starting server on {} at {} Hz (max {} clients)",
        config.bind_addr(),
        config.tick_rate,
        config.max_clients
    );

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
