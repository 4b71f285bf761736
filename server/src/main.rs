use clap::Parser;
use log::{error, info};
use server::coordinator::Coordinator;
use server::game::GameConfig;
use server::network::NetworkServer;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Fixed number of rounds per game (default scales with lobby size)
        #[clap(long)]
        round_count: Option<u32>,
        /// Fixed number of starting lives (default is one per player)
        #[clap(long)]
        starting_lives: Option<u32>,
        /// Number of throwing stars a game starts with
        #[clap(long, default_value = "1")]
        starting_stars: i32,
    }

    env_logger::init();
    let args = Args::parse();

    let config = GameConfig {
        round_count: args.round_count,
        starting_lives: args.starting_lives,
        starting_stars: args.starting_stars,
    };
    let coordinator = Arc::new(Coordinator::new(config));
    let address = format!("{}:{}", args.host, args.port);
    let server = NetworkServer::new(address, coordinator);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server failed: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
