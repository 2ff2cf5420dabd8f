//! Binary entry point for pyth-node.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use pyth_node::config::Config;
use pyth_node::node::Node;
use pyth_node::wallet::Wallet;

#[derive(Debug, Clone)]
struct Cli {
    config_path: Option<PathBuf>,
    p2p_port: Option<u16>,
    sync_interval_secs: Option<u64>,
    private_key: Option<String>,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config_path: None,
            p2p_port: None,
            sync_interval_secs: None,
            private_key: None,
        }
    }
}

impl Cli {
    fn from_env_args() -> Self {
        let mut cli = Self::default();
        let mut args = env::args().skip(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => cli.config_path = args.next().map(PathBuf::from),
                "--p2p-port" => {
                    if let Some(val) = args.next() {
                        match u16::from_str(&val) {
                            Ok(n) => cli.p2p_port = Some(n),
                            Err(_) => eprintln!("Invalid --p2p-port: {val}"),
                        }
                    }
                }
                "--sync-interval-secs" => {
                    if let Some(val) = args.next() {
                        match u64::from_str(&val) {
                            Ok(n) => cli.sync_interval_secs = Some(n),
                            Err(_) => eprintln!("Invalid --sync-interval-secs: {val}"),
                        }
                    }
                }
                "--private-key" => cli.private_key = args.next(),
                "--help" | "-h" => print_help_and_exit(),
                other => {
                    eprintln!("Unknown argument: {other}");
                    print_help_and_exit();
                }
            }
        }

        cli
    }
}

fn print_help_and_exit() -> ! {
    eprintln!(
        "\
pyth-node

USAGE:
  pyth-node [FLAGS]

FLAGS:
  --config <path>              Config file to load (default: platform data dir)
  --p2p-port <u16>             Override the P2P listen port
  --sync-interval-secs <u64>   How often the sync scheduler ticks (default from config)
  --private-key <hex>          Import a wallet from a hex-encoded private key
  -h, --help                   Show this help and exit
"
    );
    std::process::exit(0);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::from_env_args();

    let config_path = cli.config_path.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::from_file(&config_path).unwrap_or_default().from_env();

    if let Some(port) = cli.p2p_port {
        config.runtime.p2p_port = port;
    }
    if let Some(secs) = cli.sync_interval_secs {
        config.runtime.p2p_sync_interval_secs = secs;
    }

    let wallet = match &cli.private_key {
        Some(hex_key) => Wallet::from_private_key_hex(hex_key)?,
        None => Wallet::new(),
    };

    log::info!(
        "Starting node: address={}, p2p={}:{}, seeds={:?}",
        wallet.address(),
        config.runtime.p2p_host,
        config.runtime.p2p_port,
        config.runtime.p2p_seeds
    );

    let node = Arc::new(Node::new(config, wallet));
    node.run().await?;

    let status_node = Arc::clone(&node);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            let chain = status_node.chain.load();
            log::info!(
                "height={} peers={} mempool={} synced={} balance={}",
                chain.height(),
                status_node.p2p.peer_count(),
                status_node.mempool.size(),
                status_node.p2p.is_synced(),
                status_node.wallet_balance(),
            );
        }
    });

    log::info!("Node running. Press Ctrl+C to stop.");
    signal::ctrl_c().await?;
    log::info!("Shutdown signal received. Exiting...");
    Ok(())
}
