//! The node facade: wires chain, mempool, wallet, miner and the P2P overlay
//! behind the handful of operations a front end (CLI, RPC, tests) needs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use log::info;

use crate::blockchain::Chain;
use crate::config::{Config, ConfigError};
use crate::error::NodeError;
use crate::miner::{run_auto_miner, Miner};
use crate::network::node::Node as P2PNode;
use crate::network::{Message, SyncScheduler};
use crate::transaction::pool::Mempool;
use crate::transaction::Transaction;
use crate::wallet::Wallet;

pub struct Node {
    pub config: Config,
    pub chain: Arc<ArcSwap<Chain>>,
    pub mempool: Arc<Mempool>,
    pub wallet: Arc<Wallet>,
    pub miner: Arc<Miner>,
    pub p2p: Arc<P2PNode>,
    auto_mine_enabled: Arc<AtomicBool>,
}

impl Node {
    pub fn new(config: Config, wallet: Wallet) -> Self {
        let chain = Arc::new(ArcSwap::from_pointee(Chain::new()));
        let mempool = Arc::new(Mempool::new());
        let wallet = Arc::new(wallet);

        let miner = Arc::new(Miner::new(
            chain.clone(),
            mempool.clone(),
            wallet.clone(),
            config.consensus.clone(),
        ));

        let self_address = format!("{}:{}", config.runtime.p2p_host, config.runtime.p2p_port);
        let p2p = P2PNode::new(self_address, chain.clone(), mempool.clone());

        let auto_mine_enabled = Arc::new(AtomicBool::new(config.runtime.auto_mine_enabled));

        Node {
            config,
            chain,
            mempool,
            wallet,
            miner,
            p2p,
            auto_mine_enabled,
        }
    }

    /// Start the P2P listener, dial configured seeds, and launch the
    /// periodic sync scheduler and (if enabled) the auto-miner. Returns once
    /// all background tasks are spawned; the caller is expected to await a
    /// shutdown signal separately.
    pub async fn run(self: &Arc<Self>) -> Result<(), NodeError> {
        let addr: SocketAddr = format!(
            "{}:{}",
            self.config.runtime.p2p_host, self.config.runtime.p2p_port
        )
        .parse()
        .map_err(|e: std::net::AddrParseError| NodeError::Transport(e.to_string()))?;

        let listener_node = Arc::clone(&self.p2p);
        tokio::spawn(async move {
            if let Err(e) = P2PNode::listen(listener_node, addr).await {
                log::error!("p2p listener stopped: {e}");
            }
        });

        for seed in &self.config.runtime.p2p_seeds {
            P2PNode::connect(&self.p2p, seed.clone());
        }

        let scheduler = SyncScheduler::new(
            Arc::clone(&self.p2p),
            Duration::from_secs(self.config.runtime.p2p_sync_interval_secs),
        );
        tokio::spawn(scheduler.start());

        let node = Arc::clone(self);
        let miner = Arc::clone(&self.miner);
        let enabled = Arc::clone(&self.auto_mine_enabled);
        let seeded = !self.config.runtime.p2p_seeds.is_empty();
        let synced_flag = Arc::new(AtomicBool::new(!seeded));
        if seeded {
            // Flip to true the moment the p2p layer reports sync completion.
            let synced_flag = Arc::clone(&synced_flag);
            struct Flip(Arc<AtomicBool>);
            impl crate::network::SyncObserver for Flip {
                fn on_synced(&self) {
                    self.0.store(true, Ordering::Relaxed);
                }
                fn on_sync_change(&self, syncing: bool) {
                    if syncing {
                        self.0.store(false, Ordering::Relaxed);
                    }
                }
            }
            self.p2p.add_observer(Arc::new(Flip(synced_flag)));
        }

        tokio::spawn(run_auto_miner(
            miner,
            Duration::from_secs(5),
            enabled,
            synced_flag,
            move |block| {
                let node = Arc::clone(&node);
                async move {
                    info!("mined block at height {}", node.chain.load().height());
                    node.p2p.broadcast(&Message::Block { block }).await;
                }
            },
        ));

        Ok(())
    }

    pub fn get_chain_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.chain.load().blocks).expect("chain must serialize")
    }

    pub async fn mine_once(&self) -> serde_json::Value {
        let block = self.miner.mine_once().await;
        self.p2p.broadcast(&Message::Block { block: block.clone() }).await;
        serde_json::to_value(&block).expect("block must serialize")
    }

    pub fn wallet_balance(&self) -> i64 {
        self.wallet.balance(&self.chain.load().blocks)
    }

    pub fn estimate_fee(&self, recipient: &str, amount: u64) -> u64 {
        let mut provisional = std::collections::BTreeMap::new();
        provisional.insert(recipient.to_string(), amount);
        provisional.insert(self.wallet.address().to_string(), 0);
        Transaction::compute_fee(&provisional, self.mempool.size(), &self.config.consensus)
    }

    /// Build, sign, pool, and broadcast a transfer.
    pub async fn submit_transaction(
        &self,
        recipient: &str,
        amount: u64,
    ) -> Result<Transaction, NodeError> {
        let balance = self.wallet_balance();
        let tx = Transaction::new_transfer(
            &self.wallet,
            balance,
            recipient,
            amount,
            self.mempool.size(),
            &self.config.consensus,
        )?;
        self.mempool.set(tx.clone(), balance)?;
        self.p2p
            .broadcast(&Message::Transaction { transaction: tx.clone() })
            .await;
        Ok(tx)
    }

    pub fn transaction_status(&self, id: &str) -> TransactionStatus {
        if self.mempool.contains(id) {
            return TransactionStatus::Pending;
        }
        let confirmed = self
            .chain
            .load()
            .blocks
            .iter()
            .any(|b| b.data.iter().any(|t| t.id == id));
        if confirmed {
            TransactionStatus::Confirmed
        } else {
            TransactionStatus::Unknown
        }
    }

    pub fn config_read(&self) -> &Config {
        &self.config
    }

    pub fn config_write(&self, path: &PathBuf) -> Result<(), ConfigError> {
        self.config.to_file(path)
    }

    pub fn set_auto_mine_enabled(&self, enabled: bool) {
        self.auto_mine_enabled.store(enabled, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Unknown,
}
