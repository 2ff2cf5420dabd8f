//! The miner: drains the mempool by priority under a per-sender spend
//! budget, assembles the reward transaction, and mines the next block.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::blockchain::{block_reward, Block, Chain};
use crate::config::ConsensusConfig;
use crate::transaction::pool::Mempool;
use crate::transaction::{net_spend, Transaction, TxInput};
use crate::wallet::Wallet;

pub struct Miner {
    chain: Arc<ArcSwap<Chain>>,
    mempool: Arc<Mempool>,
    wallet: Arc<Wallet>,
    consensus: ConsensusConfig,
    guard: tokio::sync::Mutex<()>,
}

impl Miner {
    pub fn new(
        chain: Arc<ArcSwap<Chain>>,
        mempool: Arc<Mempool>,
        wallet: Arc<Wallet>,
        consensus: ConsensusConfig,
    ) -> Self {
        Self {
            chain,
            mempool,
            wallet,
            consensus,
            guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Mine exactly one block: select prioritized transactions that fit the
    /// sender's real on-chain balance, pay the miner and the foundation cut
    /// out of the block reward plus collected fees, and append the block to
    /// the shared chain. Always succeeds — a block with zero transactions
    /// and only the reward is valid.
    pub async fn mine_once(&self) -> Block {
        let _permit = self.guard.lock().await;

        let chain_snapshot = self.chain.load_full();
        let height = chain_snapshot.height() + 1;
        let policy = chain_snapshot.policy();

        let candidates = self
            .mempool
            .prioritized(self.consensus.max_txs_per_block.saturating_sub(1));

        let mut selected = Vec::new();
        let mut spent: HashMap<String, i64> = HashMap::new();
        let mut fee_total: u64 = 0;

        for tx in candidates {
            match &tx.input {
                // Reward/genesis transactions never belong in the mempool;
                // a stray one there is dropped rather than mined.
                TxInput::Genesis { .. } | TxInput::Reward { .. } => {
                    self.mempool.remove(&tx.id);
                }
                TxInput::Transfer { .. } => {
                    let sender = tx.input.address();
                    let balance = Wallet::calculate_balance(&chain_snapshot.blocks, sender);
                    let already_spent = spent.get(sender).copied().unwrap_or(0);
                    let spend = net_spend(&tx, sender) as i64;
                    if already_spent + spend > balance {
                        self.mempool.remove(&tx.id);
                        continue;
                    }
                    *spent.entry(sender.to_string()).or_insert(0) += spend;
                    fee_total += tx.input.fee();
                    selected.push(tx);
                }
            }
        }

        let reward = block_reward(
            height,
            policy.start_reward,
            policy.halving_interval,
            policy.supply_model,
        ) + fee_total;
        let foundation_cut = ((reward as f64 * self.consensus.foundation_fee_rate).floor() as u64)
            .min(reward);
        let miner_cut = reward - foundation_cut;

        let mut outputs = BTreeMap::new();
        if miner_cut > 0 {
            outputs.insert(self.wallet.address().to_string(), miner_cut);
        }
        if foundation_cut > 0 {
            outputs.insert(self.consensus.foundation_address.clone(), foundation_cut);
        }
        selected.push(Transaction::reward_with_outputs(outputs));

        let consensus = self.consensus.clone();
        let mut chain = (*chain_snapshot).clone();
        let mined = tokio::task::spawn_blocking(move || {
            chain.add_block(selected, &consensus);
            chain
        })
        .await
        .expect("mining task panicked");

        let tip = mined.tip().clone();
        self.chain.store(Arc::new(mined));
        self.mempool.clear_confirmed(&self.chain.load().blocks);
        tip
    }
}

/// Periodically mines a block when auto-mining is enabled and (if the node
/// has seed peers configured) the chain is caught up with the network.
pub async fn run_auto_miner<F, Fut>(
    miner: Arc<Miner>,
    interval: Duration,
    enabled: Arc<AtomicBool>,
    synced: Arc<AtomicBool>,
    mut on_block: F,
) where
    F: FnMut(Block) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if !enabled.load(Ordering::Relaxed) || !synced.load(Ordering::Relaxed) {
            continue;
        }
        let block = miner.mine_once().await;
        on_block(block).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Chain;

    fn new_chain() -> Arc<ArcSwap<Chain>> {
        Arc::new(ArcSwap::from_pointee(Chain::new()))
    }

    #[tokio::test]
    async fn mines_reward_only_block_when_mempool_is_empty() {
        let chain = new_chain();
        let mempool = Arc::new(Mempool::new());
        let wallet = Arc::new(Wallet::new());
        let mut cfg = ConsensusConfig::default();
        cfg.mine_rate = 1;
        let miner = Miner::new(chain.clone(), mempool, wallet.clone(), cfg.clone());

        let block = miner.mine_once().await;
        assert_eq!(chain.load().height(), 1);
        let reward_tx = block.data.last().unwrap();
        assert!(reward_tx.input.is_reward());
        assert!(reward_tx.output.contains_key(wallet.address()));
    }

    #[tokio::test]
    async fn splits_reward_between_miner_and_foundation() {
        let chain = new_chain();
        let mempool = Arc::new(Mempool::new());
        let wallet = Arc::new(Wallet::new());
        let mut cfg = ConsensusConfig::default();
        cfg.mine_rate = 1;
        cfg.foundation_fee_rate = 0.1;
        let miner = Miner::new(chain.clone(), mempool, wallet.clone(), cfg.clone());

        let block = miner.mine_once().await;
        let reward_tx = block.data.last().unwrap();
        let miner_cut = reward_tx.output[wallet.address()];
        let foundation_cut = reward_tx.output[&cfg.foundation_address];
        let total = miner_cut + foundation_cut;
        let expected_reward = crate::blockchain::block_reward(
            1,
            cfg.starting_reward,
            cfg.halving_interval,
            cfg.supply_model,
        );
        assert_eq!(total, expected_reward);
        assert_eq!(foundation_cut, (expected_reward as f64 * 0.1).floor() as u64);
    }

    #[tokio::test]
    async fn drops_transfer_that_exceeds_sender_balance() {
        let chain = new_chain();
        let mempool = Arc::new(Mempool::new());
        let sender = Wallet::new();
        let mut cfg = ConsensusConfig::default();
        cfg.mine_rate = 1;

        // Admitted against a balance the mempool itself reported (0), but by
        // the time the miner drains it the sender still has no on-chain
        // funds, so the miner must drop rather than mine it.
        let mut tx = Transaction::new_transfer(&sender, i64::MAX, "r", 1_000, 0, &cfg).unwrap();
        tx.output.insert(sender.address().to_string(), 0);
        mempool.set(tx.clone(), i64::MAX).unwrap();

        let miner = Miner::new(chain.clone(), mempool.clone(), Arc::new(Wallet::new()), cfg);
        let block = miner.mine_once().await;

        assert!(block.data.iter().all(|t| t.id != tx.id));
        assert!(!mempool.contains(&tx.id));
    }
}
