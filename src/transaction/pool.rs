//! The mempool: transactions waiting to be mined, keyed by id.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use thiserror::Error;

use super::{net_spend, Transaction, TxInput};
use crate::blockchain::block::Block;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("pending spend would exceed the sender's on-chain balance")]
    InsufficientBalance,
}

#[derive(Default)]
pub struct Mempool {
    transactions: RwLock<HashMap<String, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> u64 {
        self.transactions.read().len() as u64
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        self.transactions.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transactions.read().contains_key(id)
    }

    /// Admit `tx`. TRANSFER transactions are subject to net-spend admission
    /// control: the sender's total pending spend (this tx plus everything
    /// already pooled from them) must not exceed their current on-chain
    /// balance. REWARD/GENESIS transactions bypass this check — they do not
    /// draw down a real sender balance.
    pub fn set(&self, tx: Transaction, on_chain_balance: i64) -> Result<(), PoolError> {
        let mut guard = self.transactions.write();

        if let TxInput::Transfer { .. } = &tx.input {
            let sender = tx.input.address();
            let pending_spend: u64 = guard
                .values()
                .filter(|t| t.id != tx.id && t.input.address() == sender)
                .map(|t| net_spend(t, sender))
                .sum();
            let new_spend = net_spend(&tx, sender);
            let available = on_chain_balance.max(0) as u64;
            if pending_spend + new_spend > available {
                return Err(PoolError::InsufficientBalance);
            }
        }

        guard.insert(tx.id.clone(), tx);
        Ok(())
    }

    /// Transactions ordered by fee-per-byte, highest first, capped at `limit`.
    pub fn prioritized(&self, limit: usize) -> Vec<Transaction> {
        let guard = self.transactions.read();
        let mut txs: Vec<Transaction> = guard.values().cloned().collect();
        txs.sort_by(|a, b| {
            let rate = |t: &Transaction| t.input.fee() as f64 / t.wire_size().max(1) as f64;
            rate(b)
                .partial_cmp(&rate(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        txs.truncate(limit);
        txs
    }

    pub fn remove(&self, id: &str) {
        self.transactions.write().remove(id);
    }

    /// Drop every pooled transaction whose id already appears somewhere in
    /// `chain` — i.e. it has since been confirmed by (possibly someone
    /// else's) mined block.
    pub fn clear_confirmed(&self, chain: &[Block]) {
        let confirmed: HashSet<&str> = chain
            .iter()
            .flat_map(|b| b.data.iter().map(|t| t.id.as_str()))
            .collect();
        self.transactions
            .write()
            .retain(|id, _| !confirmed.contains(id.as_str()));
    }

    pub fn all(&self) -> Vec<Transaction> {
        self.transactions.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusConfig;
    use crate::wallet::Wallet;

    #[test]
    fn admits_transfer_within_balance() {
        let pool = Mempool::new();
        let sender = Wallet::new();
        let tx = Transaction::new_transfer(
            &sender,
            10_000_000,
            "r",
            1_000,
            0,
            &ConsensusConfig::default(),
        )
        .unwrap();
        assert!(pool.set(tx, 10_000_000).is_ok());
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn rejects_second_transfer_that_overspends_pending_total() {
        let pool = Mempool::new();
        let sender = Wallet::new();
        let cfg = ConsensusConfig::default();
        let first = Transaction::new_transfer(&sender, 10_000_000, "a", 9_000_000, 0, &cfg).unwrap();
        pool.set(first, 10_000_000).unwrap();

        let second = Transaction::new_transfer(&sender, 10_000_000, "b", 9_000_000, 1, &cfg).unwrap();
        assert_eq!(
            pool.set(second, 10_000_000).unwrap_err(),
            PoolError::InsufficientBalance
        );
    }

    #[test]
    fn prioritized_orders_by_fee_per_byte_descending() {
        let pool = Mempool::new();
        let sender_a = Wallet::new();
        let sender_b = Wallet::new();
        let cfg = ConsensusConfig::default();

        // A congested mempool size pushes the dynamic fee (and hence
        // fee-per-byte) of the second transfer above the first.
        let low = Transaction::new_transfer(&sender_a, 1_000_000, "r", 1_000, 0, &cfg).unwrap();
        let high =
            Transaction::new_transfer(&sender_b, 1_000_000, "r", 1_000, 50_000, &cfg).unwrap();
        assert!(high.input.fee() > low.input.fee());

        pool.set(low.clone(), 1_000_000).unwrap();
        pool.set(high.clone(), 1_000_000).unwrap();

        let ordered = pool.prioritized(2);
        assert_eq!(ordered[0].id, high.id);
    }

    #[test]
    fn clear_confirmed_drops_mined_transactions() {
        let pool = Mempool::new();
        let sender = Wallet::new();
        let cfg = ConsensusConfig::default();
        let tx = Transaction::new_transfer(&sender, 10_000_000, "r", 1_000, 0, &cfg).unwrap();
        pool.set(tx.clone(), 10_000_000).unwrap();

        let mut block = crate::blockchain::economics::genesis_block(&cfg);
        block.data = vec![tx.clone()];
        pool.clear_confirmed(&[block]);

        assert!(!pool.contains(&tx.id));
    }
}
