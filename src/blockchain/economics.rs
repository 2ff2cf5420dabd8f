//! Block reward schedule and the canonical genesis block.

use std::collections::BTreeMap;

use crate::blockchain::block::Block;
use crate::config::{ConsensusConfig, SupplyModel};
use crate::crypto::SignaturePair;
use crate::transaction::{Transaction, TxInput};

/// Reward paid at `height` under `supply_model`. Height 0 (genesis) never
/// pays a reward.
///
/// The `Fixed` and `Inflationary` models both currently collapse to
/// `start_reward` for every height — an artifact inherited unchanged from
/// the reference economics module, which never grew a real curve for either
/// one. `Halving` is the only model actually exercised in practice.
pub fn block_reward(height: u64, start_reward: u64, halving_interval: u64, supply_model: SupplyModel) -> u64 {
    if height == 0 {
        return 0;
    }
    match supply_model {
        SupplyModel::Fixed | SupplyModel::Inflationary => start_reward,
        SupplyModel::Halving => {
            let era = (height - 1) / halving_interval.max(1);
            let shift = era.min(63) as u32;
            start_reward.checked_shr(shift).unwrap_or(0).max(1)
        }
    }
}

/// The fixed genesis block. Its single transaction carries the monetary
/// policy (`supply_model`, `start_reward`, `halving_interval`) that
/// `Chain::policy` later extracts — so two nodes on the same network agree
/// on issuance without a separate out-of-band config.
pub fn genesis_block(consensus: &ConsensusConfig) -> Block {
    let mut output = BTreeMap::new();
    output.insert(consensus.treasury_address.clone(), consensus.initial_supply);

    let input = TxInput::Genesis {
        timestamp: 0,
        amount: consensus.initial_supply,
        address: "genesis".to_string(),
        public_key: "genesis".to_string(),
        signature: SignaturePair {
            r: "0".to_string(),
            s: "0".to_string(),
        },
        r#type: "GENESIS".to_string(),
        note: consensus.genesis_message.clone(),
        supply_model: consensus.supply_model.to_string(),
        start_reward: consensus.starting_reward,
        halving_interval: consensus.halving_interval,
    };

    let genesis_tx = Transaction {
        id: "genesis-allocation".to_string(),
        input,
        output,
    };

    Block {
        timestamp: 1,
        last_hash: "genesis_last_hash".to_string(),
        hash: "genesis_hash".to_string(),
        data: vec![genesis_tx],
        difficulty: 3,
        nonce: "genesis_nonce".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_zero_pays_nothing() {
        assert_eq!(block_reward(0, 1_000, 100, SupplyModel::Halving), 0);
    }

    #[test]
    fn halving_model_halves_every_interval() {
        assert_eq!(block_reward(1, 1_000, 100, SupplyModel::Halving), 1_000);
        assert_eq!(block_reward(100, 1_000, 100, SupplyModel::Halving), 1_000);
        assert_eq!(block_reward(101, 1_000, 100, SupplyModel::Halving), 500);
        assert_eq!(block_reward(201, 1_000, 100, SupplyModel::Halving), 250);
    }

    #[test]
    fn halving_model_floors_at_one() {
        assert_eq!(block_reward(1_000_000, 1_000, 1, SupplyModel::Halving), 1);
    }

    #[test]
    fn fixed_and_inflationary_models_return_start_reward() {
        assert_eq!(block_reward(500, 1_000, 100, SupplyModel::Fixed), 1_000);
        assert_eq!(block_reward(500, 1_000, 100, SupplyModel::Inflationary), 1_000);
    }

    #[test]
    fn genesis_carries_policy_and_allocation() {
        let mut cfg = ConsensusConfig::default();
        cfg.initial_supply = 42;
        let genesis = genesis_block(&cfg);
        assert_eq!(genesis.difficulty, 3);
        assert_eq!(genesis.nonce, "genesis_nonce");
        assert_eq!(genesis.data.len(), 1);
        assert_eq!(genesis.data[0].output[&cfg.treasury_address], 42);
    }
}
