//! Transaction construction, mutation, serialization and validation.

pub mod pool;

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blockchain::block::Block;
use crate::config::ConsensusConfig;
use crate::crypto;
use crate::crypto::SignaturePair;
use crate::wallet::Wallet;

/// Sentinel sender address used by reward transactions in place of a real
/// signed input.
pub const MINING_REWARD_ADDRESS: &str = "+--official-mining-reward--+";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("amount must be positive")]
    AmountMustBePositive,
    #[error("amount exceeds balance")]
    AmountExceedsBalance,
    #[error("amount plus fee exceeds balance")]
    AmountPlusFeeExceedsBalance,
    #[error("amount exceeds balance after fee")]
    AmountExceedsBalanceAfterFee,
    #[error("invalid mining reward")]
    InvalidMiningReward,
    #[error("fee below minimum relay fee")]
    FeeBelowMinimum,
    #[error("invalid transaction output values")]
    InvalidOutputValues,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("recipient not found in transaction")]
    UnknownRecipient,
}

/// The "kind" of a transaction is carried by the shape of `input` rather
/// than an explicit discriminant, so that the wire format stays a single
/// flat JSON object per variant. Declared most-fields-first since
/// `#[serde(untagged)]` picks the first variant that deserializes
/// successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TxInput {
    Genesis {
        timestamp: i128,
        amount: u64,
        address: String,
        public_key: String,
        signature: SignaturePair,
        r#type: String,
        note: String,
        supply_model: String,
        start_reward: u64,
        halving_interval: u64,
    },
    Transfer {
        timestamp: i128,
        amount: u64,
        address: String,
        public_key: String,
        signature: SignaturePair,
        fee: u64,
    },
    Reward {
        address: String,
    },
}

impl TxInput {
    pub fn is_genesis(&self) -> bool {
        matches!(self, TxInput::Genesis { .. })
    }

    pub fn is_reward(&self) -> bool {
        matches!(self, TxInput::Reward { .. })
    }

    pub fn address(&self) -> &str {
        match self {
            TxInput::Genesis { address, .. } => address,
            TxInput::Transfer { address, .. } => address,
            TxInput::Reward { address } => address,
        }
    }

    pub fn amount(&self) -> u64 {
        match self {
            TxInput::Genesis { amount, .. } => *amount,
            TxInput::Transfer { amount, .. } => *amount,
            TxInput::Reward { .. } => 0,
        }
    }

    pub fn fee(&self) -> u64 {
        match self {
            TxInput::Transfer { fee, .. } => *fee,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub input: TxInput,
    pub output: BTreeMap<String, u64>,
}

impl Transaction {
    fn gen_id() -> String {
        let mut bytes = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    fn now_ns() -> i128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_nanos() as i128
    }

    /// `tx_size = len(canonical_json(output)) + overhead`, fee scaled by
    /// mempool congestion, floored to `min_absolute_fee`.
    pub fn compute_fee(
        output: &BTreeMap<String, u64>,
        mempool_size: u64,
        consensus: &ConsensusConfig,
    ) -> u64 {
        let tx_size =
            crypto::hash::canonical_json_string(output).len() + consensus.tx_size_input_overhead;
        let congestion = (1.0
            + mempool_size as f64 / consensus.fee_congestion_target_txs.max(1) as f64)
            .min(consensus.fee_max_multiplier as f64);
        let per_byte = (consensus.dynamic_fee_base_per_byte as f64 * congestion)
            .max(consensus.min_relay_fee_per_byte as f64);
        (per_byte * tx_size as f64).max(consensus.min_absolute_fee as f64) as u64
    }

    fn create_input(sender: &Wallet, output: &BTreeMap<String, u64>, fee: u64) -> TxInput {
        let amount: u64 = output.values().sum::<u64>() + fee;
        TxInput::Transfer {
            timestamp: Self::now_ns(),
            amount,
            address: sender.address().to_string(),
            public_key: sender.public_key_hex(),
            signature: sender.sign(output),
            fee,
        }
    }

    /// Build a signed transfer from `sender` to `recipient`. `balance` is the
    /// sender's current on-chain balance (see `Wallet::calculate_balance`).
    pub fn new_transfer(
        sender: &Wallet,
        balance: i64,
        recipient: &str,
        amount: u64,
        mempool_size: u64,
        consensus: &ConsensusConfig,
    ) -> Result<Transaction, TransactionError> {
        if amount == 0 {
            return Err(TransactionError::AmountMustBePositive);
        }
        let provisional_change = balance - amount as i64;
        if provisional_change < 0 {
            return Err(TransactionError::AmountExceedsBalance);
        }

        let mut provisional_output = BTreeMap::new();
        provisional_output.insert(recipient.to_string(), amount);
        provisional_output.insert(sender.address().to_string(), provisional_change as u64);

        let computed_fee = Self::compute_fee(&provisional_output, mempool_size, consensus);
        if amount as i64 + computed_fee as i64 > balance {
            return Err(TransactionError::AmountPlusFeeExceedsBalance);
        }

        let change_after_fee = (balance - amount as i64 - computed_fee as i64) as u64;
        let mut output = BTreeMap::new();
        output.insert(recipient.to_string(), amount);
        output.insert(sender.address().to_string(), change_after_fee);

        let input = Self::create_input(sender, &output, computed_fee);
        Ok(Transaction {
            id: Self::gen_id(),
            input,
            output,
        })
    }

    /// Add or increase a recipient's allotment on an existing transfer,
    /// re-signing and re-computing the fee against the new output set.
    pub fn update(
        &mut self,
        sender: &Wallet,
        recipient: &str,
        amount: u64,
        mempool_size: u64,
        consensus: &ConsensusConfig,
    ) -> Result<(), TransactionError> {
        if amount == 0 {
            return Err(TransactionError::AmountMustBePositive);
        }
        let current_change = *self
            .output
            .get(sender.address())
            .ok_or(TransactionError::UnknownRecipient)?;
        if amount > current_change {
            return Err(TransactionError::AmountExceedsBalance);
        }

        let mut updated_output = self.output.clone();
        *updated_output.entry(recipient.to_string()).or_insert(0) += amount;
        updated_output.insert(sender.address().to_string(), current_change - amount);

        let computed_fee = Self::compute_fee(&updated_output, mempool_size, consensus);
        let remaining_change = updated_output[sender.address()];
        if computed_fee > remaining_change {
            return Err(TransactionError::AmountExceedsBalanceAfterFee);
        }
        *updated_output.get_mut(sender.address()).unwrap() -= computed_fee;

        self.output = updated_output;
        self.input = Self::create_input(sender, &self.output, computed_fee);
        Ok(())
    }

    /// A reward transaction paying a single recipient.
    pub fn reward_transaction(miner: &Wallet, reward_amount: u64, override_address: Option<&str>) -> Transaction {
        let target = override_address.unwrap_or_else(|| miner.address()).to_string();
        let mut output = BTreeMap::new();
        output.insert(target, reward_amount);
        Transaction {
            id: Self::gen_id(),
            input: TxInput::Reward {
                address: MINING_REWARD_ADDRESS.to_string(),
            },
            output,
        }
    }

    /// A reward transaction with an arbitrary output split (used by the
    /// miner to pay both the miner address and the foundation cut).
    pub fn reward_with_outputs(outputs: BTreeMap<String, u64>) -> Transaction {
        Transaction {
            id: Self::gen_id(),
            input: TxInput::Reward {
                address: MINING_REWARD_ADDRESS.to_string(),
            },
            output: outputs,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("transaction must serialize")
    }

    pub fn from_json(value: serde_json::Value) -> Result<Transaction, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// GENESIS is exempt; REWARD requires at least one strictly-positive
    /// output; TRANSFER enforces the fee floor, the amount/output/fee
    /// identity, and the signature.
    pub fn is_valid_transaction(
        &self,
        consensus: &ConsensusConfig,
    ) -> Result<(), TransactionError> {
        match &self.input {
            TxInput::Genesis { .. } => Ok(()),
            TxInput::Reward { .. } => {
                if self.output.is_empty() || self.output.values().any(|&v| v == 0) {
                    return Err(TransactionError::InvalidMiningReward);
                }
                Ok(())
            }
            TxInput::Transfer {
                amount,
                fee,
                public_key,
                signature,
                ..
            } => {
                let output_total: u64 = self.output.values().sum();
                // Validation enforces only the uncongested minimum fee — relay-time
                // congestion pricing is not part of the consensus check.
                let min_fee = Self::compute_fee(&self.output, 0, consensus);
                if *fee < min_fee {
                    return Err(TransactionError::FeeBelowMinimum);
                }
                if *amount != output_total + fee {
                    return Err(TransactionError::InvalidOutputValues);
                }
                if !crypto::verify(public_key, &self.output, signature) {
                    return Err(TransactionError::InvalidSignature);
                }
                Ok(())
            }
        }
    }

    /// Size in canonical-JSON bytes of this transaction's `to_json()` — used
    /// by mempool prioritization (fee-per-byte).
    pub fn wire_size(&self) -> usize {
        crypto::hash::canonical_json_string(&self.to_json()).len()
    }
}

/// Coins leaving `sender` net of any change routed back to them.
pub fn net_spend(tx: &Transaction, sender: &str) -> u64 {
    let spend = tx.input.amount();
    let change_back = tx.output.get(sender).copied().unwrap_or(0);
    spend.saturating_sub(change_back)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::block::Block;
    use crate::blockchain::economics::genesis_block;

    fn consensus() -> ConsensusConfig {
        ConsensusConfig::default()
    }

    #[test]
    fn transfer_round_trips_through_json() {
        let sender = Wallet::new();
        let tx =
            Transaction::new_transfer(&sender, 1_000_000_000, "recipient", 1_000, 0, &consensus())
                .unwrap();
        let restored = Transaction::from_json(tx.to_json()).unwrap();
        assert_eq!(tx, restored);
    }

    #[test]
    fn transfer_amount_equals_output_plus_fee() {
        let sender = Wallet::new();
        let tx =
            Transaction::new_transfer(&sender, 1_000_000_000, "recipient", 1_000, 0, &consensus())
                .unwrap();
        let output_total: u64 = tx.output.values().sum();
        assert_eq!(tx.input.amount(), output_total + tx.input.fee());
        assert!(tx.is_valid_transaction(&consensus()).is_ok());
    }

    #[test]
    fn zero_amount_is_rejected() {
        let sender = Wallet::new();
        let err = Transaction::new_transfer(&sender, 1_000, "recipient", 0, 0, &consensus())
            .unwrap_err();
        assert_eq!(err, TransactionError::AmountMustBePositive);
    }

    #[test]
    fn amount_exceeding_balance_is_rejected() {
        let sender = Wallet::new();
        let err = Transaction::new_transfer(&sender, 10, "recipient", 1_000, 0, &consensus())
            .unwrap_err();
        assert_eq!(err, TransactionError::AmountExceedsBalance);
    }

    #[test]
    fn fee_floor_rejects_zero_fee_and_accepts_minimum() {
        let sender = Wallet::new();
        let cfg = consensus();
        let mut output = BTreeMap::new();
        output.insert("r".to_string(), 1u64);
        output.insert(sender.address().to_string(), 99u64);
        let bad = Transaction {
            id: "deadbeef".to_string(),
            input: TxInput::Transfer {
                timestamp: 0,
                amount: 100,
                address: sender.address().to_string(),
                public_key: sender.public_key_hex(),
                signature: sender.sign(&output),
                fee: 0,
            },
            output: output.clone(),
        };
        assert_eq!(
            bad.is_valid_transaction(&cfg).unwrap_err(),
            TransactionError::FeeBelowMinimum
        );

        let fee = cfg.min_absolute_fee;
        let mut good = bad.clone();
        if let TxInput::Transfer { amount, fee: f, .. } = &mut good.input {
            *f = fee;
            *amount = 100 + fee;
        }
        if let TxInput::Transfer { signature, .. } = &mut good.input {
            *signature = sender.sign(&good.output);
        }
        assert!(good.is_valid_transaction(&cfg).is_ok());
    }

    #[test]
    fn reward_transaction_requires_positive_outputs() {
        let miner = Wallet::new();
        let tx = Transaction::reward_transaction(&miner, 0, None);
        assert_eq!(
            tx.is_valid_transaction(&consensus()).unwrap_err(),
            TransactionError::InvalidMiningReward
        );
    }

    #[test]
    fn genesis_transaction_is_always_valid() {
        let block: Block = genesis_block(&consensus());
        let genesis_tx = &block.data[0];
        assert!(genesis_tx.is_valid_transaction(&consensus()).is_ok());
    }

    #[test]
    fn net_spend_subtracts_change_back_to_sender() {
        let sender = Wallet::new();
        let tx =
            Transaction::new_transfer(&sender, 1_000_000_000, "recipient", 1_000, 0, &consensus())
                .unwrap();
        let change = tx.output[sender.address()];
        assert_eq!(net_spend(&tx, sender.address()), tx.input.amount() - change);
    }
}
