//! A wallet is a keypair plus the chain-scan balance derivation. It holds no
//! UTXO set of its own: the balance is recomputed from the ledger on demand.

use serde::Serialize;

use crate::blockchain::block::Block;
use crate::crypto::{CryptoError, KeyPair, SignaturePair};

pub struct Wallet {
    keypair: KeyPair,
    address: String,
}

impl Wallet {
    pub fn new() -> Self {
        let keypair = KeyPair::generate();
        let address = keypair.address();
        Self { keypair, address }
    }

    pub fn from_private_key_hex(hex_scalar: &str) -> Result<Self, CryptoError> {
        let keypair = KeyPair::from_private_key_hex(hex_scalar)?;
        let address = keypair.address();
        Ok(Self { keypair, address })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key_hex()
    }

    pub fn sign<T: Serialize>(&self, data: &T) -> SignaturePair {
        self.keypair.sign(data)
    }

    /// Sum of every output paid to `address` across `blocks`, minus every
    /// amount spent by a transaction whose input address is `address`.
    /// Transactions are walked in chain order; no transaction is applied
    /// twice.
    pub fn calculate_balance(blocks: &[Block], address: &str) -> i64 {
        let mut balance: i64 = 0;
        for block in blocks {
            for tx in &block.data {
                if tx.input.address() == address {
                    balance -= tx.input.amount() as i64;
                }
                if let Some(amount) = tx.output.get(address) {
                    balance += *amount as i64;
                }
            }
        }
        balance
    }

    pub fn balance(&self, blocks: &[Block]) -> i64 {
        Self::calculate_balance(blocks, &self.address)
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}
