//! Wire messages: a flat, type-tagged JSON envelope per frame.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blockchain::Block;
use crate::transaction::Transaction;

pub const PROTOCOL_VERSION: &str = "1";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "HELLO")]
    Hello { address: String, version: String },
    #[serde(rename = "PEERS")]
    Peers { addresses: Vec<String> },
    #[serde(rename = "REQUEST_CHAIN")]
    RequestChain { start: u64 },
    #[serde(rename = "CHAIN_SEGMENT")]
    ChainSegment { blocks: Vec<Block> },
    #[serde(rename = "BLOCK")]
    Block { block: Block },
    #[serde(rename = "TRANSACTION")]
    Transaction { transaction: Transaction },
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PONG")]
    Pong,
}

impl Message {
    pub fn hello(address: String) -> Self {
        Message::Hello {
            address,
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> Result<Message, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::from)
    }
}
