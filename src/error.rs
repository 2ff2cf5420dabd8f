use thiserror::Error;

use crate::blockchain::{BlockError, ChainError};
use crate::config::ConfigError;
use crate::network::ProtocolError;
use crate::transaction::pool::PoolError;
use crate::transaction::TransactionError;

/// Crate-wide error kind. Each variant corresponds to one of the error
/// taxonomy entries the node's recovery logic branches on: transport and
/// protocol failures are handled locally (reconnect / drop-the-frame) and
/// never reach a caller, while the rest surface up to whoever called in.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("invalid transaction: {0}")]
    Transaction(#[from] TransactionError),

    #[error("invalid block: {0}")]
    Block(#[from] BlockError),

    #[error("invalid chain: {0}")]
    Chain(#[from] ChainError),

    #[error("mempool rejected transaction: {0}")]
    Pool(#[from] PoolError),

    #[error("cannot replace chain: {0}")]
    ReplaceRejected(String),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
