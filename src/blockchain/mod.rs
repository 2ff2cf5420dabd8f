pub mod block;
pub mod chain;
pub mod economics;

pub use block::{Block, BlockError};
pub use chain::{Chain, ChainError, Policy};
pub use economics::{block_reward, genesis_block};
