//! Network module: wire protocol, the P2P node, and the periodic sync
//! scheduler.

pub mod node;
pub mod protocol;
pub mod sync;

pub use node::{Node, NetworkError, SyncObserver};
pub use protocol::{Message, ProtocolError};
pub use sync::SyncScheduler;
