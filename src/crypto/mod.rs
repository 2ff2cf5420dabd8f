pub mod hash;
pub mod keys;

pub use hash::{hash, hex_to_binary};
pub use keys::{derive_address, verify, CryptoError, KeyPair, SignaturePair};
