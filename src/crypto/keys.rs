//! secp256k1 keypairs, ECDSA signing/verification, and address derivation.

use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::hash::canonical_json_string;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid signature encoding")]
    InvalidSignature,
}

/// A transaction signature, carried over the wire as a pair of big integers
/// rendered as lowercase hex strings — matching the arbitrary-precision
/// `(r, s)` tuple the original signer produces, without truncating either
/// half to a fixed machine width.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePair {
    pub r: String,
    pub s: String,
}

impl SignaturePair {
    fn from_signature(sig: &Signature) -> Self {
        let bytes = sig.to_bytes();
        let r = BigUint::from_bytes_be(&bytes[..32]);
        let s = BigUint::from_bytes_be(&bytes[32..]);
        Self {
            r: r.to_str_radix(16),
            s: s.to_str_radix(16),
        }
    }

    fn to_signature(&self) -> Result<Signature, CryptoError> {
        let r = BigUint::parse_bytes(self.r.as_bytes(), 16)
            .ok_or(CryptoError::InvalidSignature)?;
        let s = BigUint::parse_bytes(self.s.as_bytes(), 16)
            .ok_or(CryptoError::InvalidSignature)?;
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&to_fixed_32(&r));
        bytes[32..].copy_from_slice(&to_fixed_32(&s));
        Signature::from_slice(&bytes).map_err(|_| CryptoError::InvalidSignature)
    }
}

fn to_fixed_32(n: &BigUint) -> [u8; 32] {
    let bytes = n.to_bytes_be();
    let mut out = [0u8; 32];
    let start = 32usize.saturating_sub(bytes.len());
    out[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(32)..]);
    out
}

/// A wallet's keypair. The signing key never leaves this struct in
/// plaintext form for longer than necessary to produce a signature.
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        let verifying_key = *signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Import a raw hex-encoded scalar as a private key.
    pub fn from_private_key_hex(hex_scalar: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex_scalar.trim())
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        let verifying_key = *signing_key.verifying_key();
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Hex encoding of the uncompressed public key point (SEC1, 0x04 prefix).
    pub fn public_key_hex(&self) -> String {
        let point = self.verifying_key.to_encoded_point(false);
        hex::encode(point.as_bytes())
    }

    /// SHA-256 of the uncompressed public key point, truncated to the first
    /// 40 hex characters.
    pub fn address(&self) -> String {
        derive_address(&self.public_key_hex())
    }

    /// Sign the canonical-JSON encoding of `data` with SHA-256/ECDSA.
    pub fn sign<T: Serialize>(&self, data: &T) -> SignaturePair {
        let message = canonical_json_string(data);
        let signature: Signature = self.signing_key.sign(message.as_bytes());
        SignaturePair::from_signature(&signature)
    }
}

/// SHA-256 of the uncompressed public-key point hex bytes, truncated to 40
/// hex characters (160 bits) — an Ethereum-style address length.
pub fn derive_address(public_key_hex: &str) -> String {
    let point_bytes = hex::decode(public_key_hex).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&point_bytes);
    let digest = hex::encode(hasher.finalize());
    digest[..40].to_string()
}

/// Verify a canonical-JSON-encoded payload against a hex-encoded uncompressed
/// public key and an (r, s) signature pair.
pub fn verify<T: Serialize>(public_key_hex: &str, data: &T, signature: &SignaturePair) -> bool {
    let Ok(point_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(&point_bytes) else {
        return false;
    };
    let Ok(sig) = signature.to_signature() else {
        return false;
    };
    let message = canonical_json_string(data);
    verifying_key.verify(message.as_bytes(), &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn address_is_forty_hex_chars() {
        let kp = KeyPair::generate();
        assert_eq!(kp.address().len(), 40);
        assert!(kp.address().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let kp = KeyPair::generate();
        let payload = json!({"recipient": 10u64, kp.address(): 90u64});
        let sig = kp.sign(&payload);
        assert!(verify(&kp.public_key_hex(), &payload, &sig));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let kp = KeyPair::generate();
        let payload = json!({"recipient": 10u64});
        let sig = kp.sign(&payload);
        let tampered = json!({"recipient": 11u64});
        assert!(!verify(&kp.public_key_hex(), &tampered, &sig));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let kp = KeyPair::generate();
        let other = KeyPair::generate();
        let payload = json!({"recipient": 10u64});
        let sig = kp.sign(&payload);
        assert!(!verify(&other.public_key_hex(), &payload, &sig));
    }

    #[test]
    fn import_from_hex_scalar_matches_original() {
        let kp = KeyPair::generate();
        let hex_scalar = hex::encode(kp.signing_key.to_bytes());
        let imported = KeyPair::from_private_key_hex(&hex_scalar).unwrap();
        assert_eq!(kp.address(), imported.address());
    }
}
