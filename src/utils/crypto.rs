use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::KeyPair as _;
use ring::signature::{EcdsaKeyPair, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING};

use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length in bytes of the account identifier embedded in an address
const ADDRESS_BYTES: usize = 20;

/// Hashing and signature primitives consumed by the ledger, consensus and
/// transaction code. Ledger hashing only relies on `hash` being
/// deterministic and producing fixed-length lowercase hex.
pub trait CryptoProvider: Send + Sync {
    fn hash(&self, data: &str) -> String;

    fn sign(&self, data: &[u8], private_key: &[u8]) -> Result<Vec<u8>>;

    fn verify(&self, data: &[u8], signature: &[u8], public_key: &[u8]) -> bool;
}

/// SHA-256 hashing with ECDSA P-256 signatures (PKCS#8 private keys)
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Crypto;

impl CryptoProvider for Sha256Crypto {
    fn hash(&self, data: &str) -> String {
        HEXLOWER.encode(&sha256_digest(data.as_bytes()))
    }

    fn sign(&self, data: &[u8], private_key: &[u8]) -> Result<Vec<u8>> {
        ecdsa_p256_sha256_sign_digest(private_key, data)
    }

    fn verify(&self, data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        ecdsa_p256_sha256_sign_verify(public_key, signature, data)
    }
}

/// A freshly generated signing key with its public half
#[derive(Clone)]
pub struct KeyPair {
    pub pkcs8: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl KeyPair {
    pub fn generate() -> Result<KeyPair> {
        KeyPair::from_pkcs8(&new_key_pair()?)
    }

    /// Rebuild a key pair from its PKCS#8 document
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<KeyPair> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
            .map_err(|e| {
                BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
            })?;
        let public_key = key_pair.public_key().as_ref().to_vec();
        Ok(KeyPair {
            pkcs8: pkcs8.to_vec(),
            public_key,
        })
    }

    pub fn address(&self) -> String {
        address_from_public_key(&self.public_key)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &HEXLOWER.encode(&self.public_key))
            .finish_non_exhaustive()
    }
}

pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BlockchainError::Crypto(format!("System time error: {e}")))?
        .as_millis();

    // Ensure the timestamp fits in i64
    if duration > i64::MAX as u128 {
        return Err(BlockchainError::Crypto("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

/// `0x` followed by the hex of the last 20 bytes of SHA-256(public key)
pub fn address_from_public_key(public_key: &[u8]) -> String {
    let digest = sha256_digest(public_key);
    format!("0x{}", HEXLOWER.encode(&digest[digest.len() - ADDRESS_BYTES..]))
}

/// Addresses are `0x` followed by exactly 40 hex characters
pub fn validate_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(body) => body.len() == ADDRESS_BYTES * 2 && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to generate ECDSA key pair: {e}")))?
        .as_ref()
        .to_vec();
    Ok(pkcs8)
}

pub fn ecdsa_p256_sha256_sign_digest(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &rng)
        .map_err(|e| {
            BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
        })?;
    let signature = key_pair
        .sign(&rng, message)
        .map_err(|e| BlockchainError::Crypto(format!("Failed to sign message: {e}")))?
        .as_ref()
        .to_vec();
    Ok(signature)
}

pub fn ecdsa_p256_sha256_sign_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let peer_public_key =
        ring::signature::UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public_key);
    peer_public_key.verify(message, signature).is_ok()
}
