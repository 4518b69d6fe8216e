//! Utility functions and helpers
//!
//! This module contains the crypto provider contract, hashing and signing
//! helpers, and the bincode serialization layer.

pub mod crypto;
pub mod serialization;

pub use crypto::{
    address_from_public_key, current_timestamp, ecdsa_p256_sha256_sign_digest,
    ecdsa_p256_sha256_sign_verify, new_key_pair, sha256_digest, validate_address,
    CryptoProvider, KeyPair, Sha256Crypto,
};

pub use serialization::{deserialize, serialize};
