//! # Tessera Identity
//!
//! The identity adapter and its reference implementation.
//!
//! ## Overview
//!
//! A node signs every record it writes. The [`Identity`] trait hides where
//! the signing key lives; [`KeypairIdentity`] keeps one Ed25519 keypair in
//! memory.
//!
//! ## Accounts
//!
//! Signing up seals the current keypair into an [`AccountEnvelope`]:
//!
//! 1. **Key**: Argon2id stretches the password with a random salt
//! 2. **Seal**: ChaCha20-Poly1305 encrypts the 32-byte seed, binding the address as associated data
//!
//! The envelope is published as a frozen `==username` record, so signing in
//! on another device only needs the username and the password.

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod identity;

pub use crypto::{Argon2Params, EncryptionKey, EncryptionNonce, Salt};
pub use envelope::{AccountEnvelope, ENVELOPE_VERSION};
pub use error::{IdentityError, Result};
pub use identity::{Identity, KeypairIdentity};
