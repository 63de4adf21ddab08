//! The identity adapter.
//!
//! The node never touches key material directly: it asks its identity for
//! the current address, for signatures over record hashes, and to seal or
//! open the account envelope at sign-up and sign-in.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tessera_core::{Address, Digest, Keypair, Signature, VerificationRecord};
use tracing::debug;

use crate::crypto::Argon2Params;
use crate::envelope::AccountEnvelope;
use crate::error::{IdentityError, Result};

/// Key management for a node.
#[async_trait]
pub trait Identity: Send + Sync {
    /// Prepare the identity. Must be idempotent.
    async fn init(&self) -> Result<()>;

    /// Address records are currently written under.
    fn address(&self) -> Result<Address>;

    /// Sign a record hash with the current key.
    fn sign_data(&self, hash: &Digest) -> Result<Signature>;

    /// Check a record's signature against its own address.
    fn verify_signature(&self, record: &VerificationRecord) -> bool {
        record.verify_signature().is_ok()
    }

    /// Seal the current key under `password`.
    async fn encrypt_account(&self, password: &str) -> Result<AccountEnvelope>;

    /// Open `envelope` with `password` and make its key current.
    async fn decrypt_account(&self, envelope: &AccountEnvelope, password: &str) -> Result<Address>;

    /// Drop the current key in favour of a fresh anonymous one.
    fn sign_out(&self) -> Result<Address>;
}

/// An [`Identity`] backed by a single in-memory Ed25519 keypair.
///
/// `init` generates a keypair if none was supplied.
pub struct KeypairIdentity {
    keypair: RwLock<Option<Keypair>>,
    kdf: Argon2Params,
}

impl KeypairIdentity {
    /// Create an identity that generates its key on `init`.
    pub fn new() -> Self {
        Self {
            keypair: RwLock::new(None),
            kdf: Argon2Params::default(),
        }
    }

    /// Create an identity that starts with `keypair`.
    pub fn with_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: RwLock::new(Some(keypair)),
            kdf: Argon2Params::default(),
        }
    }

    /// Override the password derivation cost.
    pub fn with_kdf(mut self, kdf: Argon2Params) -> Self {
        self.kdf = kdf;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Keypair>> {
        self.keypair.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Keypair>> {
        self.keypair.write().unwrap_or_else(|e| e.into_inner())
    }

    fn current(&self) -> Result<Keypair> {
        self.read().clone().ok_or(IdentityError::NotInitialized)
    }
}

impl Default for KeypairIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Identity for KeypairIdentity {
    async fn init(&self) -> Result<()> {
        let mut slot = self.write();
        if slot.is_none() {
            let keypair = Keypair::generate();
            debug!(address = %keypair.address(), "generated identity");
            *slot = Some(keypair);
        }
        Ok(())
    }

    fn address(&self) -> Result<Address> {
        self.read()
            .as_ref()
            .map(Keypair::address)
            .ok_or(IdentityError::NotInitialized)
    }

    fn sign_data(&self, hash: &Digest) -> Result<Signature> {
        self.read()
            .as_ref()
            .map(|keypair| keypair.sign(hash.as_bytes()))
            .ok_or(IdentityError::NotInitialized)
    }

    async fn encrypt_account(&self, password: &str) -> Result<AccountEnvelope> {
        let keypair = self.current()?;
        let password = password.to_owned();
        let kdf = self.kdf;
        tokio::task::spawn_blocking(move || AccountEnvelope::seal(&keypair, &password, kdf))
            .await
            .map_err(|e| IdentityError::Task(e.to_string()))?
    }

    async fn decrypt_account(&self, envelope: &AccountEnvelope, password: &str) -> Result<Address> {
        let sealed = envelope.clone();
        let password = password.to_owned();
        let keypair = tokio::task::spawn_blocking(move || sealed.open(&password))
            .await
            .map_err(|e| IdentityError::Task(e.to_string()))??;

        let address = keypair.address();
        *self.write() = Some(keypair);
        debug!(%address, "account key installed");
        Ok(address)
    }

    fn sign_out(&self) -> Result<Address> {
        let keypair = Keypair::generate();
        let address = keypair.address();
        *self.write() = Some(keypair);
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_core::RecordBuilder;

    fn light() -> KeypairIdentity {
        KeypairIdentity::new().with_kdf(Argon2Params::light())
    }

    #[tokio::test]
    async fn test_uninitialized() {
        let identity = light();
        assert!(matches!(identity.address(), Err(IdentityError::NotInitialized)));
        assert!(identity.sign_data(&Digest::ZERO).is_err());
        assert!(identity.encrypt_account("pw").await.is_err());
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let identity = light();
        identity.init().await.unwrap();
        let first = identity.address().unwrap();
        identity.init().await.unwrap();
        assert_eq!(identity.address().unwrap(), first);
    }

    #[tokio::test]
    async fn test_signed_record_verifies() {
        let identity = KeypairIdentity::with_keypair(Keypair::from_seed(&[9u8; 32]));
        let unsigned = RecordBuilder::new("k", json!(1), identity.address().unwrap())
            .timestamp(1_000)
            .build();
        let signature = identity.sign_data(unsigned.hash()).unwrap();
        let record = unsigned.with_signature(signature);

        assert!(identity.verify_signature(&record));

        let mut forged = record.clone();
        forged.address = Keypair::generate().address();
        assert!(!identity.verify_signature(&forged));
    }

    #[tokio::test]
    async fn test_account_moves_between_identities() {
        let alice = light();
        alice.init().await.unwrap();
        let envelope = alice.encrypt_account("s3cret").await.unwrap();

        let device = light();
        device.init().await.unwrap();
        assert_ne!(device.address().unwrap(), alice.address().unwrap());

        let address = device.decrypt_account(&envelope, "s3cret").await.unwrap();
        assert_eq!(address, alice.address().unwrap());
        assert_eq!(device.address().unwrap(), address);
    }

    #[tokio::test]
    async fn test_wrong_password_keeps_key() {
        let alice = light();
        alice.init().await.unwrap();
        let envelope = alice.encrypt_account("s3cret").await.unwrap();

        let device = light();
        device.init().await.unwrap();
        let before = device.address().unwrap();

        let result = device.decrypt_account(&envelope, "guess").await;
        assert!(matches!(result, Err(IdentityError::WrongPassword)));
        assert_eq!(device.address().unwrap(), before);
    }

    #[tokio::test]
    async fn test_sign_out_rotates_key() {
        let identity = light();
        identity.init().await.unwrap();
        let before = identity.address().unwrap();
        let after = identity.sign_out().unwrap();
        assert_ne!(before, after);
        assert_eq!(identity.address().unwrap(), after);
    }
}
