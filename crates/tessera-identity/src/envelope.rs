//! Encrypted account envelope.
//!
//! An account is a signing keypair sealed under the user's password. The
//! envelope is plain JSON so it can travel as the value of a frozen
//! `==username` record; only the holder of the password can open it.
//!
//! The writer's address is bound as associated data, so an envelope copied
//! under another address fails to open.

use serde::{Deserialize, Serialize};
use tessera_core::{Address, Keypair};
use zeroize::Zeroize;

use crate::crypto::{Argon2Params, EncryptionKey, EncryptionNonce, Salt, SALT_LEN};
use crate::error::{IdentityError, Result};

/// Current envelope format.
pub const ENVELOPE_VERSION: u8 = 1;

/// A password-sealed account keypair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEnvelope {
    /// Format version.
    pub version: u8,

    /// Address of the sealed keypair.
    pub address: Address,

    /// Key derivation parameters used at seal time.
    pub kdf: Argon2Params,

    #[serde(with = "b64")]
    pub salt: Vec<u8>,

    #[serde(with = "b64")]
    pub nonce: Vec<u8>,

    /// Sealed seed, including the authentication tag.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl AccountEnvelope {
    /// Seal `keypair` under `password`.
    pub fn seal(keypair: &Keypair, password: &str, kdf: Argon2Params) -> Result<Self> {
        let address = keypair.address();
        let salt = Salt::generate();
        let nonce = EncryptionNonce::generate();
        let key = EncryptionKey::derive(password, &salt, &kdf)?;

        let mut seed = keypair.seed();
        let sealed = key.encrypt(&seed, address.as_bytes(), &nonce);
        seed.zeroize();

        Ok(Self {
            version: ENVELOPE_VERSION,
            address,
            kdf,
            salt: salt.as_bytes().to_vec(),
            nonce: nonce.as_bytes().to_vec(),
            ciphertext: sealed?,
        })
    }

    /// Open the envelope with `password`, recovering the keypair.
    pub fn open(&self, password: &str) -> Result<Keypair> {
        if self.version != ENVELOPE_VERSION {
            return Err(IdentityError::UnsupportedVersion(self.version));
        }
        let salt: [u8; SALT_LEN] = self
            .salt
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::MalformedEnvelope("bad salt length".into()))?;
        let nonce: [u8; 12] = self
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::MalformedEnvelope("bad nonce length".into()))?;

        let key = EncryptionKey::derive(password, &Salt(salt), &self.kdf)?;
        let mut plaintext = key.decrypt(&self.ciphertext, self.address.as_bytes(), &EncryptionNonce(nonce))?;

        let seed: std::result::Result<[u8; 32], _> = plaintext.as_slice().try_into();
        plaintext.zeroize();
        let mut seed =
            seed.map_err(|_| IdentityError::MalformedEnvelope("bad seed length".into()))?;
        let keypair = Keypair::from_seed(&seed);
        seed.zeroize();

        if keypair.address() != self.address {
            return Err(IdentityError::MalformedEnvelope(
                "sealed key does not match address".into(),
            ));
        }
        Ok(keypair)
    }

    /// Encode as a JSON value for use as a record payload.
    pub fn to_json(&self) -> serde_json::Value {
        // Every field serializes to a string, number or map.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Decode from a record payload.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        Self::deserialize(value).map_err(|e| IdentityError::MalformedEnvelope(e.to_string()))
    }
}

mod b64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use tessera_core::codec;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&codec::to_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        codec::from_base64(&s).map_err(serde::de::Error::custom)
    }
}
