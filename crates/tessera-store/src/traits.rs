//! Store trait: the abstract interface for record persistence.
//!
//! The store is the single source of truth for a node. The verification
//! pipeline and conflict engine re-read it before every decision.

use async_trait::async_trait;
use tessera_core::VerificationRecord;

use crate::error::Result;

/// The Store trait: async key/value persistence of verification records.
///
/// Implementations must accept calls before [`Store::init`] has completed,
/// waiting internally for readiness rather than failing.
#[async_trait]
pub trait Store: Send + Sync {
    /// Prepare the backend (open files, run migrations). Idempotent.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Store `record` under `key`, replacing any previous record.
    async fn put(&self, key: &str, record: &VerificationRecord) -> Result<()>;

    /// Fetch the record stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<VerificationRecord>>;

    /// All stored keys starting with `prefix`, in ascending order.
    async fn query(&self, prefix: &str) -> Result<Vec<String>>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for std::sync::Arc<S> {
    async fn init(&self) -> Result<()> {
        (**self).init().await
    }

    async fn put(&self, key: &str, record: &VerificationRecord) -> Result<()> {
        (**self).put(key, record).await
    }

    async fn get(&self, key: &str) -> Result<Option<VerificationRecord>> {
        (**self).get(key).await
    }

    async fn query(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).query(prefix).await
    }
}
