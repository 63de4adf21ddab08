//! # Tessera Store
//!
//! Storage abstraction for Tessera. Provides a trait-based interface for
//! record persistence with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! The store abstracts record storage behind the [`Store`] trait, allowing
//! the node to be storage-agnostic. The durable implementation is
//! [`SqliteStore`], with [`MemoryStore`] for testing.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tessera_store::{SqliteStore, Store};
//!
//! async fn example() {
//!     // Opened and migrated lazily on first use
//!     let store = SqliteStore::open("tessera.db");
//!     store.init().await.unwrap();
//!
//!     let keys = store.query("==").await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **One record per key**: `put` replaces; precedence is decided by the caller
//! - **Usable before init**: the first call of any kind opens the backend

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::Store;
