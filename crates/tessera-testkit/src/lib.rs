//! # Tessera Testkit
//!
//! Testing utilities for Tessera.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Golden vectors**: Known records whose digests every replica must agree on
//! - **Generators**: Proptest strategies for records and CRDT operations
//! - **Fixtures**: Signed-record helpers and [`TestMesh`], a cluster of nodes
//!   on one in-memory network with a shared manual clock
//!
//! ## Golden Vectors
//!
//! ```rust
//! use tessera_testkit::vectors::{all_vectors, generate_record_from_vector};
//!
//! for vector in all_vectors() {
//!     let record = generate_record_from_vector(&vector);
//!     println!("{}: {}", vector.name, record.hash.to_hex());
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tessera_testkit::generators::{counter_op, counters, scripts};
//!
//! proptest! {
//!     #[test]
//!     fn counters_agree(s in scripts(counter_op(), 2)) {
//!         let mut replicas = counters(s);
//!         let changes = replicas[1].changes();
//!         replicas[0].merge_changes(changes);
//!         // ...
//!     }
//! }
//! ```
//!
//! ## Meshes
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tessera::store::Store;
//! use tessera_testkit::TestMesh;
//!
//! # async fn example() -> tessera::Result<()> {
//! let mut mesh = TestMesh::new(2);
//! mesh.connect_all();
//! mesh.pump().await;
//!
//! mesh.node(0).put("k", json!(1)).await?;
//! mesh.pump().await;
//! assert!(mesh.node(1).store().get("k").await?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{init_tracing, multi_party_fixtures, test_config, TestFixture, TestMesh, TestNode, EPOCH};
pub use generators::{record_from_params, RecordParams};
pub use vectors::{all_vectors, generate_record_from_vector, verify_all_vectors, GoldenVector};
