//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: signed records from a fixed
//! keypair, and [`TestMesh`], a cluster of nodes on one in-memory network
//! sharing a [`ManualClock`].

use std::sync::Arc;

use serde_json::Value;
use tessera::identity::{Argon2Params, KeypairIdentity};
use tessera::net::{DedupConfig, Inbound, MemoryNetwork, MemoryTransport, PeerDescriptor, PeerId};
use tessera::store::MemoryStore;
use tessera::{ManualClock, Node, NodeConfig};
use tessera_core::{frozen_key, Keypair, RecordBuilder, VerificationRecord};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::warn;

/// Fixed start time for mesh clocks (2025-01-14T16:00:00Z).
pub const EPOCH: i64 = 1_736_870_400_000;

/// The node type every mesh is built from.
pub type TestNode = Node<MemoryStore, MemoryTransport, KeypairIdentity>;

/// Install a test-writer subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A test fixture with a keypair and memory store.
pub struct TestFixture {
    pub keypair: Keypair,
    pub store: MemoryStore,
}

impl TestFixture {
    /// Create a new test fixture with a random keypair.
    pub fn new() -> Self {
        Self {
            keypair: Keypair::generate(),
            store: MemoryStore::new(),
        }
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: Keypair::from_seed(&seed),
            store: MemoryStore::new(),
        }
    }

    pub fn address(&self) -> tessera_core::Address {
        self.keypair.address()
    }

    /// A signed record under `key`.
    pub fn make_record(&self, key: &str, value: Value, timestamp: i64) -> VerificationRecord {
        RecordBuilder::new(key, value, self.keypair.address())
            .timestamp(timestamp)
            .sign(&self.keypair)
    }

    /// A signed claim on `==name`.
    pub fn make_claim(&self, name: &str, timestamp: i64) -> VerificationRecord {
        self.make_record(
            &frozen_key(name),
            serde_json::json!({ "owner": self.keypair.address().to_hex() }),
            timestamp,
        )
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Create multiple test fixtures for multi-party tests.
pub fn multi_party_fixtures(count: usize) -> Vec<TestFixture> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            TestFixture::with_seed(seed)
        })
        .collect()
}

/// Node configuration suited to tests: short timeouts, small caches.
pub fn test_config() -> NodeConfig {
    NodeConfig::default()
        .with_get_timeout(std::time::Duration::from_millis(200))
        .with_dedup(DedupConfig {
            max_age: std::time::Duration::from_secs(60),
            max_entries: 1_000,
        })
}

/// Several nodes on one in-memory network.
///
/// Inbound traffic is not processed until [`TestMesh::pump`] runs (or the
/// loops are handed to the runtime with [`TestMesh::spawn_inbound_loops`]),
/// so tests decide exactly when messages are delivered.
pub struct TestMesh {
    pub network: Arc<MemoryNetwork>,
    pub clock: ManualClock,
    nodes: Vec<Arc<TestNode>>,
    inboxes: Vec<UnboundedReceiver<Inbound>>,
}

impl TestMesh {
    /// `count` server nodes with deterministic keys and no links.
    pub fn new(count: usize) -> Self {
        Self::with_config(count, test_config())
    }

    pub fn with_config(count: usize, config: NodeConfig) -> Self {
        let network = MemoryNetwork::new();
        let clock = ManualClock::new(EPOCH);
        let mut nodes = Vec::with_capacity(count);
        let mut inboxes = Vec::with_capacity(count);

        for i in 0..count {
            let descriptor = PeerDescriptor::server(Self::peer_id(i));
            let (transport, inbox) = network.create_transport(descriptor);

            let mut seed = [0u8; 32];
            seed[0] = i as u8 + 1;
            let identity = KeypairIdentity::with_keypair(Keypair::from_seed(&seed))
                .with_kdf(Argon2Params::light());

            let node = Node::new(MemoryStore::new(), transport, identity, config.clone())
                .with_clock(Arc::new(clock.clone()));
            nodes.push(Arc::new(node));
            inboxes.push(inbox);
        }

        Self {
            network,
            clock,
            nodes,
            inboxes,
        }
    }

    /// The peer id of node `i`.
    pub fn peer_id(i: usize) -> PeerId {
        PeerId::new(format!("node-{i}"))
    }

    pub fn node(&self, i: usize) -> &Arc<TestNode> {
        &self.nodes[i]
    }

    pub fn nodes(&self) -> &[Arc<TestNode>] {
        &self.nodes
    }

    /// Link nodes `a` and `b`.
    pub fn connect(&self, a: usize, b: usize) {
        if let Err(e) = self.network.connect(&Self::peer_id(a), &Self::peer_id(b)) {
            panic!("connect node-{a} and node-{b}: {e}");
        }
    }

    /// Link every pair of nodes.
    pub fn connect_all(&self) {
        for a in 0..self.nodes.len() {
            for b in a + 1..self.nodes.len() {
                self.connect(a, b);
            }
        }
    }

    /// Cut the link between `a` and `b`.
    pub fn disconnect(&self, a: usize, b: usize) {
        self.network.disconnect(&Self::peer_id(a), &Self::peer_id(b));
    }

    /// Deliver queued traffic until no node has anything left to process.
    /// Returns how many inbound items were handled.
    pub async fn pump(&mut self) -> usize {
        let mut handled = 0;
        let mut idle_rounds = 0;
        while idle_rounds < 3 {
            let mut progressed = false;
            for (node, inbox) in self.nodes.iter().zip(self.inboxes.iter_mut()) {
                while let Ok(inbound) = inbox.try_recv() {
                    progressed = true;
                    handled += 1;
                    let outcome = match inbound {
                        Inbound::Message { connection, frame } => {
                            node.on_client_message(&frame, connection).await
                        }
                        Inbound::Peer(event) => node.on_peer_event(event).await,
                    };
                    if let Err(e) = outcome {
                        warn!(error = %e, "inbound handling failed");
                    }
                }
            }
            if progressed {
                idle_rounds = 0;
            } else {
                idle_rounds += 1;
                tokio::task::yield_now().await;
            }
        }
        handled
    }

    /// Hand every inbox to a background task. Later calls to
    /// [`TestMesh::pump`] find nothing to do.
    pub fn spawn_inbound_loops(&mut self) -> Vec<JoinHandle<()>> {
        let inboxes: Vec<_> = self.inboxes.drain(..).collect();
        self.nodes
            .iter()
            .zip(inboxes)
            .map(|(node, inbox)| node.spawn_inbound_loop(inbox))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera::identity::Identity;

    #[test]
    fn test_fixture_records_verify() {
        let fixture = TestFixture::new();
        let record = fixture.make_record("k", serde_json::json!(1), EPOCH);
        assert!(record.verify_signature().is_ok());

        let claim = fixture.make_claim("alice", EPOCH);
        assert!(claim.is_frozen());
    }

    #[test]
    fn test_multi_party() {
        let parties = multi_party_fixtures(3);
        let addresses: Vec<_> = parties.iter().map(|p| p.address()).collect();
        assert_ne!(addresses[0], addresses[1]);
        assert_ne!(addresses[1], addresses[2]);
        assert_ne!(addresses[0], addresses[2]);
    }

    #[tokio::test]
    async fn test_mesh_handshake() {
        let mut mesh = TestMesh::new(2);
        mesh.connect(0, 1);
        // connected x2, ping x2, pong x2
        assert_eq!(mesh.pump().await, 6);
        assert_eq!(mesh.pump().await, 0);

        let a = mesh.node(0).identity().address().unwrap();
        let b = mesh.node(1).identity().address().unwrap();
        assert_ne!(a, b);
    }
}
