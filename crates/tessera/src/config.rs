//! Node configuration.

use std::time::Duration;

use tessera_net::DedupConfig;

/// Configuration for a [`Node`](crate::Node).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Leading zero hex digits required of every record hash. `0` disables
    /// the work requirement; hashes are still checked.
    pub pow_difficulty: u32,
    /// How far into the future a record timestamp may lie.
    pub max_clock_skew: Duration,
    /// How long `get` waits for a peer to answer.
    pub get_timeout: Duration,
    /// Whether accepted records are forwarded to other peers.
    pub relay: bool,
    /// Inbound message deduplication.
    pub dedup: DedupConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            pow_difficulty: 0,
            max_clock_skew: Duration::from_secs(30),
            get_timeout: Duration::from_secs(5),
            relay: true,
            dedup: DedupConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn with_pow_difficulty(mut self, difficulty: u32) -> Self {
        self.pow_difficulty = difficulty;
        self
    }

    pub fn with_max_clock_skew(mut self, skew: Duration) -> Self {
        self.max_clock_skew = skew;
        self
    }

    pub fn with_get_timeout(mut self, timeout: Duration) -> Self {
        self.get_timeout = timeout;
        self
    }

    pub fn with_relay(mut self, relay: bool) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    /// Clock skew in milliseconds, as compared against record timestamps.
    pub(crate) fn max_clock_skew_millis(&self) -> i64 {
        i64::try_from(self.max_clock_skew.as_millis()).unwrap_or(i64::MAX)
    }
}
