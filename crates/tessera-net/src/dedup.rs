//! Bounded recent-message cache.
//!
//! Gossip floods the same message id along many paths; the deduplicator
//! remembers ids seen within `max_age` so each is processed once. Memory is
//! bounded two ways: a hard `max_entries` cap (oldest evicted first) and a
//! lazy time-based sweep.
//!
//! At most one sweep task is outstanding at any time. It is armed by an
//! insert when none is pending and clears its own handle when it runs, so
//! the next insert re-arms it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::messages::MessageId;

/// Deduplicator tuning.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// How long an id is remembered after it was last seen.
    pub max_age: Duration,
    /// Hard cap on remembered ids.
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60),
            max_entries: 10_000,
        }
    }
}

#[derive(Default)]
struct DedupState {
    ids: RecentIds,
    sweep: Option<JoinHandle<()>>,
}

/// Ids in last-seen order. Every touch takes a fresh ticket, so the front of
/// `order` is always the least recently seen id.
#[derive(Default)]
struct RecentIds {
    /// id -> (last seen at, ticket)
    entries: HashMap<MessageId, (Instant, u64)>,
    /// ticket -> id
    order: BTreeMap<u64, MessageId>,
    next_ticket: u64,
}

impl RecentIds {
    /// Record a sighting at `now`. Returns the previous sighting, if any.
    fn touch(&mut self, id: &MessageId, now: Instant) -> Option<Instant> {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.order.insert(ticket, id.clone());
        match self.entries.insert(id.clone(), (now, ticket)) {
            Some((seen_at, old_ticket)) => {
                self.order.remove(&old_ticket);
                Some(seen_at)
            }
            None => None,
        }
    }

    fn seen_at(&self, id: &MessageId) -> Option<Instant> {
        self.entries.get(id).map(|(seen_at, _)| *seen_at)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn pop_oldest(&mut self) -> Option<(MessageId, Instant)> {
        let (_, id) = self.order.pop_first()?;
        let (seen_at, _) = self.entries.remove(&id)?;
        Some((id, seen_at))
    }

    fn oldest_seen_at(&self) -> Option<Instant> {
        let (_, id) = self.order.first_key_value()?;
        self.seen_at(id)
    }

    /// Drop the least recently seen ids until at most `keep` remain.
    fn evict_to(&mut self, keep: usize) -> usize {
        let mut evicted = 0;
        while self.len() > keep && self.pop_oldest().is_some() {
            evicted += 1;
        }
        evicted
    }

    /// Drop ids not seen within `max_age` of `now`.
    fn sweep_expired(&mut self, now: Instant, max_age: Duration) -> usize {
        let mut removed = 0;
        while self
            .oldest_seen_at()
            .is_some_and(|seen_at| now.duration_since(seen_at) >= max_age)
        {
            self.pop_oldest();
            removed += 1;
        }
        removed
    }
}

/// Recent-message cache keyed by [`MessageId`].
pub struct Deduplicator {
    config: DedupConfig,
    state: Arc<Mutex<DedupState>>,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(DedupState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DedupState> {
        // The state is a cache; a poisoned lock still holds usable data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `id` as seen. Returns `true` if it was already seen within
    /// `max_age` (a duplicate). Either way its last-seen time is refreshed.
    pub fn check_and_mark(&self, id: &MessageId) -> bool {
        let mut state = self.lock();
        // Taken under the lock so tickets and times advance together.
        let now = Instant::now();

        let duplicate = state
            .ids
            .touch(id, now)
            .is_some_and(|seen_at| now.duration_since(seen_at) < self.config.max_age);

        if state.ids.len() > self.config.max_entries {
            let evicted = state.ids.evict_to(self.config.max_entries);
            debug!(evicted, "dedup cache over capacity");
        }
        self.arm_sweep(&mut state);
        duplicate
    }

    /// Check without marking.
    pub fn contains(&self, id: &MessageId) -> bool {
        let state = self.lock();
        state
            .ids
            .seen_at(id)
            .is_some_and(|seen_at| seen_at.elapsed() < self.config.max_age)
    }

    /// Drop every id not seen within `max_age`. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.lock().ids.sweep_expired(Instant::now(), self.config.max_age)
    }

    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a sweep task is currently scheduled.
    pub fn sweep_pending(&self) -> bool {
        self.lock()
            .sweep
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn arm_sweep(&self, state: &mut DedupState) {
        if state.sweep.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        // Without a runtime only the size cap and manual sweeps apply.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let shared = Arc::clone(&self.state);
        let max_age = self.config.max_age;
        state.sweep = Some(runtime.spawn(async move {
            tokio::time::sleep(max_age).await;
            let mut state = shared.lock().unwrap_or_else(|e| e.into_inner());
            let removed = state.ids.sweep_expired(Instant::now(), max_age);
            state.sweep = None;
            debug!(removed, remaining = state.ids.len(), "dedup sweep");
        }));
    }
}

impl Drop for Deduplicator {
    fn drop(&mut self) {
        if let Some(handle) = self.lock().sweep.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MessageId {
        MessageId::new(s)
    }

    #[test]
    fn test_first_sight_then_duplicate() {
        let dedup = Deduplicator::new(DedupConfig::default());
        assert!(!dedup.check_and_mark(&id("a")));
        assert!(dedup.check_and_mark(&id("a")));
        assert!(dedup.check_and_mark(&id("a")));
        assert!(!dedup.check_and_mark(&id("b")));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_works_without_runtime() {
        let dedup = Deduplicator::new(DedupConfig::default());
        dedup.check_and_mark(&id("a"));
        assert!(!dedup.sweep_pending());
        assert_eq!(dedup.sweep(), 0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let dedup = Deduplicator::new(DedupConfig {
            max_age: Duration::from_secs(60),
            max_entries: 2,
        });
        dedup.check_and_mark(&id("a"));
        std::thread::sleep(Duration::from_millis(2));
        dedup.check_and_mark(&id("b"));
        std::thread::sleep(Duration::from_millis(2));
        dedup.check_and_mark(&id("c"));

        assert_eq!(dedup.len(), 2);
        assert!(!dedup.contains(&id("a")));
        assert!(dedup.contains(&id("c")));
    }

    #[test]
    fn test_capacity_evicts_least_recently_seen() {
        let dedup = Deduplicator::new(DedupConfig {
            max_age: Duration::from_secs(60),
            max_entries: 2,
        });
        dedup.check_and_mark(&id("a"));
        dedup.check_and_mark(&id("b"));
        assert!(dedup.check_and_mark(&id("a")));
        dedup.check_and_mark(&id("c"));

        assert_eq!(dedup.len(), 2);
        assert!(dedup.contains(&id("a")));
        assert!(!dedup.contains(&id("b")));
        assert!(dedup.contains(&id("c")));
    }

    #[test]
    fn test_sustained_burst_stays_at_capacity() {
        let dedup = Deduplicator::new(DedupConfig {
            max_age: Duration::from_secs(60),
            max_entries: 100,
        });
        for i in 0..10_000 {
            assert!(!dedup.check_and_mark(&id(&i.to_string())));
        }
        assert_eq!(dedup.len(), 100);
        assert!(dedup.contains(&id("9999")));
        assert!(dedup.contains(&id("9900")));
        assert!(!dedup.contains(&id("9899")));
        // Order index and id map stay in step.
        let state = dedup.lock();
        assert_eq!(state.ids.order.len(), state.ids.entries.len());
    }

    #[test]
    fn test_manual_sweep_drops_expired() {
        let dedup = Deduplicator::new(DedupConfig {
            max_age: Duration::from_millis(10),
            max_entries: 100,
        });
        dedup.check_and_mark(&id("a"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!dedup.contains(&id("a")));
        assert_eq!(dedup.sweep(), 1);
        assert!(dedup.is_empty());
    }

    #[tokio::test]
    async fn test_single_outstanding_sweep() {
        let dedup = Deduplicator::new(DedupConfig {
            max_age: Duration::from_millis(30),
            max_entries: 100,
        });
        for i in 0..50 {
            dedup.check_and_mark(&id(&i.to_string()));
        }
        assert!(dedup.sweep_pending());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(dedup.is_empty());
        assert!(!dedup.sweep_pending());

        // Re-armed by the next insert.
        dedup.check_and_mark(&id("late"));
        assert!(dedup.sweep_pending());
    }

    #[tokio::test]
    async fn test_expired_id_is_new_again() {
        let dedup = Deduplicator::new(DedupConfig {
            max_age: Duration::from_millis(10),
            max_entries: 100,
        });
        assert!(!dedup.check_and_mark(&id("a")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!dedup.check_and_mark(&id("a")));
    }
}
