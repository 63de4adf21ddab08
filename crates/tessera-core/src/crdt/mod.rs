//! CRDT value engine.
//!
//! Every CRDT owns an append-only [`ChangeLog`] and derives its visible value
//! from it on read. State transfer is done by shipping the log itself;
//! merging is keyed by `(actor, seq)` so it is commutative, associative and
//! idempotent.
//!
//! Sequence numbers come from a Lamport clock: a local operation takes
//! `max(seq seen) + 1`. That is strictly increasing per actor (never reused)
//! and also orders causally related operations across actors, which the List
//! and Map rely on.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CrdtError;
use crate::types::ActorId;

pub mod counter;
pub mod list;
pub mod map;

pub use counter::{Counter, CounterOp};
pub use list::{ElementId, List, ListChange, ListElement, ListOp};
pub use map::{Map, MapOp};

/// Which CRDT algebra a record's change log belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrdtKind {
    Counter,
    List,
    Map,
}

impl fmt::Display for CrdtKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CrdtKind::Counter => "counter",
            CrdtKind::List => "list",
            CrdtKind::Map => "map",
        })
    }
}

/// One element of a change log.
///
/// Serialized flat: `{"actor":"a","seq":3,"op":"ADD","value":5.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry<C> {
    pub actor: ActorId,
    pub seq: u64,
    #[serde(flatten)]
    pub change: C,
}

/// Append-only log of changes, indexed by `(actor, seq)`.
#[derive(Debug, Clone)]
pub struct ChangeLog<C> {
    actor: ActorId,
    clock: u64,
    entries: BTreeMap<(ActorId, u64), C>,
}

impl<C: Clone> ChangeLog<C> {
    pub fn new(actor: ActorId) -> Self {
        Self {
            actor,
            clock: 0,
            entries: BTreeMap::new(),
        }
    }

    /// The local actor.
    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// Highest sequence number seen from any actor.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Sequence number the next local change will take, or `None` once
    /// the clock is exhausted.
    pub fn next_seq(&self) -> Option<u64> {
        self.clock.checked_add(1)
    }

    /// Append a local change.
    pub fn record(&mut self, change: C) -> Result<ChangeEntry<C>, CrdtError> {
        let seq = self.next_seq().ok_or(CrdtError::ClockExhausted)?;
        self.clock = seq;
        self.entries.insert((self.actor.clone(), seq), change.clone());
        Ok(ChangeEntry {
            actor: self.actor.clone(),
            seq,
            change,
        })
    }

    /// Insert entries not already present. Returns how many were new.
    ///
    /// Entries with a sequence number outside [`valid_seq`] are skipped;
    /// use [`validate_entries`] to reject such a log whole.
    pub fn merge<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = ChangeEntry<C>>,
    {
        let mut added = 0;
        for entry in entries {
            if !valid_seq(entry.seq) {
                continue;
            }
            self.clock = self.clock.max(entry.seq);
            let id = (entry.actor, entry.seq);
            if !self.entries.contains_key(&id) {
                self.entries.insert(id, entry.change);
                added += 1;
            }
        }
        added
    }

    /// The full history in `(actor, seq)` order.
    pub fn entries(&self) -> Vec<ChangeEntry<C>> {
        self.entries
            .iter()
            .map(|((actor, seq), change)| ChangeEntry {
                actor: actor.clone(),
                seq: *seq,
                change: change.clone(),
            })
            .collect()
    }

    /// Borrowing iterator in `(actor, seq)` order.
    pub fn iter(&self) -> impl Iterator<Item = (&ActorId, u64, &C)> {
        self.entries
            .iter()
            .map(|((actor, seq), change)| (actor, *seq, change))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sequence numbers start at 1. `u64::MAX` is never issued, so adopting a
/// remote seq always leaves room for one more local change.
pub fn valid_seq(seq: u64) -> bool {
    seq != 0 && seq != u64::MAX
}

/// Reject a change log holding any entry with an unusable sequence number.
pub fn validate_entries<C>(entries: &[ChangeEntry<C>]) -> Result<(), CrdtError> {
    match entries.iter().find(|entry| !valid_seq(entry.seq)) {
        Some(entry) => Err(CrdtError::MalformedChanges(format!(
            "entry {}:{} has an invalid sequence number",
            entry.actor, entry.seq
        ))),
        None => Ok(()),
    }
}

/// Common contract of the CRDT value types.
pub trait Crdt {
    /// A local intent (e.g. "insert at visible index 2").
    type Op;
    /// What gets logged and shipped (e.g. "insert after element X").
    type Change: Clone + Serialize + DeserializeOwned;
    /// The materialized value.
    type Value;

    const KIND: CrdtKind;

    fn actor(&self) -> &ActorId;

    /// Record a local operation and return the logged entry.
    fn apply(&mut self, op: Self::Op) -> Result<ChangeEntry<Self::Change>, CrdtError>;

    /// The full change history.
    fn changes(&self) -> Vec<ChangeEntry<Self::Change>>;

    /// Merge entries from another replica. Returns how many were new.
    fn merge_changes<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = ChangeEntry<Self::Change>>;

    /// Pure projection of the log.
    fn value(&self) -> Self::Value;
}

/// Object-safe view of a CRDT, used to merge change logs received as JSON.
pub trait DynCrdt: Send {
    fn kind(&self) -> CrdtKind;

    /// Serialize the full change log.
    fn changes_json(&self) -> Result<serde_json::Value, CrdtError>;

    /// Merge a serialized change log. Malformed logs are rejected whole.
    fn merge_json(&mut self, changes: &serde_json::Value) -> Result<usize, CrdtError>;

    /// Serialize the current value.
    fn value_json(&self) -> serde_json::Value;
}

impl<T> DynCrdt for T
where
    T: Crdt + Send,
    T::Value: Serialize,
{
    fn kind(&self) -> CrdtKind {
        T::KIND
    }

    fn changes_json(&self) -> Result<serde_json::Value, CrdtError> {
        serde_json::to_value(self.changes()).map_err(|e| CrdtError::MalformedChanges(e.to_string()))
    }

    fn merge_json(&mut self, changes: &serde_json::Value) -> Result<usize, CrdtError> {
        let entries: Vec<ChangeEntry<T::Change>> = serde_json::from_value(changes.clone())
            .map_err(|e| CrdtError::MalformedChanges(e.to_string()))?;
        validate_entries(&entries)?;
        Ok(self.merge_changes(entries))
    }

    fn value_json(&self) -> serde_json::Value {
        serde_json::to_value(self.value()).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_merge_is_idempotent() {
        let mut a: ChangeLog<u8> = ChangeLog::new(ActorId::from("a"));
        a.record(1).unwrap();
        a.record(2).unwrap();

        let mut b: ChangeLog<u8> = ChangeLog::new(ActorId::from("b"));
        assert_eq!(b.merge(a.entries()), 2);
        assert_eq!(b.merge(a.entries()), 0);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_clock_advances_past_merged_entries() {
        let mut a: ChangeLog<u8> = ChangeLog::new(ActorId::from("a"));
        let mut b: ChangeLog<u8> = ChangeLog::new(ActorId::from("b"));
        for i in 0..5 {
            b.record(i).unwrap();
        }
        a.merge(b.entries());
        let entry = a.record(9).unwrap();
        assert_eq!(entry.seq, 6);
    }

    #[test]
    fn test_own_seq_never_reused_after_restore() {
        let mut original: ChangeLog<u8> = ChangeLog::new(ActorId::from("a"));
        original.record(1).unwrap();
        original.record(2).unwrap();

        // A fresh instance with the same actor restored from its own log.
        let mut restored: ChangeLog<u8> = ChangeLog::new(ActorId::from("a"));
        restored.merge(original.entries());
        assert_eq!(restored.record(3).unwrap().seq, 3);
    }

    #[test]
    fn test_merge_skips_unusable_seqs() {
        let mut log: ChangeLog<u8> = ChangeLog::new(ActorId::from("a"));
        log.record(1).unwrap();
        let hostile = vec![
            ChangeEntry { actor: ActorId::from("evil"), seq: u64::MAX, change: 7 },
            ChangeEntry { actor: ActorId::from("evil"), seq: 0, change: 8 },
        ];
        assert_eq!(log.merge(hostile), 0);
        assert_eq!(log.clock(), 1);
        assert_eq!(log.record(2).unwrap().seq, 2);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_clock_exhaustion_is_an_error() {
        let mut log: ChangeLog<u8> = ChangeLog::new(ActorId::from("a"));
        let top = ChangeEntry { actor: ActorId::from("b"), seq: u64::MAX - 1, change: 0 };
        assert_eq!(log.merge(vec![top]), 1);
        assert_eq!(log.record(1).unwrap().seq, u64::MAX);
        assert!(matches!(log.record(2), Err(CrdtError::ClockExhausted)));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_merge_json_rejects_max_seq() {
        let mut counter = Counter::new(ActorId::from("c"));
        let hostile = serde_json::json!([
            {"actor": "evil", "seq": u64::MAX, "op": "ADD", "value": 1.0}
        ]);
        assert!(matches!(
            counter.merge_json(&hostile),
            Err(CrdtError::MalformedChanges(_))
        ));
        counter.add(1.0).unwrap();
        assert_eq!(counter.changes()[0].seq, 1);
        assert_eq!(counter.value(), 1.0);
    }

    #[test]
    fn test_kind_serde() {
        assert_eq!(serde_json::to_string(&CrdtKind::Map).unwrap(), "\"map\"");
    }
}
