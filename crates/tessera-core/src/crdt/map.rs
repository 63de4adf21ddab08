//! Last-writer-wins map.
//!
//! For each key the change with the greatest `(seq, actor)` decides the
//! outcome; a winning DEL removes the key. With a Lamport `seq` a write made
//! after observing another always beats it, and concurrent writes at equal
//! `seq` go to the lexically greater actor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChangeEntry, ChangeLog, Crdt, CrdtKind};
use crate::error::CrdtError;
use crate::types::ActorId;

/// A map operation. Logged as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "UPPERCASE")]
pub enum MapOp {
    Set { key: String, value: Value },
    Del { key: String },
}

impl MapOp {
    fn key(&self) -> &str {
        match self {
            MapOp::Set { key, .. } | MapOp::Del { key } => key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Map {
    log: ChangeLog<MapOp>,
}

impl Map {
    pub fn new(actor: ActorId) -> Self {
        Self {
            log: ChangeLog::new(actor),
        }
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<ChangeEntry<MapOp>, CrdtError> {
        self.apply(MapOp::Set {
            key: key.into(),
            value,
        })
    }

    pub fn delete(&mut self, key: impl Into<String>) -> Result<ChangeEntry<MapOp>, CrdtError> {
        self.apply(MapOp::Del { key: key.into() })
    }

    /// Current value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        let winner = self
            .log
            .iter()
            .filter(|(_, _, op)| op.key() == key)
            .max_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)))?;
        match winner.2 {
            MapOp::Set { value, .. } => Some(value.clone()),
            MapOp::Del { .. } => None,
        }
    }
}

impl Crdt for Map {
    type Op = MapOp;
    type Change = MapOp;
    type Value = BTreeMap<String, Value>;

    const KIND: CrdtKind = CrdtKind::Map;

    fn actor(&self) -> &ActorId {
        self.log.actor()
    }

    fn apply(&mut self, op: MapOp) -> Result<ChangeEntry<MapOp>, CrdtError> {
        if op.key().is_empty() {
            return Err(CrdtError::InvalidOperand("empty map key".into()));
        }
        self.log.record(op)
    }

    fn changes(&self) -> Vec<ChangeEntry<MapOp>> {
        self.log.entries()
    }

    fn merge_changes<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = ChangeEntry<MapOp>>,
    {
        self.log.merge(entries)
    }

    fn value(&self) -> BTreeMap<String, Value> {
        let mut winners: BTreeMap<&str, ((u64, &ActorId), &MapOp)> = BTreeMap::new();
        for (actor, seq, op) in self.log.iter() {
            let stamp = (seq, actor);
            winners
                .entry(op.key())
                .and_modify(|current| {
                    if stamp > current.0 {
                        *current = (stamp, op);
                    }
                })
                .or_insert((stamp, op));
        }

        winners
            .into_iter()
            .filter_map(|(key, (_, op))| match op {
                MapOp::Set { value, .. } => Some((key.to_string(), value.clone())),
                MapOp::Del { .. } => None,
            })
            .collect()
    }
}
