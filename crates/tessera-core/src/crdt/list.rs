//! Replicated sequence (RGA).
//!
//! Each inserted element is identified by the `(seq, actor)` of the change
//! that created it and anchored after another element (or the head). The
//! visible order is a depth-first walk from the head where siblings sharing
//! an anchor are visited in descending `(seq, actor)` order. Deletions only
//! tombstone; elements are never removed, so late inserts anchored on a
//! deleted element still have a place to go.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChangeEntry, ChangeLog, Crdt, CrdtKind};
use crate::error::CrdtError;
use crate::types::ActorId;

/// Identity of a list element. Orders by `seq`, then `actor`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId {
    pub seq: u64,
    pub actor: ActorId,
}

/// A local list operation, addressed by visible index.
#[derive(Debug, Clone, PartialEq)]
pub enum ListOp {
    Push(Value),
    Insert { index: usize, value: Value },
    Delete { index: usize },
}

/// A logged list change, addressed by element identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "UPPERCASE")]
pub enum ListChange {
    Ins {
        after: Option<ElementId>,
        value: Value,
    },
    Del {
        target: ElementId,
    },
}

/// One slot of the projected sequence, tombstones included.
#[derive(Debug, Clone, PartialEq)]
pub struct ListElement {
    pub id: ElementId,
    pub value: Value,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct List {
    log: ChangeLog<ListChange>,
}

impl List {
    pub fn new(actor: ActorId) -> Self {
        Self {
            log: ChangeLog::new(actor),
        }
    }

    pub fn push(&mut self, value: Value) -> Result<ChangeEntry<ListChange>, CrdtError> {
        self.apply(ListOp::Push(value))
    }

    pub fn insert(
        &mut self,
        index: usize,
        value: Value,
    ) -> Result<ChangeEntry<ListChange>, CrdtError> {
        self.apply(ListOp::Insert { index, value })
    }

    pub fn delete(&mut self, index: usize) -> Result<ChangeEntry<ListChange>, CrdtError> {
        self.apply(ListOp::Delete { index })
    }

    /// Number of visible elements.
    pub fn len(&self) -> usize {
        self.visible_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every element in projection order, including tombstones.
    pub fn elements(&self) -> Vec<ListElement> {
        let mut children: BTreeMap<Option<&ElementId>, Vec<ElementId>> = BTreeMap::new();
        let mut values: HashMap<ElementId, &Value> = HashMap::new();
        let mut tombstones: HashSet<&ElementId> = HashSet::new();

        for (actor, seq, change) in self.log.iter() {
            match change {
                ListChange::Ins { after, value } => {
                    let id = ElementId {
                        seq,
                        actor: actor.clone(),
                    };
                    children.entry(after.as_ref()).or_default().push(id.clone());
                    values.insert(id, value);
                }
                ListChange::Del { target } => {
                    tombstones.insert(target);
                }
            }
        }

        // Ascending sort so that popping from the stack yields the greatest id.
        for siblings in children.values_mut() {
            siblings.sort();
        }

        let mut out = Vec::with_capacity(values.len());
        let mut stack: Vec<ElementId> = children.get(&None).cloned().unwrap_or_default();
        while let Some(id) = stack.pop() {
            if let Some(kids) = children.get(&Some(&id)) {
                stack.extend(kids.iter().cloned());
            }
            let value = values.get(&id).map(|v| (*v).clone()).unwrap_or(Value::Null);
            let deleted = tombstones.contains(&id);
            out.push(ListElement { id, value, deleted });
        }
        out
    }

    fn visible_ids(&self) -> Vec<ElementId> {
        self.elements()
            .into_iter()
            .filter(|e| !e.deleted)
            .map(|e| e.id)
            .collect()
    }
}

impl Crdt for List {
    type Op = ListOp;
    type Change = ListChange;
    type Value = Vec<Value>;

    const KIND: CrdtKind = CrdtKind::List;

    fn actor(&self) -> &ActorId {
        self.log.actor()
    }

    fn apply(&mut self, op: ListOp) -> Result<ChangeEntry<ListChange>, CrdtError> {
        let visible = self.visible_ids();
        let change = match op {
            ListOp::Push(value) => ListChange::Ins {
                after: visible.last().cloned(),
                value,
            },
            ListOp::Insert { index, value } => {
                // Past-the-end inserts append.
                let index = index.min(visible.len());
                let after = index.checked_sub(1).map(|i| visible[i].clone());
                ListChange::Ins { after, value }
            }
            ListOp::Delete { index } => {
                let target = visible.get(index).cloned().ok_or(CrdtError::IndexOutOfBounds {
                    index,
                    len: visible.len(),
                })?;
                ListChange::Del { target }
            }
        };
        self.log.record(change)
    }

    fn changes(&self) -> Vec<ChangeEntry<ListChange>> {
        self.log.entries()
    }

    fn merge_changes<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = ChangeEntry<ListChange>>,
    {
        self.log.merge(entries)
    }

    fn value(&self) -> Vec<Value> {
        self.elements()
            .into_iter()
            .filter(|e| !e.deleted)
            .map(|e| e.value)
            .collect()
    }
}
