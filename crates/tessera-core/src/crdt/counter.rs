//! Operation-based numeric counter.

use serde::{Deserialize, Serialize};

use super::{ChangeEntry, ChangeLog, Crdt, CrdtKind};
use crate::error::CrdtError;
use crate::types::ActorId;

/// A counter operation. Logged as-is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "UPPERCASE")]
pub enum CounterOp {
    Add { value: f64 },
    Sub { value: f64 },
}

/// Counter whose value is the sum of all ADDs minus all SUBs.
#[derive(Debug, Clone)]
pub struct Counter {
    log: ChangeLog<CounterOp>,
}

impl Counter {
    pub fn new(actor: ActorId) -> Self {
        Self {
            log: ChangeLog::new(actor),
        }
    }

    pub fn add(&mut self, value: f64) -> Result<ChangeEntry<CounterOp>, CrdtError> {
        self.apply(CounterOp::Add { value })
    }

    pub fn sub(&mut self, value: f64) -> Result<ChangeEntry<CounterOp>, CrdtError> {
        self.apply(CounterOp::Sub { value })
    }
}

impl Crdt for Counter {
    type Op = CounterOp;
    type Change = CounterOp;
    type Value = f64;

    const KIND: CrdtKind = CrdtKind::Counter;

    fn actor(&self) -> &ActorId {
        self.log.actor()
    }

    fn apply(&mut self, op: CounterOp) -> Result<ChangeEntry<CounterOp>, CrdtError> {
        let (CounterOp::Add { value } | CounterOp::Sub { value }) = op;
        if !value.is_finite() {
            return Err(CrdtError::InvalidOperand(format!("{value} is not finite")));
        }
        self.log.record(op)
    }

    fn changes(&self) -> Vec<ChangeEntry<CounterOp>> {
        self.log.entries()
    }

    fn merge_changes<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = ChangeEntry<CounterOp>>,
    {
        self.log.merge(entries)
    }

    /// Summed in `(actor, seq)` order so every replica gets the same float.
    fn value(&self) -> f64 {
        self.log.iter().fold(0.0, |acc, (_, _, op)| match op {
            CounterOp::Add { value } => acc + value,
            CounterOp::Sub { value } => acc - value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::DynCrdt;

    #[test]
    fn test_two_replicas_converge() {
        let mut alice = Counter::new(ActorId::from("alice"));
        let mut bob = Counter::new(ActorId::from("bob"));

        alice.add(5.0).unwrap();
        bob.merge_changes(alice.changes());
        bob.add(4.0).unwrap();
        alice.add(3.0).unwrap();

        alice.merge_changes(bob.changes());
        bob.merge_changes(alice.changes());

        assert_eq!(alice.value(), 12.0);
        assert_eq!(bob.value(), 12.0);
    }

    #[test]
    fn test_duplicate_merge_is_noop() {
        let mut a = Counter::new(ActorId::from("a"));
        a.add(2.0).unwrap();
        a.sub(0.5).unwrap();

        let mut b = Counter::new(ActorId::from("b"));
        assert_eq!(b.merge_changes(a.changes()), 2);
        assert_eq!(b.merge_changes(a.changes()), 0);
        assert_eq!(b.value(), 1.5);
        assert_eq!(b.changes().len(), 2);
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut c = Counter::new(ActorId::from("a"));
        assert!(matches!(c.add(f64::NAN), Err(CrdtError::InvalidOperand(_))));
        assert!(c.changes().is_empty());
    }

    #[test]
    fn test_wire_shape() {
        let mut c = Counter::new(ActorId::from("a"));
        c.add(5.0).unwrap();
        let json = c.changes_json().unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"actor": "a", "seq": 1, "op": "ADD", "value": 5.0}])
        );

        let mut d = Counter::new(ActorId::from("d"));
        assert_eq!(d.merge_json(&json).unwrap(), 1);
        assert_eq!(d.value(), 5.0);
    }

    #[test]
    fn test_malformed_log_rejected() {
        let mut c = Counter::new(ActorId::from("a"));
        let bad = serde_json::json!([{"actor": "x", "seq": 1, "op": "MUL", "value": 2}]);
        assert!(matches!(c.merge_json(&bad), Err(CrdtError::MalformedChanges(_))));
    }
}
