//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::Value;

use tessera_core::crdt::CounterOp;
use tessera_core::{
    ActorId, Counter, Crdt, Keypair, List, ListOp, Map, MapOp, RecordBuilder, VerificationRecord,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=1_700_000_000_000i64
}

/// Generate a small JSON scalar.
pub fn json_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-z0-9]{0,8}".prop_map(Value::from),
    ]
}

/// Generate a plain (non-namespaced) key.
pub fn plain_key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9/]{0,15}".prop_map(String::from)
}

/// Generate a counter operation. Operands are multiples of 1/4 so sums are
/// exact in `f64`.
pub fn counter_op() -> impl Strategy<Value = CounterOp> {
    let operand = (-4_000i32..4_000).prop_map(|v| f64::from(v) / 4.0);
    prop_oneof![
        operand.clone().prop_map(|value| CounterOp::Add { value }),
        operand.prop_map(|value| CounterOp::Sub { value }),
    ]
}

/// Generate a list operation. Indexes may point past the end.
pub fn list_op() -> impl Strategy<Value = ListOp> {
    prop_oneof![
        json_scalar().prop_map(ListOp::Push),
        (0usize..8, json_scalar()).prop_map(|(index, value)| ListOp::Insert { index, value }),
        (0usize..8).prop_map(|index| ListOp::Delete { index }),
    ]
}

/// Generate a map operation over a small key set so writes collide.
pub fn map_op() -> impl Strategy<Value = MapOp> {
    let key = "[a-d]".prop_map(String::from);
    prop_oneof![
        3 => (key.clone(), json_scalar()).prop_map(|(key, value)| MapOp::Set { key, value }),
        1 => key.prop_map(|key| MapOp::Del { key }),
    ]
}

/// Operations for each of `replicas` replicas.
pub fn scripts<S: Strategy>(op: S, replicas: usize) -> impl Strategy<Value = Vec<Vec<S::Value>>> {
    prop::collection::vec(prop::collection::vec(op, 0..12), replicas)
}

/// Replica `i` of a CRDT, with actor id `r{i}`.
pub fn replica<C, F>(i: usize, make: F) -> C
where
    F: Fn(ActorId) -> C,
{
    make(ActorId::new(format!("r{i}")))
}

/// Apply each script to its own replica. Rejected ops (deleting past the
/// end) leave the log untouched and are skipped.
pub fn run_scripts<C, F>(scripts: Vec<Vec<C::Op>>, make: F) -> Vec<C>
where
    C: Crdt,
    F: Fn(ActorId) -> C,
{
    scripts
        .into_iter()
        .enumerate()
        .map(|(i, ops)| {
            let mut crdt = replica(i, &make);
            for op in ops {
                let _ = crdt.apply(op);
            }
            crdt
        })
        .collect()
}

/// Build fresh counters from op scripts.
pub fn counters(scripts: Vec<Vec<CounterOp>>) -> Vec<Counter> {
    run_scripts(scripts, Counter::new)
}

/// Build fresh lists from op scripts.
pub fn lists(scripts: Vec<Vec<ListOp>>) -> Vec<List> {
    run_scripts(scripts, List::new)
}

/// Build fresh maps from op scripts.
pub fn maps(scripts: Vec<Vec<MapOp>>) -> Vec<Map> {
    run_scripts(scripts, Map::new)
}

/// Parameters for generating a record.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub keypair: Keypair,
    pub key: String,
    pub value: Value,
    pub timestamp: i64,
}

impl Arbitrary for RecordParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (any::<[u8; 32]>(), plain_key(), json_scalar(), timestamp())
            .prop_map(|(seed, key, value, timestamp)| RecordParams {
                keypair: Keypair::from_seed(&seed),
                key,
                value,
                timestamp,
            })
            .boxed()
    }
}

/// Generate a record from parameters.
pub fn record_from_params(params: &RecordParams) -> VerificationRecord {
    RecordBuilder::new(params.key.clone(), params.value.clone(), params.keypair.address())
        .timestamp(params.timestamp)
        .sign(&params.keypair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::validation::check_proof_of_work;

    /// Deliver every replica's log to every other, `rounds` times over, in
    /// the order given by `order`.
    fn gossip<C: Crdt>(replicas: &mut [C], order: &[usize], rounds: usize) {
        for _ in 0..rounds {
            for &from in order {
                let changes = replicas[from].changes();
                for (to, replica) in replicas.iter_mut().enumerate() {
                    if to != from {
                        replica.merge_changes(changes.clone());
                    }
                }
            }
        }
    }

    proptest! {
        #[test]
        fn test_record_hash_deterministic(params: RecordParams) {
            let r1 = record_from_params(&params);
            let r2 = record_from_params(&params);
            prop_assert_eq!(r1.hash, r2.hash);
            prop_assert!(r1.verify_signature().is_ok());
            prop_assert!(check_proof_of_work(&r1, 0).is_ok());
        }

        #[test]
        fn test_counters_converge(s in scripts(counter_op(), 3), order in Just(vec![2usize, 0, 1]).prop_shuffle()) {
            let mut replicas = counters(s);
            gossip(&mut replicas, &order, 2);
            let expected = replicas[0].value();
            for replica in &replicas {
                prop_assert_eq!(replica.value(), expected);
            }
        }

        #[test]
        fn test_lists_converge(s in scripts(list_op(), 3), order in Just(vec![0usize, 1, 2]).prop_shuffle()) {
            let mut replicas = lists(s);
            gossip(&mut replicas, &order, 1);
            let expected = replicas[0].value();
            for replica in &replicas {
                prop_assert_eq!(replica.value(), expected.clone());
                prop_assert_eq!(replica.elements().len(), replicas[0].elements().len());
            }
        }

        #[test]
        fn test_maps_converge(s in scripts(map_op(), 4), order in Just(vec![0usize, 1, 2, 3]).prop_shuffle()) {
            let mut replicas = maps(s);
            gossip(&mut replicas, &order, 1);
            let expected = replicas[0].value();
            for replica in &replicas {
                prop_assert_eq!(replica.value(), expected.clone());
            }
        }

        #[test]
        fn test_merge_idempotent(s in scripts(map_op(), 2)) {
            let mut replicas = maps(s);
            let changes = replicas[1].changes();
            replicas[0].merge_changes(changes.clone());
            let once = replicas[0].value();
            prop_assert_eq!(replicas[0].merge_changes(changes), 0);
            prop_assert_eq!(replicas[0].value(), once);
        }
    }
}
