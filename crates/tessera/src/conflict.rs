//! Conflict resolution.
//!
//! Decides which of the stored and incoming records for a key survives.
//! The decision depends only on the two records, never on arrival order,
//! so every replica that has seen both ends up storing the same one.
//!
//! - Frozen keys, different writers: first-writer order (older timestamp,
//!   then the smaller address) wins, and the conflict is reported.
//! - Frozen keys, same writer: the newer copy replaces the older one
//!   silently.
//! - Everything else: newer timestamp wins, ties go to the greater hash.

use tessera_core::VerificationRecord;

use crate::events::{ConflictReport, Side};

/// What to do with an incoming record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing was stored under the key.
    Insert,
    /// The incoming record replaces the stored one.
    Replace { conflict: Option<ConflictReport> },
    /// The stored record stays.
    Keep { conflict: Option<ConflictReport> },
}

impl Resolution {
    /// Check if the incoming record should be written.
    pub fn stores_incoming(&self) -> bool {
        !matches!(self, Resolution::Keep { .. })
    }

    pub fn conflict(&self) -> Option<&ConflictReport> {
        match self {
            Resolution::Insert => None,
            Resolution::Replace { conflict } | Resolution::Keep { conflict } => conflict.as_ref(),
        }
    }
}

/// Resolve `incoming` against the record currently stored for its key.
pub fn resolve(existing: Option<&VerificationRecord>, incoming: &VerificationRecord) -> Resolution {
    let Some(stored) = existing else {
        return Resolution::Insert;
    };

    if incoming.is_frozen() && stored.address != incoming.address {
        let winner = if incoming.precedes(stored) {
            Side::Remote
        } else {
            Side::Local
        };
        let conflict = Some(ConflictReport {
            key: incoming.key.clone(),
            winner,
            local_address: stored.address,
            local_timestamp: stored.timestamp,
            remote_address: incoming.address,
            remote_timestamp: incoming.timestamp,
        });
        return match winner {
            Side::Remote => Resolution::Replace { conflict },
            Side::Local => Resolution::Keep { conflict },
        };
    }

    if incoming.supersedes(stored) {
        Resolution::Replace { conflict: None }
    } else {
        Resolution::Keep { conflict: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tessera_core::{frozen_key, Address, Keypair, RecordBuilder};

    fn record(kp: &Keypair, key: &str, ts: i64, value: serde_json::Value) -> VerificationRecord {
        RecordBuilder::new(key, value, kp.address()).timestamp(ts).sign(kp)
    }

    /// Two keypairs ordered by address.
    fn ordered_pair() -> (Keypair, Keypair) {
        let a = Keypair::from_seed(&[1u8; 32]);
        let b = Keypair::from_seed(&[2u8; 32]);
        if a.address() < b.address() {
            (a, b)
        } else {
            (b, a)
        }
    }

    #[test]
    fn test_insert_when_empty() {
        let kp = Keypair::generate();
        let r = record(&kp, "k", 1, json!(1));
        assert_eq!(resolve(None, &r), Resolution::Insert);
        assert!(resolve(None, &r).stores_incoming());
    }

    #[test]
    fn test_frozen_first_writer_wins_both_orders() {
        let (x, y) = ordered_pair();
        let key = frozen_key("name");
        let early = record(&y, &key, 100, json!("y"));
        let late = record(&x, &key, 200, json!("x"));

        let res = resolve(Some(&late), &early);
        assert!(res.stores_incoming());
        let report = res.conflict().unwrap();
        assert_eq!(report.winner, Side::Remote);
        assert_eq!(report.winning_address(), y.address());
        assert_eq!(report.losing_address(), x.address());

        let res = resolve(Some(&early), &late);
        assert!(!res.stores_incoming());
        assert_eq!(res.conflict().unwrap().winner, Side::Local);
        assert_eq!(res.conflict().unwrap().winning_address(), y.address());
    }

    #[test]
    fn test_frozen_tie_goes_to_smaller_address() {
        let (small, large) = ordered_pair();
        let key = frozen_key("tie");
        let a = record(&small, &key, 100, json!(1));
        let b = record(&large, &key, 100, json!(2));

        let winner_of = |stored: &VerificationRecord, incoming: &VerificationRecord| -> Address {
            resolve(Some(stored), incoming).conflict().unwrap().winning_address()
        };
        assert_eq!(winner_of(&a, &b), small.address());
        assert_eq!(winner_of(&b, &a), small.address());
    }

    #[test]
    fn test_self_sync_is_silent() {
        let kp = Keypair::generate();
        let key = frozen_key("me");
        let old = record(&kp, &key, 100, json!(1));
        let new = record(&kp, &key, 200, json!(2));

        assert_eq!(resolve(Some(&old), &new), Resolution::Replace { conflict: None });
        assert_eq!(resolve(Some(&new), &old), Resolution::Keep { conflict: None });
        assert_eq!(resolve(Some(&new), &new), Resolution::Keep { conflict: None });
    }

    #[test]
    fn test_plain_key_newest_wins() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let old = record(&a, "k", 100, json!("old"));
        let new = record(&b, "k", 200, json!("new"));

        assert_eq!(resolve(Some(&old), &new), Resolution::Replace { conflict: None });
        assert_eq!(resolve(Some(&new), &old), Resolution::Keep { conflict: None });
    }

    #[test]
    fn test_plain_key_tie_is_order_independent() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        let r1 = record(&a, "k", 100, json!(1));
        let r2 = record(&b, "k", 100, json!(2));

        // Exactly one direction replaces.
        let forward = resolve(Some(&r1), &r2).stores_incoming();
        let backward = resolve(Some(&r2), &r1).stores_incoming();
        assert_ne!(forward, backward);
    }

    /// Apply `records` in order to an empty slot, the way a replica would.
    fn settle<'a>(records: impl IntoIterator<Item = &'a VerificationRecord>) -> Option<VerificationRecord> {
        let mut stored: Option<VerificationRecord> = None;
        for incoming in records {
            if resolve(stored.as_ref(), incoming).stores_incoming() {
                stored = Some(incoming.clone());
            }
        }
        stored
    }

    proptest! {
        #[test]
        fn prop_plain_keys_settle_in_any_order(
            writes in prop::collection::vec((0u8..4, 0i64..50), 1..8),
            seed in any::<u64>(),
        ) {
            let records: Vec<_> = writes
                .iter()
                .enumerate()
                .map(|(i, (writer, ts))| {
                    let kp = Keypair::from_seed(&[*writer + 1; 32]);
                    record(&kp, "k", *ts, json!(i))
                })
                .collect();

            let mut shuffled = records.clone();
            let len = shuffled.len();
            for i in 0..len {
                shuffled.swap(i, (seed as usize).wrapping_add(i * 7) % len);
            }

            let forward = settle(&records).map(|r| r.hash);
            prop_assert_eq!(forward, settle(records.iter().rev()).map(|r| r.hash));
            prop_assert_eq!(forward, settle(&shuffled).map(|r| r.hash));
        }

        #[test]
        fn prop_frozen_claims_settle_in_any_order(
            stamps in prop::collection::vec(0i64..20, 1..5),
        ) {
            let key = frozen_key("contested");
            // One claim per writer.
            let claims: Vec<_> = stamps
                .iter()
                .enumerate()
                .map(|(i, ts)| record(&Keypair::from_seed(&[i as u8 + 1; 32]), &key, *ts, json!(i)))
                .collect();

            let first = claims
                .iter()
                .min_by(|a, b| a.first_writer_cmp(b))
                .map(|r| r.address);
            prop_assert_eq!(settle(&claims).map(|r| r.address), first);
            prop_assert_eq!(settle(claims.iter().rev()).map(|r| r.address), first);
        }
    }
}
