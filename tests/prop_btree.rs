//! Property tests for invariants 1-3 (`spec.md` §8): insert/get
//! round-trip, remove-then-absent, and ascending-order iteration —
//! checked against a `BTreeMap` oracle over random operation sequences.
//! Grounded in the teacher's `tests/prop_tests/` convention (one
//! `prop_*.rs` per subsystem, `proptest` dev-dependency already shared).

use cannon_tree::codec::Value;
use cannon_tree::config::EngineOptions;
use cannon_tree::tree::BTreeEngine;
use proptest::prelude::*;
use std::collections::BTreeMap;
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Op {
    Insert(i64, i64),
    Remove(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..64, any::<i32>().prop_map(i64::from)).prop_map(|(k, v)| Op::Insert(k, v)),
        (0i64..64).prop_map(Op::Remove),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn random_insert_remove_sequences_match_a_btreemap_oracle(ops in proptest::collection::vec(op_strategy(), 0..200)) {
        let dir = tempdir().unwrap();
        let opts = EngineOptions::new(dir.path().join("db")).order(6).page_size(256).key_size(16).value_size(16);
        let tree = BTreeEngine::open(&opts).unwrap();
        let mut oracle: BTreeMap<i64, i64> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(k, v) => {
                    tree.insert(Value::Int(k), Value::Int(v), true).unwrap();
                    oracle.insert(k, v);
                }
                Op::Remove(k) => {
                    let result = tree.remove(&Value::Int(k));
                    if oracle.remove(&k).is_some() {
                        prop_assert!(result.is_ok());
                    } else {
                        prop_assert!(result.is_err());
                    }
                }
            }
        }

        for (&k, &v) in &oracle {
            prop_assert_eq!(tree.get(&Value::Int(k)).unwrap(), Some(Value::Int(v)));
        }

        let got: Vec<(i64, i64)> = tree
            .iter()
            .unwrap()
            .into_iter()
            .map(|(k, v)| match (k, v) {
                (Value::Int(k), Value::Int(v)) => (k, v),
                _ => unreachable!(),
            })
            .collect();
        let expected: Vec<(i64, i64)> = oracle.into_iter().collect();
        prop_assert_eq!(got, expected);
    }
}
