//! Property-based tests for hashing, matching and re-diffing.

use proptest::prelude::*;
use std::collections::BTreeMap;

use sync_engine::{
    match_changes, Change, HashAlgorithm, HashMode, MemoryStorage, MetadataEntry, PrimaryKey, Row,
    RowHasher, Storage, TableConfig, TableDiffer, Value,
};

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::Integer),
        "[a-z0-9 ]{0,12}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Blob),
    ]
}

fn columns_strategy() -> impl Strategy<Value = BTreeMap<String, Value>> {
    prop::collection::btree_map("[a-z]{1,6}", value_strategy(), 1..8)
}

fn algorithm_strategy() -> impl Strategy<Value = HashAlgorithm> {
    prop_oneof![Just(HashAlgorithm::Sha256), Just(HashAlgorithm::Blake3)]
}

/// Distinct `(table, id)` keys.
fn keys_strategy() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::btree_set((prop_oneof![Just("a"), Just("b")], 0i64..20), 0..15)
        .prop_map(|keys| keys.into_iter().map(|(t, id)| (t.to_string(), id)).collect())
}

fn changes(keys: &[(String, i64)], tag: &str) -> Vec<Change> {
    keys.iter()
        .map(|(table, id)| {
            Change::new(
                MetadataEntry::new_row(table, PrimaryKey::int(*id), format!("{}{}", tag, id)),
                Some(Row::new().with("id", *id)),
            )
        })
        .collect()
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    /// Column insertion order never changes the hash.
    #[test]
    fn hash_ignores_insertion_order(columns in columns_strategy(), algorithm in algorithm_strategy()) {
        let hasher = RowHasher::new(HashMode::Content(algorithm));

        let forward: Row = columns.clone().into_iter().collect();
        let mut reversed = Row::new();
        for (column, value) in columns.into_iter().rev() {
            reversed.insert(column, value);
        }

        prop_assert_eq!(hasher.hash(&forward), hasher.hash(&reversed));
    }

    /// Swapping the arguments swaps every pair and the unmatched sides.
    #[test]
    fn matcher_is_symmetric(left in keys_strategy(), right in keys_strategy()) {
        let forward = match_changes(changes(&left, "l"), changes(&right, "r"));
        let backward = match_changes(changes(&right, "r"), changes(&left, "l"));

        let forward_pairs: Vec<_> = forward
            .pairs
            .iter()
            .map(|(a, b)| (a.entry.hash.clone(), b.entry.hash.clone()))
            .collect();
        let backward_pairs: Vec<_> = backward
            .pairs
            .iter()
            .map(|(b, a)| (a.entry.hash.clone(), b.entry.hash.clone()))
            .collect();

        prop_assert_eq!(forward_pairs, backward_pairs);
        prop_assert_eq!(forward.unmatched_local, backward.unmatched_remote);
        prop_assert_eq!(forward.unmatched_remote, backward.unmatched_local);
    }

    /// Diffing twice without edits in between returns the same change set.
    #[test]
    fn rediff_is_idempotent(
        initial in prop::collection::btree_map(0i64..30, "[a-z]{1,5}", 0..12),
        edits in prop::collection::vec((0i64..30, prop::option::of("[a-z]{1,5}")), 0..12),
    ) {
        let table = TableConfig::new("items", "id");
        let differ = TableDiffer::new(HashMode::default());
        let mut storage = MemoryStorage::new();

        for (id, name) in &initial {
            let row = Row::new().with("id", *id).with("name", name.as_str());
            storage.insert_row("items", &PrimaryKey::int(*id), &row).unwrap();
        }
        for change in differ.diff_all(&mut storage, std::slice::from_ref(&table)).unwrap() {
            storage.update_revision("items", change.primary_key(), 1).unwrap();
        }

        for (id, name) in edits {
            let pk = PrimaryKey::int(id);
            let exists = storage.get_row("items", &pk).unwrap().is_some();
            match name {
                Some(name) => {
                    let row = Row::new().with("id", id).with("name", name);
                    if exists {
                        storage.update_row("items", &pk, &row).unwrap();
                    } else {
                        storage.insert_row("items", &pk, &row).unwrap();
                    }
                }
                None => {
                    storage.delete_row("items", &pk).unwrap();
                }
            }
        }

        let first = differ.diff_all(&mut storage, std::slice::from_ref(&table)).unwrap();
        let second = differ.diff_all(&mut storage, std::slice::from_ref(&table)).unwrap();
        prop_assert_eq!(first, second);
    }
}
