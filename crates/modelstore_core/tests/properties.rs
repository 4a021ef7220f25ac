//! Property tests over the persistence surface.

use modelstore_core::{PersistableExt, Predicate};
use modelstore_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn delete_where_partitions_the_store(
        entities in distinct_keyed_entities(40),
        pivot in 0..1_000_i64,
    ) {
        let store = TestStore::memory();
        TestEntityPK::save_all(store.ctx(), &entities).unwrap();

        let below = Predicate::lt("id", pivot);
        let expected_removed = entities.iter().filter(|e| e.id < pivot).count();

        let removed = TestEntityPK::delete_where(store.ctx(), below.clone()).unwrap();
        prop_assert_eq!(removed, expected_removed);
        prop_assert_eq!(TestEntityPK::count_where(store.ctx(), below).unwrap(), 0);
        prop_assert_eq!(
            TestEntityPK::count(store.ctx()).unwrap(),
            entities.len() - expected_removed
        );
    }

    #[test]
    fn saving_twice_is_idempotent(entities in distinct_keyed_entities(20)) {
        let store = TestStore::memory();
        TestEntityPK::save_all(store.ctx(), &entities).unwrap();
        let once = TestEntityPK::all_items(store.ctx()).unwrap();

        TestEntityPK::save_all(store.ctx(), &entities).unwrap();
        let twice = TestEntityPK::all_items(store.ctx()).unwrap();

        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once, entities);
    }

    #[test]
    fn upsert_keeps_the_last_write(writes in prop::collection::vec(keyed_entity_strategy(8), 1..30)) {
        let store = TestStore::memory();
        for entity in &writes {
            entity.save(store.ctx()).unwrap();
        }

        for stored in TestEntityPK::all_items(store.ctx()).unwrap() {
            let last = writes.iter().rev().find(|e| e.id == stored.id).unwrap();
            prop_assert_eq!(&stored, last);
        }
    }
}
