//! Property-based test generators using proptest.

use crate::fixtures::{TestEntity, TestEntityPK};
use proptest::prelude::*;

/// Strategy for entity names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex")
}

/// Strategy for unkeyed entities.
pub fn entity_strategy() -> impl Strategy<Value = TestEntity> {
    name_strategy().prop_map(TestEntity::new)
}

/// Strategy for keyed entities with ids drawn from `0..max_id`.
pub fn keyed_entity_strategy(max_id: i64) -> impl Strategy<Value = TestEntityPK> {
    (0..max_id, name_strategy()).prop_map(|(id, name)| TestEntityPK::named(id, name))
}

/// Strategy for keyed entities with distinct ids, in random order.
pub fn distinct_keyed_entities(max_len: usize) -> impl Strategy<Value = Vec<TestEntityPK>> {
    prop::collection::btree_map(0..1_000_i64, name_strategy(), 0..max_len)
        .prop_map(|entries| {
            entries
                .into_iter()
                .map(|(id, name)| TestEntityPK::named(id, name))
                .collect::<Vec<_>>()
        })
        .prop_shuffle()
}
