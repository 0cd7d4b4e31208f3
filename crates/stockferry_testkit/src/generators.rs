//! Property-based test generators using proptest.

use proptest::prelude::*;
use stockferry_core::{Category, Component, OperationKind, Package, Pallet, Record};

/// Strategy for generating categories.
pub fn category_strategy() -> impl Strategy<Value = Category> {
    prop_oneof![
        Just(Category::Component),
        Just(Category::Package),
        Just(Category::Pallet),
    ]
}

/// Strategy for generating chunked operations.
pub fn operation_strategy() -> impl Strategy<Value = OperationKind> {
    prop_oneof![
        Just(OperationKind::Sync),
        Just(OperationKind::Delete),
        Just(OperationKind::FullSync),
    ]
}

fn text() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 ._-]{0,24}").expect("Invalid regex")
}

fn ids() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{3}-[0-9]{1,4}", 0..4)
}

/// Strategy for generating a record of one category with the given id.
pub fn record_strategy(category: Category, id: String) -> BoxedStrategy<Record> {
    match category {
        Category::Component => (
            text(),
            prop::option::of(text()),
            prop::collection::btree_map("[a-z]{1,8}", text(), 0..4),
            any::<i64>(),
            prop::option::of(any::<i64>()),
        )
            .prop_map(move |(name, description, specifications, quantity, category_id)| {
                Record::Component(Component {
                    id: id.clone(),
                    name,
                    description,
                    specifications,
                    quantity,
                    category_id,
                    ..Component::default()
                })
            })
            .boxed(),
        Category::Package => (text(), prop::option::of(0i64..256), ids(), prop::option::of(text()))
            .prop_map(move |(name, pin_count, components, category)| {
                Record::Package(Package {
                    id: id.clone(),
                    name,
                    pin_count,
                    components,
                    category,
                    ..Package::default()
                })
            })
            .boxed(),
        Category::Pallet => (text(), ids(), prop::option::of(text()), 0i64..100)
            .prop_map(move |(name, components, notes, version)| {
                Record::Pallet(Pallet {
                    id: id.clone(),
                    name,
                    components,
                    notes,
                    version,
                    ..Pallet::default()
                })
            })
            .boxed(),
    }
}

/// Strategy for generating `count` records of one category with unique ids.
pub fn records_strategy(
    category: Category,
    count: impl Into<prop::collection::SizeRange>,
) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(Just(()), count).prop_flat_map(move |slots| {
        slots
            .iter()
            .enumerate()
            .map(|(i, _)| record_strategy(category, format!("{}-{i}", category.as_str())))
            .collect::<Vec<_>>()
    })
}

/// Strategy for generating `(min, max)` chunk bounds with `1 <= min <= max`.
pub fn chunk_bounds_strategy() -> impl Strategy<Value = (u32, u32)> {
    (1u32..40).prop_flat_map(|min| (Just(min), min..min + 60))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_records_have_requested_category(
            records in category_strategy().prop_flat_map(|c| records_strategy(c, 1..10))
        ) {
            let first = records[0].category();
            prop_assert!(records.iter().all(|r| r.category() == first));
        }

        #[test]
        fn generated_ids_are_unique(records in records_strategy(Category::Pallet, 0..20)) {
            let mut ids: Vec<&str> = records.iter().map(Record::id).collect();
            ids.sort_unstable();
            ids.dedup();
            prop_assert_eq!(ids.len(), records.len());
        }

        #[test]
        fn bounds_are_ordered((min, max) in chunk_bounds_strategy()) {
            prop_assert!(min >= 1);
            prop_assert!(min <= max);
        }
    }
}
