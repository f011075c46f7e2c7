//! Property test strategies for engine types

use proptest::prelude::*;
use weft_core::Value;

pub use proptest;

/// Scalar and shallow list values
pub fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Unit),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        "[a-z]{0,8}".prop_map(Value::from),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Value::from)
    })
}

/// Group names `g0..gN`, shuffled into a random total order
pub fn arb_group_order(max_groups: usize) -> impl Strategy<Value = Vec<String>> {
    (1..=max_groups.max(1))
        .prop_flat_map(|count| Just((0..count).map(|i| format!("g{i}")).collect::<Vec<_>>()))
        .prop_shuffle()
}

/// Items tagged with an optional index into a group list of length `groups`
pub fn arb_grouped_items(
    groups: usize,
    max_items: usize,
) -> impl Strategy<Value = Vec<Option<usize>>> {
    prop::collection::vec(prop::option::of(0..groups.max(1)), 0..=max_items)
}

/// A group order paired with items referring to it
pub fn arb_precedence_case(
    max_groups: usize,
    max_items: usize,
) -> impl Strategy<Value = (Vec<String>, Vec<Option<usize>>)> {
    arb_group_order(max_groups).prop_flat_map(move |order| {
        let groups = order.len();
        (Just(order), arb_grouped_items(groups, max_items))
    })
}
