//! Property Tests
//!
//! Precedence ranks honor every accepted declaration, sorting keeps ungrouped
//! entries in place, overlays wrap the class chain in insertion order, and
//! arbitrary values survive a trip through a chain.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use weft_engine::{
    sort_by_precedence, AdviceBinding, PrecedenceDeclaration, PrecedenceGraph, WeftError,
};
use weft_testkit::strategies::{arb_precedence_case, arb_value};
use weft_testkit::{
    account_class, method_id, test_manager, CountingInterceptor, Journal, RecordingInterceptor,
};

fn arb_edges() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..6usize, 0..6usize), 0..12)
}

proptest! {
    #[test]
    fn sorted_items_follow_group_order((order, items) in arb_precedence_case(6, 24)) {
        let mut graph = PrecedenceGraph::new();
        graph
            .declare(PrecedenceDeclaration::new("order", order.iter().cloned()))
            .unwrap();
        let tagged: Vec<(usize, Option<&str>)> = items
            .iter()
            .enumerate()
            .map(|(position, group)| (position, group.map(|group| order[group].as_str())))
            .collect();

        let sorted = sort_by_precedence(tagged.clone(), |item| item.1, &graph).unwrap();

        prop_assert_eq!(sorted.len(), tagged.len());
        for (slot, item) in sorted.iter().enumerate() {
            if item.1.is_none() {
                prop_assert_eq!(item.0, slot);
            } else {
                prop_assert!(tagged[slot].1.is_some());
            }
        }
        let grouped: Vec<(usize, usize)> = sorted
            .iter()
            .filter_map(|(position, group)| {
                group.map(|group| (graph.rank(group).unwrap(), *position))
            })
            .collect();
        for pair in grouped.windows(2) {
            prop_assert!(pair[0] < pair[1], "{:?} before {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn accepted_declarations_are_respected(edges in arb_edges()) {
        let mut graph = PrecedenceGraph::new();
        let mut accepted = Vec::new();
        for (index, (from, to)) in edges.into_iter().enumerate() {
            let groups = [format!("g{from}"), format!("g{to}")];
            match graph.declare(PrecedenceDeclaration::new(format!("d{index}"), groups.clone())) {
                Ok(()) => accepted.push(groups),
                Err(err) => {
                    let is_cycle = matches!(err, WeftError::PrecedenceCycle { .. });
                    prop_assert!(is_cycle);
                }
            }
        }

        prop_assert_eq!(graph.declarations().count(), accepted.len());
        for [before, after] in &accepted {
            prop_assert!(graph.rank(before).unwrap() < graph.rank(after).unwrap());
        }
        let ordered = graph.ordered_groups();
        for (rank, group) in ordered.iter().enumerate() {
            prop_assert_eq!(graph.rank(group), Some(rank));
        }
    }

    #[test]
    fn values_pass_through_an_advised_chain(value in arb_value()) {
        let manager = test_manager();
        let binding = AdviceBinding::new("count", "execution(*.deposit)")
            .with_interceptor(CountingInterceptor::new("count"));
        manager.add_binding(binding).unwrap();
        let advisor = manager.attach(account_class()).unwrap();

        let result = manager.dispatch(
            &advisor,
            &method_id("deposit", "(J)V"),
            None,
            vec![value.clone()],
        );
        prop_assert_eq!(result, Ok(value));
    }

    #[test]
    fn overlays_wrap_the_class_chain(inserted in 0..4usize, appended in 0..4usize) {
        let manager = test_manager();
        let journal = Journal::new();
        let binding = AdviceBinding::new("class", "execution(*.deposit)")
            .with_interceptor(RecordingInterceptor::new("class", &journal));
        manager.add_binding(binding).unwrap();
        let advisor = manager.attach(account_class()).unwrap();
        let instance = manager.instance(&advisor);
        for index in 0..inserted {
            let name = format!("in{index}");
            instance.overlay().insert_interceptor(RecordingInterceptor::new(name, &journal));
        }
        for index in 0..appended {
            let name = format!("out{index}");
            instance.overlay().append_interceptor(RecordingInterceptor::new(name, &journal));
        }

        instance.invoke(&method_id("deposit", "(J)V"), vec![1i64.into()]).unwrap();

        let mut expected: Vec<String> = (0..inserted).map(|index| format!("in{index}")).collect();
        expected.push("class".to_string());
        expected.extend((0..appended).map(|index| format!("out{index}")));
        let unwinding: Vec<String> = expected.iter().rev().map(|name| format!("/{name}")).collect();
        expected.extend(unwinding);
        prop_assert_eq!(journal.entries(), expected);
    }
}
