//! Precedence Sorter
//!
//! Precedence declarations name groups in before-order (`[A, B, C]` means A
//! before B before C). Their union forms a directed graph over groups that must
//! stay acyclic; declaring a cycle is rejected and leaves the graph unchanged.
//!
//! The partial order is made total by a Kahn traversal that always releases the
//! earliest-declared ready group, so every group gets a stable rank. Sorting a
//! join point's pending entries keeps ungrouped entries in their insertion slots
//! and reorders grouped entries among their own slots by rank, insertion order
//! breaking ties.

use indexmap::{IndexMap, IndexSet};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use weft_core::{BindingName, Result, WeftError};

use crate::binding::BehaviorFactory;
use crate::cflow::CflowGuard;

/// Ordered list of groups; earlier groups run outside later ones
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecedenceDeclaration {
    pub name: String,
    pub groups: Vec<String>,
}

impl PrecedenceDeclaration {
    pub fn new<I, S>(name: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }
}

/// Union of all precedence declarations
#[derive(Debug, Clone, Default)]
pub struct PrecedenceGraph {
    declarations: IndexMap<String, PrecedenceDeclaration>,
    ranks: HashMap<Arc<str>, usize>,
}

impl PrecedenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration; fails on a duplicate name or a cycle
    pub fn declare(&mut self, declaration: PrecedenceDeclaration) -> Result<()> {
        if self.declarations.contains_key(&declaration.name) {
            return Err(WeftError::configuration(format!(
                "Precedence '{}' is already declared",
                declaration.name
            )));
        }
        if declaration.groups.iter().any(String::is_empty) {
            return Err(WeftError::configuration(format!(
                "Precedence '{}' names an empty group",
                declaration.name
            )));
        }
        let mut candidate = self.declarations.clone();
        candidate.insert(declaration.name.clone(), declaration);
        self.ranks = compute_ranks(&candidate)?;
        self.declarations = candidate;
        Ok(())
    }

    /// Remove a declaration by name
    pub fn withdraw(&mut self, name: &str) -> Result<PrecedenceDeclaration> {
        let removed = self.declarations.shift_remove(name).ok_or_else(|| {
            WeftError::configuration(format!("Precedence '{name}' is not declared"))
        })?;
        self.ranks = compute_ranks(&self.declarations)?;
        Ok(removed)
    }

    /// Groups that would remain declared after withdrawing `name`
    pub(crate) fn groups_without(&self, name: &str) -> IndexSet<&str> {
        self.declarations
            .iter()
            .filter(|(declared, _)| declared.as_str() != name)
            .flat_map(|(_, declaration)| declaration.groups.iter().map(String::as_str))
            .collect()
    }

    pub fn contains_group(&self, group: &str) -> bool {
        self.ranks.contains_key(group)
    }

    /// Position of a group in the total order
    pub fn rank(&self, group: &str) -> Option<usize> {
        self.ranks.get(group).copied()
    }

    /// All groups in rank order
    pub fn ordered_groups(&self) -> Vec<Arc<str>> {
        let mut groups: Vec<(&Arc<str>, &usize)> = self.ranks.iter().collect();
        groups.sort_by_key(|(_, rank)| **rank);
        groups.into_iter().map(|(group, _)| Arc::clone(group)).collect()
    }

    pub fn declarations(&self) -> impl Iterator<Item = &PrecedenceDeclaration> {
        self.declarations.values()
    }
}

fn compute_ranks(
    declarations: &IndexMap<String, PrecedenceDeclaration>,
) -> Result<HashMap<Arc<str>, usize>> {
    let mut graph: DiGraph<Arc<str>, ()> = DiGraph::new();
    let mut nodes: IndexMap<&str, NodeIndex> = IndexMap::new();

    for declaration in declarations.values() {
        for group in &declaration.groups {
            if !nodes.contains_key(group.as_str()) {
                let idx = graph.add_node(Arc::from(group.as_str()));
                nodes.insert(group.as_str(), idx);
            }
        }
        for pair in declaration.groups.windows(2) {
            if let (Some(&from), Some(&to)) =
                (nodes.get(pair[0].as_str()), nodes.get(pair[1].as_str()))
            {
                if from == to {
                    return Err(WeftError::PrecedenceCycle {
                        group: pair[0].clone(),
                    });
                }
                graph.update_edge(from, to, ());
            }
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        return Err(WeftError::PrecedenceCycle {
            group: graph[cycle.node_id()].to_string(),
        });
    }

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(idx, _)| Reverse(idx))
        .collect();

    let mut ranks = HashMap::with_capacity(graph.node_count());
    while let Some(Reverse(idx)) = ready.pop() {
        let node = NodeIndex::new(idx);
        ranks.insert(Arc::clone(&graph[node]), ranks.len());
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            let degree = &mut in_degree[next.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(next.index()));
            }
        }
    }
    Ok(ranks)
}

/// Sort items by group rank without moving ungrouped items
///
/// Grouped items are reordered among the slots grouped items already occupy;
/// equal ranks keep insertion order. A group missing from the graph fails.
pub fn sort_by_precedence<T>(
    items: Vec<T>,
    group_of: impl Fn(&T) -> Option<&str>,
    graph: &PrecedenceGraph,
) -> Result<Vec<T>> {
    let mut slots = Vec::new();
    let mut ranked = Vec::new();
    let mut output: Vec<Option<T>> = Vec::with_capacity(items.len());

    for (position, item) in items.into_iter().enumerate() {
        match group_of(&item) {
            Some(group) => {
                let rank = graph.rank(group).ok_or_else(|| WeftError::UnknownPrecedenceGroup {
                    group: group.to_string(),
                    binding: String::new(),
                })?;
                slots.push(position);
                ranked.push((rank, position, item));
                output.push(None);
            }
            None => output.push(Some(item)),
        }
    }

    ranked.sort_by_key(|(rank, position, _)| (*rank, *position));
    for (slot, (_, _, item)) in slots.into_iter().zip(ranked) {
        output[slot] = Some(item);
    }
    Ok(output.into_iter().flatten().collect())
}

/// What a binding contributes to one join point's pending list
#[derive(Clone)]
pub enum Contribution {
    /// A single behavior factory
    Behavior(Arc<dyn BehaviorFactory>),
    /// The binding's behaviors behind a control-flow guard
    Guarded {
        guard: Arc<dyn CflowGuard>,
        behaviors: Vec<Arc<dyn BehaviorFactory>>,
    },
}

/// One entry of a join point's pending list
#[derive(Clone)]
pub struct PendingEntry {
    pub binding: BindingName,
    pub group: Option<Arc<str>>,
    pub contribution: Contribution,
}

/// Sort a pending list, naming the offending binding on an unknown group
pub(crate) fn sort_pending(
    entries: Vec<PendingEntry>,
    graph: &PrecedenceGraph,
) -> Result<Vec<PendingEntry>> {
    if let Some(entry) = entries.iter().find(|entry| {
        entry
            .group
            .as_deref()
            .is_some_and(|group| !graph.contains_group(group))
    }) {
        return Err(WeftError::UnknownPrecedenceGroup {
            group: entry.group.as_deref().unwrap_or_default().to_string(),
            binding: entry.binding.to_string(),
        });
    }
    sort_by_precedence(entries, |entry| entry.group.as_deref(), graph)
}
