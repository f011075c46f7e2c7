//! Advice binding registry
//!
//! Deployed bindings in deployment order, each with the set of advisors whose
//! chains it currently contributes to. The back-reference set is an index
//! into the manager's advisor arena, which is how removing a binding finds
//! exactly the advisors it has to rebuild.

use indexmap::IndexMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use weft_core::{AdvisorId, AspectName, BindingName, Result, WeftError};

use crate::binding::AdviceBinding;
use crate::precedence::{PrecedenceDeclaration, PrecedenceGraph};

struct BindingEntry {
    binding: Arc<AdviceBinding>,
    advisors: BTreeSet<AdvisorId>,
}

/// Deployed bindings and precedence declarations
#[derive(Default)]
pub struct BindingRegistry {
    bindings: IndexMap<BindingName, BindingEntry>,
    precedence: PrecedenceGraph,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy a binding; its precedence group must already be declared
    pub fn add(&mut self, binding: AdviceBinding) -> Result<Arc<AdviceBinding>> {
        if self.bindings.contains_key(binding.name()) {
            return Err(WeftError::DuplicateBinding {
                name: binding.name().to_string(),
            });
        }
        if let Some(group) = binding.precedence_group() {
            if !self.precedence.contains_group(group) {
                return Err(WeftError::UnknownPrecedenceGroup {
                    group: group.to_string(),
                    binding: binding.name().to_string(),
                });
            }
        }
        let binding = Arc::new(binding);
        self.bindings.insert(
            binding.name().clone(),
            BindingEntry {
                binding: Arc::clone(&binding),
                advisors: BTreeSet::new(),
            },
        );
        Ok(binding)
    }

    /// Withdraw a binding, returning the advisors it was applied to
    pub fn remove(&mut self, name: &BindingName) -> Result<BTreeSet<AdvisorId>> {
        self.bindings
            .shift_remove(name)
            .map(|entry| entry.advisors)
            .ok_or_else(|| WeftError::UnknownBinding {
                name: name.to_string(),
            })
    }

    pub fn get(&self, name: &BindingName) -> Option<&Arc<AdviceBinding>> {
        self.bindings.get(name).map(|entry| &entry.binding)
    }

    /// Bindings in deployment order
    pub fn bindings(&self) -> impl Iterator<Item = &Arc<AdviceBinding>> {
        self.bindings.values().map(|entry| &entry.binding)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn register_advisor(&mut self, name: &BindingName, advisor: AdvisorId) {
        if let Some(entry) = self.bindings.get_mut(name) {
            entry.advisors.insert(advisor);
        }
    }

    pub fn deregister_advisor(&mut self, name: &BindingName, advisor: AdvisorId) {
        if let Some(entry) = self.bindings.get_mut(name) {
            entry.advisors.remove(&advisor);
        }
    }

    /// Drop an advisor from every back-reference set
    pub fn forget_advisor(&mut self, advisor: AdvisorId) {
        for entry in self.bindings.values_mut() {
            entry.advisors.remove(&advisor);
        }
    }

    /// Advisors a binding currently contributes to
    pub fn advisors_for(&self, name: &BindingName) -> BTreeSet<AdvisorId> {
        self.bindings
            .get(name)
            .map(|entry| entry.advisors.clone())
            .unwrap_or_default()
    }

    /// Names of bindings with a behavior backed by `aspect`
    pub fn bindings_using_aspect(&self, aspect: &AspectName) -> Vec<BindingName> {
        self.bindings
            .values()
            .filter(|entry| entry.binding.uses_aspect(aspect))
            .map(|entry| entry.binding.name().clone())
            .collect()
    }

    pub fn precedence(&self) -> &PrecedenceGraph {
        &self.precedence
    }

    pub fn declare_precedence(&mut self, declaration: PrecedenceDeclaration) -> Result<()> {
        self.precedence.declare(declaration)
    }

    /// Withdraw a declaration unless a deployed binding still needs one of its groups
    pub fn withdraw_precedence(&mut self, name: &str) -> Result<PrecedenceDeclaration> {
        let remaining = self.precedence.groups_without(name);
        if let Some(binding) = self.bindings().find(|binding| {
            binding
                .precedence_group()
                .is_some_and(|group| !remaining.contains(&**group))
        }) {
            return Err(WeftError::configuration(format!(
                "Precedence '{name}' orders group '{}' still used by binding '{}'",
                binding.precedence_group().map(|g| &**g).unwrap_or_default(),
                binding.name()
            )));
        }
        self.precedence.withdraw(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_and_unknown_group_rejected() {
        let mut registry = BindingRegistry::new();
        registry.add(AdviceBinding::new("a", "all(*)")).unwrap();

        let dup = registry.add(AdviceBinding::new("a", "all(*)")).unwrap_err();
        assert!(matches!(dup, WeftError::DuplicateBinding { .. }));

        let grouped = registry
            .add(AdviceBinding::new("b", "all(*)").in_group("tx"))
            .unwrap_err();
        assert_eq!(
            grouped,
            WeftError::UnknownPrecedenceGroup {
                group: "tx".to_string(),
                binding: "b".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_returns_back_references() {
        let mut registry = BindingRegistry::new();
        let name = BindingName::from("audit");
        registry.add(AdviceBinding::new("audit", "all(*)")).unwrap();
        registry.register_advisor(&name, AdvisorId(1));
        registry.register_advisor(&name, AdvisorId(2));
        registry.deregister_advisor(&name, AdvisorId(2));

        let advisors = registry.remove(&name).unwrap();
        assert_eq!(advisors.into_iter().collect::<Vec<_>>(), vec![AdvisorId(1)]);
        assert!(registry.remove(&name).is_err());
    }

    #[test]
    fn test_precedence_in_use_cannot_be_withdrawn() {
        let mut registry = BindingRegistry::new();
        registry
            .declare_precedence(PrecedenceDeclaration::new("order", ["tx", "log"]))
            .unwrap();
        registry
            .add(AdviceBinding::new("b", "all(*)").in_group("tx"))
            .unwrap();

        assert!(registry.withdraw_precedence("order").is_err());
        registry.remove(&BindingName::from("b")).unwrap();
        assert!(registry.withdraw_precedence("order").is_ok());
    }
}
