//! Aspect Instance Registry
//!
//! Lazily creates and caches aspect instances per scope key. Each key owns its
//! own `OnceCell`, so first creation is exactly-once under contention without a
//! global lock: the map lock is only held to find or insert the cell, never
//! while a factory runs. A failed factory leaves the cell empty for a retry.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;
use weft_core::{AdvisorId, AspectName, JoinPointIdentity, ObjectId, Result};

use crate::aspect::{AspectContext, AspectDefinition, AspectInstance, Scope};

/// Cache key of one aspect instance
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AspectKey {
    pub aspect: AspectName,
    pub class: Option<AdvisorId>,
    pub target: Option<ObjectId>,
    pub joinpoint: Option<JoinPointIdentity>,
}

impl AspectKey {
    /// Key for an aspect used at a join point
    ///
    /// Returns `None` for a per-instance aspect reached without a target object;
    /// such advice does not apply to the call.
    pub fn for_scope(
        aspect: &AspectName,
        scope: Scope,
        class: AdvisorId,
        target: Option<ObjectId>,
        joinpoint: &JoinPointIdentity,
    ) -> Option<Self> {
        let aspect = aspect.clone();
        let key = match scope {
            Scope::PerManager => Self {
                aspect,
                class: None,
                target: None,
                joinpoint: None,
            },
            Scope::PerClass => Self {
                aspect,
                class: Some(class),
                target: None,
                joinpoint: None,
            },
            Scope::PerInstance => Self {
                aspect,
                class: Some(class),
                target: Some(target?),
                joinpoint: None,
            },
            Scope::PerJoinpoint => Self {
                aspect,
                class: Some(class),
                target,
                joinpoint: Some(joinpoint.clone()),
            },
            Scope::PerClassJoinpoint => Self {
                aspect,
                class: Some(class),
                target: None,
                joinpoint: Some(joinpoint.clone()),
            },
        };
        Some(key)
    }
}

type Slot = Arc<OnceCell<AspectInstance>>;

/// Cache of live aspect instances
#[derive(Default)]
pub struct AspectInstanceRegistry {
    slots: RwLock<HashMap<AspectKey, Slot>>,
}

impl AspectInstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the instance for `key`, creating it through the definition's factory on first use
    pub fn get_or_create(
        &self,
        definition: &AspectDefinition,
        key: AspectKey,
        context: &AspectContext<'_>,
    ) -> Result<AspectInstance> {
        let slot = self.slot(key);
        slot.get_or_try_init(|| {
            let instance = definition.factory().create(context)?;
            trace!(
                aspect = %definition.name(),
                scope = ?definition.scope(),
                advisor = ?context.advisor,
                target = ?context.target,
                "Created aspect instance"
            );
            Ok(instance)
        })
        .cloned()
    }

    fn slot(&self, key: AspectKey) -> Slot {
        if let Some(slot) = self.slots.read().get(&key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(key).or_default())
    }

    /// Drop every instance keyed to an advisor
    pub fn release_advisor(&self, advisor: AdvisorId) -> usize {
        self.release(|key| key.class == Some(advisor))
    }

    /// Drop every instance keyed to an object
    pub fn release_object(&self, object: ObjectId) -> usize {
        self.release(|key| key.target == Some(object))
    }

    /// Drop every instance of an aspect under every scope
    pub fn remove_aspect(&self, aspect: &AspectName) -> usize {
        self.release(|key| &key.aspect == aspect)
    }

    fn release(&self, predicate: impl Fn(&AspectKey) -> bool) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|key, _| !predicate(key));
        before - slots.len()
    }

    /// Whether an instance has been created for `key`
    pub fn contains(&self, key: &AspectKey) -> bool {
        self.slots
            .read()
            .get(key)
            .is_some_and(|slot| slot.get().is_some())
    }

    /// Number of created instances
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
