//! Aspect definitions
//!
//! An aspect is the stateful object behind one or more pieces of advice. Its
//! [`Scope`] decides how many instances exist: one per manager, per advised
//! class, per advised object, per join point, or per (class, join point).

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use weft_core::{AdvisorId, AspectName, JoinPointIdentity, ObjectId, Result};

/// Lifetime scope of aspect instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// One instance for the whole manager
    PerManager,
    /// One instance per advised class
    PerClass,
    /// One instance per advised object; calls without a target skip the advice
    PerInstance,
    /// One instance per join point, further split by target object when there is one
    PerJoinpoint,
    /// One instance per (class, join point), shared by all objects of the class
    PerClassJoinpoint,
}

impl Scope {
    /// Whether the instance can differ between calls through the same join point
    pub fn varies_by_target(self) -> bool {
        matches!(self, Self::PerInstance | Self::PerJoinpoint)
    }
}

/// A created aspect instance
pub type AspectInstance = Arc<dyn Any + Send + Sync>;

/// What the factory knows about the instance being created
#[derive(Debug, Clone, Copy)]
pub struct AspectContext<'a> {
    pub aspect: &'a AspectName,
    pub scope: Scope,
    pub advisor: Option<AdvisorId>,
    pub class: Option<&'a str>,
    pub target: Option<ObjectId>,
    pub joinpoint: Option<&'a JoinPointIdentity>,
}

/// Creates aspect instances
///
/// A factory error is not cached; the next access calls the factory again.
pub trait AspectFactory: Send + Sync {
    fn create(&self, context: &AspectContext<'_>) -> Result<AspectInstance>;
}

impl<F> AspectFactory for F
where
    F: Fn(&AspectContext<'_>) -> Result<AspectInstance> + Send + Sync,
{
    fn create(&self, context: &AspectContext<'_>) -> Result<AspectInstance> {
        self(context)
    }
}

/// Named aspect with its scope and factory
#[derive(Clone)]
pub struct AspectDefinition {
    name: AspectName,
    scope: Scope,
    factory: Arc<dyn AspectFactory>,
}

impl AspectDefinition {
    pub fn new(
        name: impl Into<AspectName>,
        scope: Scope,
        factory: impl AspectFactory + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            scope,
            factory: Arc::new(factory),
        }
    }

    /// Definition whose factory builds a fresh `T` from `Default`
    pub fn of_default<T>(name: impl Into<AspectName>, scope: Scope) -> Self
    where
        T: Default + Send + Sync + 'static,
    {
        Self::new(name, scope, |_: &AspectContext<'_>| {
            Ok(Arc::new(T::default()) as AspectInstance)
        })
    }

    pub fn name(&self) -> &AspectName {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub(crate) fn factory(&self) -> &dyn AspectFactory {
        self.factory.as_ref()
    }
}

impl fmt::Debug for AspectDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectDefinition")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
