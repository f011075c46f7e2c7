//! Dispatch stubs
//!
//! A dispatch stub is the executable entry point of a join point's real body:
//! the code a weaving backend generated to run the original method, field
//! access or constructor once the chain is exhausted. Stubs reach the engine
//! two ways: the host registers one through [`crate::Advisor::register_stub`]
//! and keeps the returned [`JoinPointHandle`], or a [`DispatchStubBackend`]
//! produces one on demand when rebuild finds an advised join point without a
//! stub.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use weft_core::{ClassDescriptor, JoinPointIdentity, Value};

use crate::advisor::Advisor;
use crate::dispatch::dispatch;
use crate::invocation::{Invocation, InvocationResult};
use crate::joinpoint::{Chain, ResolvedJoinPoint};
use crate::overlay::AdvisedInstance;

type StubFn = dyn Fn(&mut Invocation<'_>) -> InvocationResult + Send + Sync;

/// Entry point into a join point's real body
pub struct DispatchStub {
    call: Box<StubFn>,
}

impl DispatchStub {
    pub fn new<F>(call: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> InvocationResult + Send + Sync + 'static,
    {
        Self {
            call: Box::new(call),
        }
    }

    pub(crate) fn call(&self, invocation: &mut Invocation<'_>) -> InvocationResult {
        (self.call)(invocation)
    }
}

impl fmt::Debug for DispatchStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DispatchStub")
    }
}

/// Produces or reuses dispatch stubs for join points
pub trait DispatchStubBackend: Send + Sync {
    /// `None` when the member has no executable body to route to
    fn ensure_dispatch_stub(
        &self,
        class: &ClassDescriptor,
        identity: &JoinPointIdentity,
    ) -> Option<Arc<DispatchStub>>;
}

/// Backend that never produces stubs; only registered stubs are used
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStubBackend;

impl DispatchStubBackend for NoStubBackend {
    fn ensure_dispatch_stub(
        &self,
        _class: &ClassDescriptor,
        _identity: &JoinPointIdentity,
    ) -> Option<Arc<DispatchStub>> {
        None
    }
}

/// Backend serving stubs from a table filled ahead of time
#[derive(Default)]
pub struct StubTable {
    stubs: RwLock<HashMap<(Arc<str>, JoinPointIdentity), Arc<DispatchStub>>>,
}

impl StubTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        class: impl Into<Arc<str>>,
        identity: JoinPointIdentity,
        stub: DispatchStub,
    ) -> &Self {
        self.stubs
            .write()
            .insert((class.into(), identity), Arc::new(stub));
        self
    }

    pub fn len(&self) -> usize {
        self.stubs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DispatchStubBackend for StubTable {
    fn ensure_dispatch_stub(
        &self,
        class: &ClassDescriptor,
        identity: &JoinPointIdentity,
    ) -> Option<Arc<DispatchStub>> {
        self.stubs
            .read()
            .get(&(Arc::clone(&class.name), identity.clone()))
            .cloned()
    }
}

/// Pinned join point returned to the host when it registers a stub
///
/// Invoking through the handle skips the identity lookup entirely.
#[derive(Clone)]
pub struct JoinPointHandle {
    joinpoint: Arc<ResolvedJoinPoint>,
    advisor: Arc<Advisor>,
}

impl JoinPointHandle {
    pub(crate) fn new(advisor: Arc<Advisor>, joinpoint: Arc<ResolvedJoinPoint>) -> Self {
        Self { joinpoint, advisor }
    }

    /// Dispatch a call through the join point's current chain
    pub fn invoke(&self, target: Option<&AdvisedInstance>, args: Vec<Value>) -> InvocationResult {
        dispatch(&self.advisor, &self.joinpoint, target, args)
    }

    pub fn identity(&self) -> &JoinPointIdentity {
        self.joinpoint.identity()
    }

    pub fn joinpoint(&self) -> &Arc<ResolvedJoinPoint> {
        &self.joinpoint
    }

    pub fn advisor(&self) -> &Arc<Advisor> {
        &self.advisor
    }

    /// Current class-level chain
    pub fn chain(&self) -> Option<Arc<Chain>> {
        self.joinpoint.chain()
    }
}

impl fmt::Debug for JoinPointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPointHandle")
            .field("advisor", &self.joinpoint.advisor())
            .field("identity", self.joinpoint.identity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::SignatureHash;

    #[test]
    fn test_stub_table_serves_by_class_and_identity() {
        let identity = JoinPointIdentity::MethodExecution {
            method: SignatureHash::method("run", "()V"),
        };
        let table = StubTable::new();
        table.insert("com.acme.Job", identity.clone(), DispatchStub::new(|_| Ok(Value::Unit)));

        let job = ClassDescriptor::new("com.acme.Job");
        let other = ClassDescriptor::new("com.acme.Other");
        assert!(table.ensure_dispatch_stub(&job, &identity).is_some());
        assert!(table.ensure_dispatch_stub(&other, &identity).is_none());
        assert!(NoStubBackend.ensure_dispatch_stub(&job, &identity).is_none());
        assert_eq!(table.len(), 1);
    }
}
