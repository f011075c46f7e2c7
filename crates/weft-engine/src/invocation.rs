//! Invocation Dispatcher
//!
//! An [`Invocation`] walks one finalized chain for one call. Every interceptor
//! is around-style: it receives the invocation and decides whether and how
//! often to call [`Invocation::invoke_next`]. Once the chain is exhausted the
//! dispatch stub runs the real member body.
//!
//! The cursor is restored when a nested `invoke_next` returns, so an
//! interceptor may call it repeatedly (retries) and always re-enters the same
//! remainder of the chain. Control-flow guards push a private sub-chain
//! segment; when a segment is exhausted the enclosing chain resumes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use weft_core::{AdvisorId, Fault, JoinPointIdentity, ObjectId, Result, Value};

use crate::aspect::{AspectContext, AspectDefinition, AspectInstance};
use crate::aspect_registry::AspectKey;
use crate::context::EngineContext;
use crate::joinpoint::{Chain, ResolvedJoinPoint};
use crate::overlay::AdvisedInstance;
use crate::stub::DispatchStub;

/// Outcome of an advised call
pub type InvocationResult = std::result::Result<Value, Fault>;

/// Runtime unit of advice on a chain
pub trait Interceptor: Send + Sync {
    /// Name reported in chain listings
    fn name(&self) -> &str;

    /// Run around the rest of the chain
    fn invoke(&self, invocation: &mut Invocation<'_>) -> InvocationResult;
}

/// Lifecycle of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    NotStarted,
    /// Interceptor at `cursor` is running; `cursor == len` means the stub is running
    Running { cursor: usize },
    /// Interceptor at `cursor` of the guarded sub-chain nested `depth` deep is running
    Guarded { depth: usize, cursor: usize },
    Completed,
    Faulted,
}

struct Segment {
    chain: Arc<Chain>,
    cursor: usize,
}

/// One call travelling through a chain
pub struct Invocation<'a> {
    joinpoint: &'a ResolvedJoinPoint,
    context: &'a EngineContext,
    target: Option<&'a AdvisedInstance>,
    args: Vec<Value>,
    metadata: Option<HashMap<String, Value>>,
    chain: &'a [Arc<dyn Interceptor>],
    cursor: usize,
    segments: Vec<Segment>,
    stub: &'a DispatchStub,
    state: InvocationState,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        joinpoint: &'a ResolvedJoinPoint,
        context: &'a EngineContext,
        target: Option<&'a AdvisedInstance>,
        args: Vec<Value>,
        chain: &'a [Arc<dyn Interceptor>],
        stub: &'a DispatchStub,
    ) -> Self {
        Self {
            joinpoint,
            context,
            target,
            args,
            metadata: None,
            chain,
            cursor: 0,
            segments: Vec::new(),
            stub,
            state: InvocationState::NotStarted,
        }
    }

    /// Run the next interceptor, or the member body once the chain is exhausted
    pub fn invoke_next(&mut self) -> InvocationResult {
        let depth = self.segments.len();
        if let Some(segment) = self.segments.last_mut() {
            if let Some(interceptor) = segment.chain.interceptors().get(segment.cursor).cloned() {
                let saved = (segment.cursor, self.state);
                self.state = InvocationState::Guarded {
                    depth,
                    cursor: segment.cursor,
                };
                segment.cursor += 1;
                let result = interceptor.invoke(self);
                if let Some(segment) = self.segments.last_mut() {
                    segment.cursor = saved.0;
                }
                self.state = saved.1;
                return result;
            }
            if let Some(exhausted) = self.segments.pop() {
                let result = self.invoke_next();
                self.segments.push(exhausted);
                return result;
            }
        }

        let chain = self.chain;
        let saved = (self.cursor, self.state);
        let result = match chain.get(self.cursor) {
            Some(interceptor) => {
                self.state = InvocationState::Running {
                    cursor: self.cursor,
                };
                self.cursor += 1;
                interceptor.invoke(self)
            }
            None => {
                self.state = InvocationState::Running {
                    cursor: chain.len(),
                };
                let stub = self.stub;
                stub.call(self)
            }
        };
        (self.cursor, self.state) = saved;
        result
    }

    /// Run a private sub-chain, then continue with the rest of this chain
    pub(crate) fn invoke_sub_chain(&mut self, chain: Arc<Chain>) -> InvocationResult {
        self.segments.push(Segment { chain, cursor: 0 });
        let result = self.invoke_next();
        self.segments.pop();
        result
    }

    /// Run the whole chain and apply declared-fault filtering
    pub(crate) fn proceed(&mut self) -> InvocationResult {
        match self.invoke_next() {
            Ok(value) => {
                self.state = InvocationState::Completed;
                Ok(value)
            }
            Err(fault) => {
                self.state = InvocationState::Faulted;
                Err(fault.filter_declared(self.joinpoint.site().declared_faults()))
            }
        }
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Replace an argument; returns `false` when the index is out of range
    pub fn set_arg(&mut self, index: usize, value: impl Into<Value>) -> bool {
        match self.args.get_mut(index) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    pub fn args_mut(&mut self) -> &mut Vec<Value> {
        &mut self.args
    }

    pub fn target(&self) -> Option<&'a AdvisedInstance> {
        self.target
    }

    pub fn target_id(&self) -> Option<ObjectId> {
        self.target.map(AdvisedInstance::id)
    }

    pub fn joinpoint(&self) -> &'a ResolvedJoinPoint {
        self.joinpoint
    }

    pub fn identity(&self) -> &'a JoinPointIdentity {
        self.joinpoint.identity()
    }

    pub fn advisor(&self) -> AdvisorId {
        self.joinpoint.advisor()
    }

    pub fn class_name(&self) -> &'a str {
        self.joinpoint.class_name()
    }

    /// Metadata from this invocation's bag, falling back to the member's metadata
    pub fn metadata(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.metadata.as_ref().and_then(|bag| bag.get(key)) {
            return Some(value.clone());
        }
        let site = self.joinpoint.site();
        self.context
            .metadata
            .resolve(self.joinpoint.class_name(), site.member_ref(), key)
    }

    /// Attach metadata visible to the rest of this invocation
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
    }

    /// Number of interceptors on the top-level chain
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// Instance of `aspect` for this call, created on first use
    ///
    /// `None` when the aspect is per-instance and the call has no target.
    pub fn aspect_instance(&self, aspect: &AspectDefinition) -> Result<Option<AspectInstance>> {
        let Some(key) = AspectKey::for_scope(
            aspect.name(),
            aspect.scope(),
            self.advisor(),
            self.target_id(),
            self.identity(),
        ) else {
            return Ok(None);
        };
        let context = AspectContext {
            aspect: aspect.name(),
            scope: aspect.scope(),
            advisor: Some(self.advisor()),
            class: Some(self.class_name()),
            target: self.target_id(),
            joinpoint: Some(self.identity()),
        };
        self.context
            .aspects
            .get_or_create(aspect, key, &context)
            .map(Some)
    }

    pub(crate) fn context(&self) -> &'a EngineContext {
        self.context
    }
}

impl fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("identity", self.identity())
            .field("class", &self.class_name())
            .field("target", &self.target_id())
            .field("args", &self.args)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EngineContext;
    use crate::joinpoint::JoinPointSite;
    use parking_lot::Mutex;
    use weft_core::{MethodDescriptor, MetadataTable, MemberRef};

    struct Stage {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        calls: usize,
    }

    impl Interceptor for Stage {
        fn name(&self) -> &str {
            self.name
        }

        fn invoke(&self, invocation: &mut Invocation<'_>) -> InvocationResult {
            self.log
                .lock()
                .push(format!("{}:{:?}", self.name, invocation.state()));
            let mut result = Ok(Value::Unit);
            for _ in 0..self.calls {
                result = invocation.invoke_next();
            }
            result
        }
    }

    fn joinpoint() -> ResolvedJoinPoint {
        let method = MethodDescriptor::new("com.acme.Account", "deposit", "(J)V")
            .declaring_fault("java.io.IOException");
        ResolvedJoinPoint::new(
            AdvisorId(0),
            Arc::from("com.acme.Account"),
            JoinPointSite::Method(method),
        )
    }

    fn stage(
        name: &'static str,
        calls: usize,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn Interceptor> {
        Arc::new(Stage {
            name,
            log: Arc::clone(log),
            calls,
        })
    }

    #[test]
    fn test_chain_runs_in_order_then_stub() {
        let context = EngineContext::for_tests();
        let jp = joinpoint();
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![stage("a", 1, &log), stage("b", 1, &log)];
        let stub_log = Arc::clone(&log);
        let stub = DispatchStub::new(move |invocation| {
            stub_log.lock().push(format!("body:{:?}", invocation.state()));
            Ok(Value::from(invocation.args().len() as i64))
        });

        let mut invocation =
            Invocation::new(&jp, &context, None, vec![Value::from(5i64)], &chain, &stub);
        assert_eq!(invocation.state(), InvocationState::NotStarted);
        assert_eq!(invocation.proceed(), Ok(Value::Int(1)));
        assert_eq!(invocation.state(), InvocationState::Completed);
        assert_eq!(
            *log.lock(),
            vec![
                "a:Running { cursor: 0 }",
                "b:Running { cursor: 1 }",
                "body:Running { cursor: 2 }"
            ]
        );
    }

    #[test]
    fn test_retry_reenters_remaining_chain() {
        let context = EngineContext::for_tests();
        let jp = joinpoint();
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![stage("retry", 2, &log), stage("inner", 1, &log)];
        let stub = DispatchStub::new(|_| Ok(Value::Unit));

        let mut invocation = Invocation::new(&jp, &context, None, Vec::new(), &chain, &stub);
        assert!(invocation.proceed().is_ok());
        let entries = log.lock().clone();
        assert_eq!(
            entries,
            vec![
                "retry:Running { cursor: 0 }",
                "inner:Running { cursor: 1 }",
                "inner:Running { cursor: 1 }"
            ]
        );
    }

    struct Branch {
        sub_chain: Arc<Chain>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Interceptor for Branch {
        fn name(&self) -> &str {
            "branch"
        }

        fn invoke(&self, invocation: &mut Invocation<'_>) -> InvocationResult {
            let result = invocation.invoke_sub_chain(Arc::clone(&self.sub_chain));
            self.log
                .lock()
                .push(format!("branch:{:?}", invocation.state()));
            result
        }
    }

    #[test]
    fn test_state_tracks_guarded_sub_chain() {
        let context = EngineContext::for_tests();
        let jp = joinpoint();
        let log = Arc::new(Mutex::new(Vec::new()));
        let branch: Arc<dyn Interceptor> = Arc::new(Branch {
            sub_chain: Arc::new(Chain::new(vec![stage("guarded", 1, &log)])),
            log: Arc::clone(&log),
        });
        let chain = vec![branch, stage("after", 1, &log)];
        let stub = DispatchStub::new(|_| Ok(Value::Unit));

        let mut invocation = Invocation::new(&jp, &context, None, Vec::new(), &chain, &stub);
        assert!(invocation.proceed().is_ok());
        assert_eq!(
            *log.lock(),
            vec![
                "guarded:Guarded { depth: 1, cursor: 0 }",
                "after:Running { cursor: 1 }",
                "branch:Running { cursor: 0 }"
            ]
        );
    }

    #[test]
    fn test_short_circuit_skips_body() {
        let context = EngineContext::for_tests();
        let jp = joinpoint();
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![stage("gate", 0, &log)];
        let stub = DispatchStub::new(|_| Err(Fault::unchecked("Unreachable", "body ran")));

        let mut invocation = Invocation::new(&jp, &context, None, Vec::new(), &chain, &stub);
        assert_eq!(invocation.proceed(), Ok(Value::Unit));
    }

    #[test]
    fn test_undeclared_checked_fault_is_wrapped_at_boundary() {
        let context = EngineContext::for_tests();
        let jp = joinpoint();
        let declared = DispatchStub::new(|_| Err(Fault::checked("java.io.IOException", "eof")));
        let undeclared = DispatchStub::new(|_| Err(Fault::checked("java.sql.SQLException", "x")));

        let mut invocation = Invocation::new(&jp, &context, None, Vec::new(), &[], &declared);
        let fault = invocation.proceed().unwrap_err();
        assert!(fault.is("java.io.IOException"));
        assert_eq!(invocation.state(), InvocationState::Faulted);

        let mut invocation = Invocation::new(&jp, &context, None, Vec::new(), &[], &undeclared);
        let fault = invocation.proceed().unwrap_err();
        assert!(fault.is(Fault::UNDECLARED));
        assert!(fault.cause.is_some_and(|cause| cause.is("java.sql.SQLException")));
    }

    #[test]
    fn test_metadata_bag_falls_back_to_provider() {
        let table = MetadataTable::new().with(
            "com.acme.Account",
            MemberRef::Method {
                name: "deposit",
                descriptor: "(J)V",
            },
            "tx",
            "required",
        );
        let context = EngineContext::for_tests_with_metadata(Arc::new(table));
        let jp = joinpoint();
        let stub = DispatchStub::new(|invocation| {
            Ok(invocation.metadata("tx").unwrap_or_default())
        });

        let mut invocation = Invocation::new(&jp, &context, None, Vec::new(), &[], &stub);
        assert_eq!(invocation.proceed(), Ok(Value::from("required")));

        let mut invocation = Invocation::new(&jp, &context, None, Vec::new(), &[], &stub);
        invocation.set_metadata("tx", "never");
        assert_eq!(invocation.proceed(), Ok(Value::from("never")));
    }

    #[test]
    fn test_set_arg_bounds() {
        let context = EngineContext::for_tests();
        let jp = joinpoint();
        let stub = DispatchStub::new(|invocation| Ok(invocation.args()[0].clone()));
        let mut invocation =
            Invocation::new(&jp, &context, None, vec![Value::from(1i64)], &[], &stub);
        assert!(invocation.set_arg(0, 9i64));
        assert!(!invocation.set_arg(3, 9i64));
        assert_eq!(invocation.proceed(), Ok(Value::Int(9)));
    }
}
