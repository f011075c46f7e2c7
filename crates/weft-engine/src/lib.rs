//! Weft Engine - Join-Point Resolution and Interceptor Dispatch
//!
//! The runtime half of the weaver. Given class descriptions, advice bindings
//! and a pointcut matcher, the engine resolves every advisable location of an
//! attached class into a precedence-sorted interceptor chain and dispatches
//! calls through it.
//!
//! # Architecture
//!
//! - **Manager**: [`AspectManager`] owns deployments and the advisor arena
//! - **Advisors**: one [`Advisor`] per attached class, holding its
//!   [`ResolvedJoinPoint`]s
//! - **Resolution**: bindings are matched, sorted by [`PrecedenceGraph`] and
//!   materialized into immutable [`Chain`]s, published atomically
//! - **Dispatch**: an [`Invocation`] walks a chain with a restorable cursor
//!   and ends in the join point's [`DispatchStub`]
//! - **Aspects**: [`AspectInstanceRegistry`] creates each aspect instance once
//!   per scope key
//! - **Overlays**: an [`AdvisedInstance`] may wrap the class chain with
//!   per-object interceptors
//!
//! # Usage
//!
//! ```ignore
//! let manager = AspectManager::builder().matcher(matcher).build()?;
//! manager.add_binding(AdviceBinding::new("audit", "execution(*.save*)").with_interceptor(audit))?;
//! let advisor = manager.attach(class)?;
//! let handle = advisor.register_stub(&identity, DispatchStub::new(|call| body(call)))?;
//! let result = handle.invoke(None, vec![Value::from(42)]);
//! ```

#![allow(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod dispatch;

pub mod advisor;
pub mod aspect;
pub mod aspect_registry;
pub mod binding;
pub mod cflow;
pub mod config;
pub mod invocation;
pub mod joinpoint;
pub mod manager;
pub mod overlay;
pub mod precedence;
pub mod registry;
pub mod resolver;
pub mod stub;

pub use advisor::{Advisor, AdvisorReport, JoinPointReport};
pub use aspect::{AspectContext, AspectDefinition, AspectFactory, AspectInstance, Scope};
pub use aspect_registry::{AspectInstanceRegistry, AspectKey};
pub use binding::{
    Advice, AdviceBinding, AdviceFactory, AdviceKind, BehaviorFactory, FactorySite,
    InterceptorFactory,
};
pub use cflow::{CallStack, CflowGuard, CflowStack, DynamicCflow, Frame, FramePattern};
pub use config::{EngineConfig, ENV_PREFIX};
pub use invocation::{Interceptor, Invocation, InvocationResult, InvocationState};
pub use joinpoint::{CalleeSite, CallerSite, Chain, JoinPointSite, ResolvedJoinPoint};
pub use manager::{AspectManager, AspectManagerBuilder};
pub use overlay::{AdvisedInstance, InstanceOverlay};
pub use precedence::{sort_by_precedence, PrecedenceDeclaration, PrecedenceGraph};
pub use resolver::RebuildReport;
pub use stub::{DispatchStub, DispatchStubBackend, JoinPointHandle, NoStubBackend, StubTable};

pub use weft_core::{Fault, JoinPointIdentity, JoinPointKind, Result, Value, WeftError};

/// Common imports for hosts of the engine
pub mod prelude {
    pub use crate::{
        AdviceBinding, AdviceFactory, AdvisedInstance, Advisor, AspectDefinition, AspectManager,
        CflowStack, DispatchStub, EngineConfig, Interceptor, Invocation, InvocationResult,
        JoinPointHandle, PrecedenceDeclaration, Scope,
    };
    pub use weft_core::{
        ClassDescriptor, Fault, JoinPointIdentity, MethodDescriptor, Modifiers, Pointcut,
        PointcutMatcher, Result, SignatureHash, Value, WeftError,
    };
}
