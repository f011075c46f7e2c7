//! Dispatch entry point
//!
//! Loads the join point's published chain and stub, composes the target's
//! overlay when it has one, and runs a fresh [`Invocation`]. An unadvised
//! join point on a target without overlay runs the stub directly through an
//! empty chain, with no allocation beyond the argument vector.

use std::sync::Arc;
use weft_core::{Fault, Value, WeftError};

use crate::advisor::Advisor;
use crate::cflow::{CallStack, Frame};
use crate::invocation::{Invocation, InvocationResult};
use crate::joinpoint::{Chain, ResolvedJoinPoint};
use crate::overlay::AdvisedInstance;
use crate::stub::DispatchStub;

pub(crate) fn dispatch(
    advisor: &Advisor,
    joinpoint: &ResolvedJoinPoint,
    target: Option<&AdvisedInstance>,
    args: Vec<Value>,
) -> InvocationResult {
    let context = advisor.context();
    let stub = match joinpoint.stub.load_full() {
        Some(stub) => stub,
        None => install_stub(advisor, joinpoint)?,
    };

    let class_chain = joinpoint.chain.load_full();
    let chain = match target {
        Some(target) => target
            .chain_for(joinpoint, class_chain)
            .map_err(Fault::from)?,
        None => class_chain,
    };
    let interceptors = chain.as_deref().map_or(&[][..], Chain::interceptors);

    let _frame = context
        .config
        .track_call_stack
        .then(|| CallStack::enter(Frame::of(joinpoint)));
    Invocation::new(joinpoint, context, target, args, interceptors, &stub).proceed()
}

/// Ask the backend for a stub the host never registered
fn install_stub(
    advisor: &Advisor,
    joinpoint: &ResolvedJoinPoint,
) -> Result<Arc<DispatchStub>, Fault> {
    let class = advisor.class();
    match advisor
        .context()
        .stubs
        .ensure_dispatch_stub(&class, joinpoint.identity())
    {
        Some(stub) => {
            joinpoint.stub.store(Some(Arc::clone(&stub)));
            Ok(stub)
        }
        None => Err(Fault::from(WeftError::MissingDispatchStub {
            class: class.name.to_string(),
            identity: joinpoint.identity().to_string(),
        })),
    }
}
