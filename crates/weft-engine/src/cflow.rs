//! Control-flow guards
//!
//! Dispatch pushes a [`Frame`] for every join point it enters onto a
//! per-thread call stack. A [`CflowGuard`] inspects that stack (the callers of
//! the current join point, oldest first) together with the invocation itself,
//! and a [`CflowInterceptor`] routes into its private sub-chain only when the
//! guard matches. Otherwise it is a transparent pass-through.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use weft_core::JoinPointIdentity;

use crate::invocation::{Interceptor, Invocation, InvocationResult};
use crate::joinpoint::{Chain, ResolvedJoinPoint};

/// One entered join point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub class: Arc<str>,
    pub member: Arc<str>,
    pub identity: JoinPointIdentity,
}

impl Frame {
    pub(crate) fn of(joinpoint: &ResolvedJoinPoint) -> Self {
        Self {
            class: Arc::clone(joinpoint.class_name()),
            member: Arc::clone(joinpoint.member_name()),
            identity: joinpoint.identity().clone(),
        }
    }
}

thread_local! {
    static CALL_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Per-thread stack of entered join points
pub struct CallStack;

impl CallStack {
    /// Push a frame; it is popped when the guard drops
    pub fn enter(frame: Frame) -> FrameGuard {
        CALL_STACK.with(|stack| stack.borrow_mut().push(frame));
        FrameGuard { _private: () }
    }

    /// Borrow the frames, oldest first
    ///
    /// `f` must not dispatch: entering a join point while the stack is
    /// borrowed panics. Use [`CallStack::snapshot`] for code that may.
    pub fn with<R>(f: impl FnOnce(&[Frame]) -> R) -> R {
        CALL_STACK.with(|stack| f(&stack.borrow()))
    }

    /// Copy of the frames, oldest first
    pub fn snapshot() -> Vec<Frame> {
        CALL_STACK.with(|stack| stack.borrow().clone())
    }

    pub fn depth() -> usize {
        CALL_STACK.with(|stack| stack.borrow().len())
    }
}

/// Pops the frame pushed by [`CallStack::enter`]
#[must_use = "the frame is popped when the guard drops"]
pub struct FrameGuard {
    _private: (),
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        CALL_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Decides whether a guarded sub-chain runs for this call
pub trait CflowGuard: Send + Sync {
    fn name(&self) -> &str;

    /// `callers` excludes the current join point's own frame
    fn should_execute(&self, callers: &[Frame], invocation: &Invocation<'_>) -> bool;
}

/// Frame pattern; `*` matches any class or member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePattern {
    pub class: Arc<str>,
    pub member: Arc<str>,
}

impl FramePattern {
    pub fn new(class: impl Into<Arc<str>>, member: impl Into<Arc<str>>) -> Self {
        Self {
            class: class.into(),
            member: member.into(),
        }
    }

    pub fn matches(&self, frame: &Frame) -> bool {
        (&*self.class == "*" || self.class == frame.class)
            && (&*self.member == "*" || self.member == frame.member)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CflowEntry {
    pattern: FramePattern,
    negated: bool,
}

/// Ordered call-stack condition
///
/// Entries are checked outermost first. A `calls` entry must match a frame
/// above the frame matched by the previous `calls` entry; a `not_calls` entry
/// must match no frame in the region still to be searched.
#[derive(Debug, Clone)]
pub struct CflowStack {
    name: Arc<str>,
    entries: Vec<CflowEntry>,
}

impl CflowStack {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Require a caller frame matching `class` and `member`
    pub fn calls(mut self, class: impl Into<Arc<str>>, member: impl Into<Arc<str>>) -> Self {
        self.entries.push(CflowEntry {
            pattern: FramePattern::new(class, member),
            negated: false,
        });
        self
    }

    /// Forbid a caller frame matching `class` and `member`
    pub fn not_calls(mut self, class: impl Into<Arc<str>>, member: impl Into<Arc<str>>) -> Self {
        self.entries.push(CflowEntry {
            pattern: FramePattern::new(class, member),
            negated: true,
        });
        self
    }

    /// Evaluate against caller frames, oldest first
    pub fn matches(&self, callers: &[Frame]) -> bool {
        let mut from = 0;
        for entry in &self.entries {
            let region = callers.get(from..).unwrap_or_default();
            let found = region.iter().position(|frame| entry.pattern.matches(frame));
            match (found, entry.negated) {
                (Some(_), true) | (None, false) => return false,
                (Some(offset), false) => from += offset + 1,
                (None, true) => {}
            }
        }
        true
    }
}

impl CflowGuard for CflowStack {
    fn name(&self) -> &str {
        &self.name
    }

    fn should_execute(&self, callers: &[Frame], _invocation: &Invocation<'_>) -> bool {
        self.matches(callers)
    }
}

/// Guard evaluated by a closure over callers and the invocation
pub struct DynamicCflow<F> {
    name: Arc<str>,
    predicate: F,
}

impl<F> DynamicCflow<F>
where
    F: Fn(&[Frame], &Invocation<'_>) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<Arc<str>>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> CflowGuard for DynamicCflow<F>
where
    F: Fn(&[Frame], &Invocation<'_>) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn should_execute(&self, callers: &[Frame], invocation: &Invocation<'_>) -> bool {
        (self.predicate)(callers, invocation)
    }
}

/// Routes into a private sub-chain when its guard matches
pub(crate) struct CflowInterceptor {
    guard: Arc<dyn CflowGuard>,
    sub_chain: Arc<Chain>,
}

impl CflowInterceptor {
    pub(crate) fn new(guard: Arc<dyn CflowGuard>, sub_chain: Chain) -> Self {
        Self {
            guard,
            sub_chain: Arc::new(sub_chain),
        }
    }
}

impl Interceptor for CflowInterceptor {
    fn name(&self) -> &str {
        self.guard.name()
    }

    fn invoke(&self, invocation: &mut Invocation<'_>) -> InvocationResult {
        let tracked = invocation.context().config.track_call_stack;
        // Guards may dispatch, so they must see a copy and not the live stack
        let mut frames = CallStack::snapshot();
        if tracked {
            frames.pop();
        }
        let matched = self.guard.should_execute(&frames, invocation);
        if matched {
            invocation.invoke_sub_chain(Arc::clone(&self.sub_chain))
        } else {
            invocation.invoke_next()
        }
    }
}

impl fmt::Debug for CflowInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CflowInterceptor")
            .field("guard", &self.guard.name())
            .field("sub_chain", &self.sub_chain)
            .finish()
    }
}
