//! Resolved join points
//!
//! One [`ResolvedJoinPoint`] exists per advisable location of an advisor. Its
//! finalized [`Chain`] is published through an `ArcSwapOption`: readers load an
//! immutable snapshot, rebuilds replace the whole chain, and `None` means no
//! advice applies so dispatch goes straight to the member body.
//!
//! A join point keeps its identity for the advisor's lifetime. Redeclaring the
//! member swaps the site in place, so handles and stubs stay attached.

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use weft_core::{
    AdvisorId, Callee, Caller, ConstructorDescriptor, FieldDescriptor, JoinPointIdentity,
    MatchTarget, MemberRef, MethodDescriptor,
};

use crate::invocation::Interceptor;
use crate::precedence::PendingEntry;
use crate::stub::DispatchStub;

/// Member hosting a call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerSite {
    Method(MethodDescriptor),
    Constructor(ConstructorDescriptor),
}

/// Member invoked by a call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalleeSite {
    Method(MethodDescriptor),
    Constructor(ConstructorDescriptor),
}

/// The member behind a join point, owned so the join point outlives descriptor changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinPointSite {
    Method(MethodDescriptor),
    FieldRead(FieldDescriptor),
    FieldWrite(FieldDescriptor),
    ConstructorExecution(ConstructorDescriptor),
    Construction(ConstructorDescriptor),
    Call {
        caller: CallerSite,
        callee_class: Arc<str>,
        callee: CalleeSite,
    },
}

impl JoinPointSite {
    /// Identity this site is keyed by
    pub fn identity(&self) -> JoinPointIdentity {
        match self {
            JoinPointSite::Method(method) => JoinPointIdentity::MethodExecution {
                method: method.hash(),
            },
            JoinPointSite::FieldRead(field) => JoinPointIdentity::FieldRead { field: field.index },
            JoinPointSite::FieldWrite(field) => {
                JoinPointIdentity::FieldWrite { field: field.index }
            }
            JoinPointSite::ConstructorExecution(ctor) => JoinPointIdentity::ConstructorExecution {
                constructor: ctor.index,
            },
            JoinPointSite::Construction(ctor) => JoinPointIdentity::Construction {
                constructor: ctor.index,
            },
            JoinPointSite::Call {
                caller,
                callee_class,
                callee,
            } => {
                let callee_class = Arc::clone(callee_class);
                match (caller, callee) {
                    (CallerSite::Method(caller), CalleeSite::Method(callee)) => {
                        JoinPointIdentity::MethodCalledByMethod {
                            caller: caller.hash(),
                            callee_class,
                            callee: callee.hash(),
                        }
                    }
                    (CallerSite::Constructor(caller), CalleeSite::Method(callee)) => {
                        JoinPointIdentity::MethodCalledByConstructor {
                            caller: caller.index,
                            callee_class,
                            callee: callee.hash(),
                        }
                    }
                    (CallerSite::Method(caller), CalleeSite::Constructor(callee)) => {
                        JoinPointIdentity::ConstructorCalledByMethod {
                            caller: caller.hash(),
                            callee_class,
                            callee: callee.hash(),
                        }
                    }
                    (CallerSite::Constructor(caller), CalleeSite::Constructor(callee)) => {
                        JoinPointIdentity::ConstructorCalledByConstructor {
                            caller: caller.index,
                            callee_class,
                            callee: callee.hash(),
                        }
                    }
                }
            }
        }
    }

    /// Borrowed view handed to the pointcut matcher
    pub fn match_target(&self) -> MatchTarget<'_> {
        match self {
            JoinPointSite::Method(method) => MatchTarget::Execution(method),
            JoinPointSite::FieldRead(field) => MatchTarget::FieldRead(field),
            JoinPointSite::FieldWrite(field) => MatchTarget::FieldWrite(field),
            JoinPointSite::ConstructorExecution(ctor) => MatchTarget::ConstructorExecution(ctor),
            JoinPointSite::Construction(ctor) => MatchTarget::Construction(ctor),
            JoinPointSite::Call {
                caller,
                callee_class,
                callee,
            } => MatchTarget::Call {
                caller: match caller {
                    CallerSite::Method(method) => Caller::Method(method),
                    CallerSite::Constructor(ctor) => Caller::Constructor(ctor),
                },
                callee_class,
                callee: match callee {
                    CalleeSite::Method(method) => Callee::Method(method),
                    CalleeSite::Constructor(ctor) => Callee::Constructor(ctor),
                },
            },
        }
    }

    /// Checked fault types the observed signature declares
    ///
    /// Call sites observe the callee's signature; field accesses declare none.
    pub fn declared_faults(&self) -> &[Arc<str>] {
        match self {
            JoinPointSite::Method(method) => &method.declared_faults,
            JoinPointSite::FieldRead(_) | JoinPointSite::FieldWrite(_) => &[],
            JoinPointSite::ConstructorExecution(ctor) | JoinPointSite::Construction(ctor) => {
                &ctor.declared_faults
            }
            JoinPointSite::Call { callee, .. } => match callee {
                CalleeSite::Method(method) => &method.declared_faults,
                CalleeSite::Constructor(ctor) => &ctor.declared_faults,
            },
        }
    }

    /// Member used for metadata lookups
    pub fn member_ref(&self) -> MemberRef<'_> {
        match self {
            JoinPointSite::Method(method) => MemberRef::Method {
                name: &method.name,
                descriptor: &method.descriptor,
            },
            JoinPointSite::FieldRead(field) | JoinPointSite::FieldWrite(field) => {
                MemberRef::Field { name: &field.name }
            }
            JoinPointSite::ConstructorExecution(ctor) | JoinPointSite::Construction(ctor) => {
                MemberRef::Constructor {
                    descriptor: &ctor.descriptor,
                }
            }
            JoinPointSite::Call { caller, .. } => match caller {
                CallerSite::Method(method) => MemberRef::Method {
                    name: &method.name,
                    descriptor: &method.descriptor,
                },
                CallerSite::Constructor(ctor) => MemberRef::Constructor {
                    descriptor: &ctor.descriptor,
                },
            },
        }
    }

    fn member_name(&self) -> Arc<str> {
        match self {
            JoinPointSite::Method(method) => Arc::clone(&method.name),
            JoinPointSite::FieldRead(field) | JoinPointSite::FieldWrite(field) => {
                Arc::clone(&field.name)
            }
            JoinPointSite::ConstructorExecution(ctor) | JoinPointSite::Construction(ctor) => {
                Arc::from(ctor.name())
            }
            JoinPointSite::Call { caller, .. } => match caller {
                CallerSite::Method(method) => Arc::clone(&method.name),
                CallerSite::Constructor(ctor) => Arc::from(ctor.name()),
            },
        }
    }
}

/// Finalized, precedence-sorted interceptor sequence
///
/// Never mutated after publication; a rebuild replaces the whole chain.
#[derive(Clone, Default)]
pub struct Chain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Chain {
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self { interceptors }
    }

    /// `inserted ++ class ++ appended`, freshly allocated
    pub fn concat(
        inserted: &[Arc<dyn Interceptor>],
        class: Option<&Chain>,
        appended: &[Arc<dyn Interceptor>],
    ) -> Self {
        let class = class.map(Chain::interceptors).unwrap_or_default();
        let mut interceptors = Vec::with_capacity(inserted.len() + class.len() + appended.len());
        interceptors.extend(inserted.iter().cloned());
        interceptors.extend(class.iter().cloned());
        interceptors.extend(appended.iter().cloned());
        Self { interceptors }
    }

    pub fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Interceptor names in chain order
    pub fn names(&self) -> Vec<String> {
        self.interceptors
            .iter()
            .map(|interceptor| interceptor.name().to_string())
            .collect()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Resolved state of one advisable location
pub struct ResolvedJoinPoint {
    identity: JoinPointIdentity,
    site: ArcSwap<JoinPointSite>,
    advisor: AdvisorId,
    class: Arc<str>,
    member: Arc<str>,
    pub(crate) pending: Mutex<Vec<PendingEntry>>,
    pub(crate) chain: ArcSwapOption<Chain>,
    pub(crate) stub: ArcSwapOption<DispatchStub>,
    /// Matched by a binding at the last resolution but left unadvised for lack of a stub
    pub(crate) skipped: AtomicBool,
}

impl ResolvedJoinPoint {
    pub(crate) fn new(advisor: AdvisorId, class: Arc<str>, site: JoinPointSite) -> Self {
        Self {
            identity: site.identity(),
            member: site.member_name(),
            site: ArcSwap::from_pointee(site),
            advisor,
            class,
            pending: Mutex::new(Vec::new()),
            chain: ArcSwapOption::empty(),
            stub: ArcSwapOption::empty(),
            skipped: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &JoinPointIdentity {
        &self.identity
    }

    /// Current member description
    pub fn site(&self) -> Arc<JoinPointSite> {
        self.site.load_full()
    }

    /// Swap in a redeclared member with the same identity
    pub(crate) fn replace_site(&self, site: JoinPointSite) {
        debug_assert_eq!(site.identity(), self.identity);
        self.site.store(Arc::new(site));
    }

    /// Drop the published chain of a join point that left its advisor
    pub(crate) fn retire(&self) {
        self.chain.store(None);
        self.pending.lock().clear();
        self.skipped.store(false, Ordering::Release);
    }

    /// Owning advisor
    pub fn advisor(&self) -> AdvisorId {
        self.advisor
    }

    /// Name of the advised class
    pub fn class_name(&self) -> &Arc<str> {
        &self.class
    }

    /// Name of the member (the caller for call sites)
    pub fn member_name(&self) -> &Arc<str> {
        &self.member
    }

    /// Current finalized chain; `None` when no advice applies
    pub fn chain(&self) -> Option<Arc<Chain>> {
        self.chain.load_full()
    }

    /// Whether a dispatch stub is installed
    pub fn has_stub(&self) -> bool {
        self.stub.load().is_some()
    }

    /// Whether the last resolution skipped this join point for lack of a stub
    pub fn was_skipped(&self) -> bool {
        self.skipped.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ResolvedJoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedJoinPoint")
            .field("identity", &self.identity)
            .field("advisor", &self.advisor)
            .field("class", &self.class)
            .field("chain", &self.chain.load().as_deref())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{JoinPointKind, Modifiers};

    fn ctor(index: usize) -> ConstructorDescriptor {
        ConstructorDescriptor {
            declaring_class: Arc::from("com.acme.Account"),
            descriptor: Arc::from("()V"),
            index,
            modifiers: Modifiers::default(),
            declared_faults: vec![Arc::from("java.io.IOException")],
            excluded: false,
        }
    }

    #[test]
    fn test_call_site_identity_and_faults() {
        let callee = MethodDescriptor::new("java.io.Writer", "write", "(I)V")
            .declaring_fault("java.io.IOException");
        let site = JoinPointSite::Call {
            caller: CallerSite::Constructor(ctor(1)),
            callee_class: Arc::from("java.io.Writer"),
            callee: CalleeSite::Method(callee.clone()),
        };

        let identity = site.identity();
        assert_eq!(identity.kind(), JoinPointKind::MethodCalledByConstructor);
        assert_eq!(
            identity,
            JoinPointIdentity::MethodCalledByConstructor {
                caller: 1,
                callee_class: Arc::from("java.io.Writer"),
                callee: callee.hash(),
            }
        );
        assert_eq!(site.declared_faults(), &callee.declared_faults[..]);
        assert_eq!(site.match_target().kind(), identity.kind());
        assert_eq!(site.member_ref(), MemberRef::Constructor { descriptor: "()V" });
    }

    #[test]
    fn test_new_join_point_is_unadvised() {
        let jp = ResolvedJoinPoint::new(
            AdvisorId(0),
            Arc::from("com.acme.Account"),
            JoinPointSite::Construction(ctor(0)),
        );
        assert!(jp.chain().is_none());
        assert!(!jp.has_stub());
        assert_eq!(&**jp.member_name(), "<init>");
        assert_eq!(jp.identity(), &JoinPointIdentity::Construction { constructor: 0 });
    }
}
