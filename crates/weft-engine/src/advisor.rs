//! Advisor
//!
//! The per-class container of resolved join points. Method, field and
//! constructor join points are enumerated when the class is attached; call-site
//! join points are created the first time a call site is prepared, because
//! only then is the concrete callee class known.
//!
//! The callee-side table is an immutable snapshot behind an `ArcSwap`, so
//! lookups never lock. Structural changes copy the table and publish a new one
//! under the advisor's rebuild lock.

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use weft_core::{
    AdvisorId, BindingName, ClassDescriptor, FieldDescriptor, JoinPointIdentity, MethodDescriptor,
    Modifiers, Result, SignatureHash, WeftError,
};

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::joinpoint::{CalleeSite, CallerSite, JoinPointSite, ResolvedJoinPoint};
use crate::resolver::{self, RebuildReport};
use crate::stub::{DispatchStub, JoinPointHandle};

#[derive(Clone, Default)]
struct JoinPointTable {
    methods: IndexMap<SignatureHash, Arc<ResolvedJoinPoint>>,
    field_reads: Vec<Option<Arc<ResolvedJoinPoint>>>,
    field_writes: Vec<Option<Arc<ResolvedJoinPoint>>>,
    constructors: Vec<Option<Arc<ResolvedJoinPoint>>>,
    constructions: Vec<Option<Arc<ResolvedJoinPoint>>>,
}

impl JoinPointTable {
    fn enumerate(id: AdvisorId, class: &ClassDescriptor, config: &EngineConfig) -> Self {
        let name = &class.name;
        let mut table = Self::default();

        for method in class.advisable_methods(config.advise_synthetic) {
            if config.excludes_member(&method.name) {
                continue;
            }
            let site = JoinPointSite::Method(method.clone());
            table.methods.insert(
                method.hash(),
                Arc::new(ResolvedJoinPoint::new(id, Arc::clone(name), site)),
            );
        }
        for field in &class.fields {
            table.push_field(id, name, field, config);
        }
        for ctor in &class.constructors {
            let advisable =
                ctor.is_advisable(config.advise_synthetic) && !config.excludes_member(ctor.name());
            let make = |site| Some(Arc::new(ResolvedJoinPoint::new(id, Arc::clone(name), site)));
            table.constructors.push(if advisable {
                make(JoinPointSite::ConstructorExecution(ctor.clone()))
            } else {
                None
            });
            table.constructions.push(if advisable {
                make(JoinPointSite::Construction(ctor.clone()))
            } else {
                None
            });
        }
        table
    }

    fn push_field(
        &mut self,
        id: AdvisorId,
        class: &Arc<str>,
        field: &FieldDescriptor,
        config: &EngineConfig,
    ) {
        let advisable =
            field.is_advisable(config.advise_synthetic) && !config.excludes_member(&field.name);
        let make = |site| Some(Arc::new(ResolvedJoinPoint::new(id, Arc::clone(class), site)));
        self.field_reads.push(if advisable {
            make(JoinPointSite::FieldRead(field.clone()))
        } else {
            None
        });
        self.field_writes.push(if advisable {
            make(JoinPointSite::FieldWrite(field.clone()))
        } else {
            None
        });
    }

    fn get(&self, identity: &JoinPointIdentity) -> Option<Arc<ResolvedJoinPoint>> {
        let slot = match identity {
            JoinPointIdentity::MethodExecution { method } => {
                return self.methods.get(method).cloned()
            }
            JoinPointIdentity::FieldRead { field } => self.field_reads.get(*field),
            JoinPointIdentity::FieldWrite { field } => self.field_writes.get(*field),
            JoinPointIdentity::ConstructorExecution { constructor } => {
                self.constructors.get(*constructor)
            }
            JoinPointIdentity::Construction { constructor } => self.constructions.get(*constructor),
            _ => None,
        };
        slot.and_then(Option::clone)
    }

    fn all(&self) -> impl Iterator<Item = &Arc<ResolvedJoinPoint>> {
        self.methods.values().chain(
            self.field_reads
                .iter()
                .chain(&self.field_writes)
                .chain(&self.constructors)
                .chain(&self.constructions)
                .flatten(),
        )
    }
}

type CalleeMap = BTreeMap<Arc<str>, BTreeMap<SignatureHash, Arc<ResolvedJoinPoint>>>;

/// Call-site join points keyed caller, then callee class, then callee signature
#[derive(Default)]
struct CallerTables {
    method_by_method: BTreeMap<SignatureHash, CalleeMap>,
    method_by_constructor: BTreeMap<usize, CalleeMap>,
    constructor_by_method: BTreeMap<SignatureHash, CalleeMap>,
    constructor_by_constructor: BTreeMap<usize, CalleeMap>,
}

impl CallerTables {
    fn get(&self, identity: &JoinPointIdentity) -> Option<Arc<ResolvedJoinPoint>> {
        let (callees, callee_class, callee) = match identity {
            JoinPointIdentity::MethodCalledByMethod {
                caller,
                callee_class,
                callee,
            } => (self.method_by_method.get(caller)?, callee_class, callee),
            JoinPointIdentity::MethodCalledByConstructor {
                caller,
                callee_class,
                callee,
            } => (self.method_by_constructor.get(caller)?, callee_class, callee),
            JoinPointIdentity::ConstructorCalledByMethod {
                caller,
                callee_class,
                callee,
            } => (self.constructor_by_method.get(caller)?, callee_class, callee),
            JoinPointIdentity::ConstructorCalledByConstructor {
                caller,
                callee_class,
                callee,
            } => (self.constructor_by_constructor.get(caller)?, callee_class, callee),
            _ => return None,
        };
        callees.get(&**callee_class)?.get(callee).cloned()
    }

    fn insert(&mut self, joinpoint: Arc<ResolvedJoinPoint>) {
        let (callees, callee_class, callee) = match joinpoint.identity() {
            JoinPointIdentity::MethodCalledByMethod {
                caller,
                callee_class,
                callee,
            } => (
                self.method_by_method.entry(*caller).or_default(),
                Arc::clone(callee_class),
                *callee,
            ),
            JoinPointIdentity::MethodCalledByConstructor {
                caller,
                callee_class,
                callee,
            } => (
                self.method_by_constructor.entry(*caller).or_default(),
                Arc::clone(callee_class),
                *callee,
            ),
            JoinPointIdentity::ConstructorCalledByMethod {
                caller,
                callee_class,
                callee,
            } => (
                self.constructor_by_method.entry(*caller).or_default(),
                Arc::clone(callee_class),
                *callee,
            ),
            JoinPointIdentity::ConstructorCalledByConstructor {
                caller,
                callee_class,
                callee,
            } => (
                self.constructor_by_constructor.entry(*caller).or_default(),
                Arc::clone(callee_class),
                *callee,
            ),
            _ => return,
        };
        callees
            .entry(callee_class)
            .or_default()
            .insert(callee, joinpoint);
    }

    fn all(&self) -> impl Iterator<Item = &Arc<ResolvedJoinPoint>> {
        self.method_by_method
            .values()
            .chain(self.method_by_constructor.values())
            .chain(self.constructor_by_method.values())
            .chain(self.constructor_by_constructor.values())
            .flat_map(|callees| callees.values().flat_map(BTreeMap::values))
    }
}

/// One advised join point in an [`AdvisorReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinPointReport {
    pub identity: JoinPointIdentity,
    pub member: Arc<str>,
    pub behaviors: Vec<String>,
}

/// Snapshot of an advisor's published chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvisorReport {
    pub advisor: AdvisorId,
    pub class: Arc<str>,
    pub version: u64,
    pub join_points: Vec<JoinPointReport>,
}

impl AdvisorReport {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| WeftError::internal(format!("Failed to serialize report: {e}")))
    }
}

/// Resolved join-point state of one advised class
pub struct Advisor {
    id: AdvisorId,
    name: Arc<str>,
    class: ArcSwap<ClassDescriptor>,
    excluded: bool,
    table: ArcSwap<JoinPointTable>,
    callers: RwLock<CallerTables>,
    pub(crate) applied: Mutex<BTreeSet<BindingName>>,
    pub(crate) version: AtomicU64,
    pub(crate) rebuild_lock: Mutex<()>,
    detached: AtomicBool,
    context: Arc<EngineContext>,
}

impl Advisor {
    pub(crate) fn new(
        id: AdvisorId,
        class: Arc<ClassDescriptor>,
        context: Arc<EngineContext>,
    ) -> Self {
        let excluded = context.config.excludes_class(&class);
        let table = if excluded {
            JoinPointTable::default()
        } else {
            JoinPointTable::enumerate(id, &class, &context.config)
        };
        Self {
            id,
            name: Arc::clone(&class.name),
            class: ArcSwap::new(class),
            excluded,
            table: ArcSwap::from_pointee(table),
            callers: RwLock::new(CallerTables::default()),
            applied: Mutex::new(BTreeSet::new()),
            version: AtomicU64::new(0),
            rebuild_lock: Mutex::new(()),
            detached: AtomicBool::new(false),
            context,
        }
    }

    pub fn id(&self) -> AdvisorId {
        self.id
    }

    pub fn class_name(&self) -> &Arc<str> {
        &self.name
    }

    /// Current class description
    pub fn class(&self) -> Arc<ClassDescriptor> {
        self.class.load_full()
    }

    /// Incremented on every successful rebuild
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Whether the class matched an excluded prefix and carries no join points
    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_attached(&self) -> Result<()> {
        if self.is_detached() {
            return Err(WeftError::AdvisorDetached {
                advisor: self.id.0,
                class: self.name.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Look up a join point by identity
    pub fn join_point(&self, identity: &JoinPointIdentity) -> Option<Arc<ResolvedJoinPoint>> {
        if identity.is_caller_side() {
            self.callers.read().get(identity)
        } else {
            self.table.load().get(identity)
        }
    }

    /// All join points: methods, fields, constructors, then call sites
    pub fn join_points(&self) -> Vec<Arc<ResolvedJoinPoint>> {
        let table = self.table.load();
        let callers = self.callers.read();
        table.all().chain(callers.all()).cloned().collect()
    }

    pub fn join_point_count(&self) -> usize {
        let table = self.table.load();
        let callers = self.callers.read();
        table.all().count() + callers.all().count()
    }

    /// Bindings that matched at least one join point at the last resolution
    pub fn applied_bindings(&self) -> Vec<BindingName> {
        self.applied.lock().iter().cloned().collect()
    }

    pub(crate) fn forget_binding(&self, name: &BindingName) {
        self.applied.lock().remove(name);
    }

    /// Re-resolve every join point against the deployed bindings
    pub fn rebuild(&self) -> Result<RebuildReport> {
        resolver::rebuild(self)
    }

    /// Install the dispatch stub of a join point and pin it in a handle
    ///
    /// A join point that was matched but skipped for lack of a stub is resolved
    /// on the spot.
    pub fn register_stub(
        self: &Arc<Self>,
        identity: &JoinPointIdentity,
        stub: DispatchStub,
    ) -> Result<JoinPointHandle> {
        self.ensure_attached()?;
        let joinpoint = self.require(identity)?;
        joinpoint.stub.store(Some(Arc::new(stub)));
        if joinpoint.skipped.load(Ordering::Acquire) {
            let _guard = self.rebuild_lock.lock();
            self.ensure_attached()?;
            resolver::resolve_join_points(self, std::slice::from_ref(&joinpoint))?;
        }
        Ok(JoinPointHandle::new(Arc::clone(self), joinpoint))
    }

    /// Handle for a join point whose stub is supplied by the backend
    pub fn handle(self: &Arc<Self>, identity: &JoinPointIdentity) -> Result<JoinPointHandle> {
        let joinpoint = self.require(identity)?;
        Ok(JoinPointHandle::new(Arc::clone(self), joinpoint))
    }

    fn require(&self, identity: &JoinPointIdentity) -> Result<Arc<ResolvedJoinPoint>> {
        self.join_point(identity)
            .ok_or_else(|| WeftError::UnknownJoinPoint {
                class: self.name.to_string(),
                identity: identity.to_string(),
            })
    }

    /// Call-site join point, created and resolved on first reference
    pub fn call_site(
        &self,
        caller: CallerSite,
        callee_class: impl Into<Arc<str>>,
        callee: CalleeSite,
    ) -> Result<Arc<ResolvedJoinPoint>> {
        self.ensure_attached()?;
        let site = JoinPointSite::Call {
            caller,
            callee_class: callee_class.into(),
            callee,
        };
        let identity = site.identity();
        if let Some(existing) = self.callers.read().get(&identity) {
            return Ok(existing);
        }

        let _guard = self.rebuild_lock.lock();
        // cleanup may have run while waiting for the lock
        self.ensure_attached()?;
        if let Some(existing) = self.callers.read().get(&identity) {
            return Ok(existing);
        }
        let joinpoint = Arc::new(ResolvedJoinPoint::new(self.id, Arc::clone(&self.name), site));
        if !self.excluded {
            resolver::resolve_join_points(self, std::slice::from_ref(&joinpoint))?;
        }
        self.callers.write().insert(Arc::clone(&joinpoint));
        debug!(
            advisor = %self.id,
            class = %self.name,
            identity = %identity,
            advised = joinpoint.chain().is_some(),
            "Created call-site join point"
        );
        Ok(joinpoint)
    }

    /// Add or redeclare a method, then rebuild
    ///
    /// A redeclared method keeps its join point; handles issued for it stay
    /// valid. A method that stops being advisable loses its chain.
    pub fn discover_method(&self, method: MethodDescriptor) -> Result<RebuildReport> {
        self.ensure_attached()?;
        {
            let _guard = self.rebuild_lock.lock();
            self.ensure_attached()?;
            let config = &self.context.config;
            let mut class = ClassDescriptor::clone(&self.class.load());
            let mut method = method;
            method.declaring_class = Arc::clone(&self.name);
            let hash = method.hash();
            match class.methods.iter_mut().find(|existing| existing.hash() == hash) {
                Some(existing) => *existing = method.clone(),
                None => class.methods.push(method.clone()),
            }
            self.class.store(Arc::new(class));

            let advisable = !self.excluded
                && method.is_advisable(config.advise_synthetic)
                && !config.excludes_member(&method.name);
            let site = JoinPointSite::Method(method);
            let existing = self.table.load().methods.get(&hash).cloned();
            match (existing, advisable) {
                (Some(existing), true) => existing.replace_site(site),
                (Some(_), false) => {
                    let mut table = JoinPointTable::clone(&self.table.load());
                    if let Some(removed) = table.methods.shift_remove(&hash) {
                        removed.retire();
                    }
                    self.table.store(Arc::new(table));
                }
                (None, true) => {
                    let mut table = JoinPointTable::clone(&self.table.load());
                    let joinpoint = ResolvedJoinPoint::new(self.id, Arc::clone(&self.name), site);
                    table.methods.insert(hash, Arc::new(joinpoint));
                    self.table.store(Arc::new(table));
                }
                (None, false) => {}
            }
            debug!(
                advisor = %self.id,
                class = %self.name,
                method = %hash,
                advisable,
                "Discovered method"
            );
        }
        self.rebuild()
    }

    /// Add a field at the next index, then rebuild
    pub fn discover_field(
        &self,
        name: impl Into<Arc<str>>,
        type_descriptor: impl Into<Arc<str>>,
        modifiers: Modifiers,
    ) -> Result<(usize, RebuildReport)> {
        self.ensure_attached()?;
        let index = {
            let _guard = self.rebuild_lock.lock();
            self.ensure_attached()?;
            let class = ClassDescriptor::clone(&self.class.load()).with_field(
                name,
                type_descriptor,
                modifiers,
            );
            let index = class.fields.len() - 1;
            let mut table = JoinPointTable::clone(&self.table.load());
            if !self.excluded {
                table.push_field(self.id, &self.name, &class.fields[index], &self.context.config);
            }
            self.class.store(Arc::new(class));
            self.table.store(Arc::new(table));
            debug!(advisor = %self.id, class = %self.name, field = index, "Discovered field");
            index
        };
        Ok((index, self.rebuild()?))
    }

    /// Add a constructor at the next index, then rebuild
    pub fn discover_constructor(
        &self,
        descriptor: impl Into<Arc<str>>,
        declared_faults: Vec<Arc<str>>,
    ) -> Result<(usize, RebuildReport)> {
        self.ensure_attached()?;
        let index = {
            let _guard = self.rebuild_lock.lock();
            self.ensure_attached()?;
            let class = ClassDescriptor::clone(&self.class.load())
                .with_constructor(descriptor, declared_faults);
            let index = class.constructors.len() - 1;
            let ctor = &class.constructors[index];
            let config = &self.context.config;
            let advisable = !self.excluded
                && ctor.is_advisable(config.advise_synthetic)
                && !config.excludes_member(ctor.name());
            let mut table = JoinPointTable::clone(&self.table.load());
            let make = |site| {
                advisable.then(|| {
                    Arc::new(ResolvedJoinPoint::new(self.id, Arc::clone(&self.name), site))
                })
            };
            table
                .constructors
                .push(make(JoinPointSite::ConstructorExecution(ctor.clone())));
            table
                .constructions
                .push(make(JoinPointSite::Construction(ctor.clone())));
            self.class.store(Arc::new(class));
            self.table.store(Arc::new(table));
            debug!(
                advisor = %self.id,
                class = %self.name,
                constructor = index,
                "Discovered constructor"
            );
            index
        };
        Ok((index, self.rebuild()?))
    }

    /// Published chains of every advised join point
    pub fn report(&self) -> AdvisorReport {
        let join_points = self
            .join_points()
            .into_iter()
            .filter_map(|joinpoint| {
                let chain = joinpoint.chain()?;
                Some(JoinPointReport {
                    identity: joinpoint.identity().clone(),
                    member: Arc::clone(joinpoint.member_name()),
                    behaviors: chain.names(),
                })
            })
            .collect();
        AdvisorReport {
            advisor: self.id,
            class: Arc::clone(&self.name),
            version: self.version(),
            join_points,
        }
    }

    /// Stop accepting changes and drop every published chain
    pub(crate) fn detach(&self) -> Result<()> {
        let _guard = self.rebuild_lock.lock();
        if self.detached.swap(true, Ordering::AcqRel) {
            return Err(WeftError::AdvisorDetached {
                advisor: self.id.0,
                class: self.name.to_string(),
            });
        }
        for joinpoint in self.join_points() {
            joinpoint.chain.store(None);
            joinpoint.pending.lock().clear();
        }
        self.applied.lock().clear();
        Ok(())
    }
}

impl fmt::Debug for Advisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Advisor")
            .field("id", &self.id)
            .field("class", &self.name)
            .field("version", &self.version())
            .field("excluded", &self.excluded)
            .field("detached", &self.is_detached())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advisor(class: ClassDescriptor) -> Advisor {
        Advisor::new(
            AdvisorId(0),
            Arc::new(class),
            Arc::new(EngineContext::for_tests()),
        )
    }

    fn account() -> ClassDescriptor {
        ClassDescriptor::new("com.acme.Account")
            .with_method(MethodDescriptor::new("", "deposit", "(J)V"))
            .with_method(
                MethodDescriptor::new("", "area", "()D")
                    .with_modifiers(Modifiers::abstract_member()),
            )
            .with_field("balance", "J", Modifiers::default())
            .with_field("cache", "J", Modifiers::synthetic_member())
            .with_constructor("()V", Vec::new())
    }

    #[test]
    fn test_enumeration_filters_non_advisable_members() {
        let advisor = advisor(account());
        let deposit = JoinPointIdentity::MethodExecution {
            method: SignatureHash::method("deposit", "(J)V"),
        };
        let area = JoinPointIdentity::MethodExecution {
            method: SignatureHash::method("area", "()D"),
        };

        assert!(advisor.join_point(&deposit).is_some());
        assert!(advisor.join_point(&area).is_none());
        assert!(advisor.join_point(&JoinPointIdentity::FieldRead { field: 0 }).is_some());
        assert!(advisor.join_point(&JoinPointIdentity::FieldWrite { field: 1 }).is_none());
        assert!(advisor
            .join_point(&JoinPointIdentity::Construction { constructor: 0 })
            .is_some());
        // deposit, balance read/write, constructor execution, construction
        assert_eq!(advisor.join_point_count(), 5);
    }

    #[test]
    fn test_call_sites_are_created_once() {
        let advisor = advisor(account());
        let caller =
            CallerSite::Method(MethodDescriptor::new("com.acme.Account", "deposit", "(J)V"));
        let callee = CalleeSite::Method(MethodDescriptor::new("com.acme.Ledger", "post", "(J)V"));

        let first = advisor
            .call_site(caller.clone(), "com.acme.Ledger", callee.clone())
            .unwrap();
        let second = advisor
            .call_site(caller, "com.acme.Ledger", callee)
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.identity().is_caller_side());
        assert_eq!(advisor.join_point_count(), 6);
        assert!(advisor.join_point(first.identity()).is_some());
    }

    #[test]
    fn test_detached_advisor_rejects_changes() {
        let advisor = advisor(account());
        advisor.detach().unwrap();
        assert!(advisor.detach().is_err());
        assert!(matches!(
            advisor.rebuild(),
            Err(WeftError::AdvisorDetached { .. })
        ));
    }

    #[test]
    fn test_report_lists_only_advised_join_points() {
        let advisor = advisor(account());
        let report = advisor.report();
        assert!(report.join_points.is_empty());
        assert_eq!(&*report.class, "com.acme.Account");
        assert!(report.to_json().unwrap().contains("com.acme.Account"));
    }
}
