//! Instance Overlay
//!
//! An [`AdvisedInstance`] is one target object of an advised class. It may
//! carry an [`InstanceOverlay`]: interceptors run before (inserted) or after
//! (appended) the class-level chain for that object only. Objects without an
//! overlay use the class chain as is, with no allocation.
//!
//! Overlay layers are materialized per join point and cached. The cache is
//! tagged with a generation counter bumped by every overlay mutation and by
//! every change of the advisor version seen at dispatch, so a layer built from
//! stale state is never served.

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use weft_core::{Fault, JoinPointIdentity, ObjectId, Result, Value, WeftError};

use crate::advisor::Advisor;
use crate::binding::{BehaviorFactory, FactorySite, InterceptorFactory};
use crate::dispatch::dispatch;
use crate::invocation::{Interceptor, InvocationResult};
use crate::joinpoint::{Chain, ResolvedJoinPoint};
use crate::resolver::materialize_behaviors;

#[derive(Clone, Default)]
struct OverlayEntries {
    inserted: Vec<Arc<dyn BehaviorFactory>>,
    appended: Vec<Arc<dyn BehaviorFactory>>,
}

struct OverlayLayer {
    inserted: Vec<Arc<dyn Interceptor>>,
    appended: Vec<Arc<dyn Interceptor>>,
}

/// Per-object interceptors around the class chain
pub struct InstanceOverlay {
    entries: Mutex<OverlayEntries>,
    len: AtomicUsize,
    generation: AtomicU64,
    cache: RwLock<HashMap<JoinPointIdentity, (u64, Arc<OverlayLayer>)>>,
    /// Advisor version the cache was last validated against
    stamp: AtomicU64,
    resyncs: AtomicU64,
}

impl InstanceOverlay {
    fn new(stamp: u64) -> Self {
        Self {
            entries: Mutex::new(OverlayEntries::default()),
            len: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            cache: RwLock::new(HashMap::new()),
            stamp: AtomicU64::new(stamp),
            resyncs: AtomicU64::new(0),
        }
    }

    /// Run `interceptor` before the class chain
    pub fn insert_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.insert_behavior(InterceptorFactory::new(interceptor));
    }

    /// Run `interceptor` after the class chain
    pub fn append_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.append_behavior(InterceptorFactory::new(interceptor));
    }

    /// Materialize `factory` per join point and run it before the class chain
    pub fn insert_behavior(&self, factory: impl BehaviorFactory + 'static) {
        self.mutate(|entries| entries.inserted.push(Arc::new(factory)));
    }

    /// Materialize `factory` per join point and run it after the class chain
    pub fn append_behavior(&self, factory: impl BehaviorFactory + 'static) {
        self.mutate(|entries| entries.appended.push(Arc::new(factory)));
    }

    /// Remove every overlay entry
    pub fn clear(&self) {
        self.mutate(|entries| *entries = OverlayEntries::default());
    }

    fn mutate(&self, change: impl FnOnce(&mut OverlayEntries)) {
        let mut entries = self.entries.lock();
        change(&mut entries);
        self.len
            .store(entries.inserted.len() + entries.appended.len(), Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advisor version the overlay last synchronized with
    pub fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::Acquire)
    }

    /// How many times a version change invalidated the cache
    pub fn resync_count(&self) -> u64 {
        self.resyncs.load(Ordering::Acquire)
    }

    /// Compare against the advisor version; on mismatch invalidate cached layers
    ///
    /// Returns whether a resynchronization happened.
    pub fn check_version(&self, current: u64) -> bool {
        let stamp = self.stamp.swap(current, Ordering::AcqRel);
        if stamp == current {
            return false;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        debug!(from = stamp, to = current, "Overlay resynchronized with advisor version");
        true
    }

    fn layer(&self, site: &FactorySite<'_>) -> Result<Arc<OverlayLayer>> {
        let generation = self.generation.load(Ordering::Acquire);
        if let Some((built, layer)) = self.cache.read().get(site.identity) {
            if *built == generation {
                return Ok(Arc::clone(layer));
            }
        }

        let (generation, entries) = {
            let entries = self.entries.lock();
            (self.generation.load(Ordering::Acquire), entries.clone())
        };
        let layer = Arc::new(OverlayLayer {
            inserted: materialize_behaviors(site, &entries.inserted)?,
            appended: materialize_behaviors(site, &entries.appended)?,
        });
        trace!(identity = %site.identity, generation, "Materialized overlay layer");
        self.cache
            .write()
            .insert(site.identity.clone(), (generation, Arc::clone(&layer)));
        Ok(layer)
    }

    /// `inserted ++ class_chain ++ appended` for one join point
    pub(crate) fn compose(
        &self,
        advisor: &Advisor,
        joinpoint: &ResolvedJoinPoint,
        class_chain: Option<Arc<Chain>>,
    ) -> Result<Option<Arc<Chain>>> {
        self.check_version(advisor.version());
        let site = FactorySite {
            advisor: advisor.id(),
            class: joinpoint.class_name(),
            identity: joinpoint.identity(),
        };
        let layer = self.layer(&site)?;
        Ok(Some(Arc::new(Chain::concat(
            &layer.inserted,
            class_chain.as_deref(),
            &layer.appended,
        ))))
    }
}

impl fmt::Debug for InstanceOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceOverlay")
            .field("len", &self.len())
            .field("stamp", &self.stamp())
            .field("resyncs", &self.resync_count())
            .finish()
    }
}

/// One target object of an advised class
///
/// Dropping the instance releases every aspect instance bound to it.
pub struct AdvisedInstance {
    id: ObjectId,
    advisor: Arc<Advisor>,
    overlay: OnceCell<InstanceOverlay>,
}

impl AdvisedInstance {
    pub(crate) fn new(id: ObjectId, advisor: Arc<Advisor>) -> Self {
        Self {
            id,
            advisor,
            overlay: OnceCell::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn advisor(&self) -> &Arc<Advisor> {
        &self.advisor
    }

    /// The overlay, created on first use
    pub fn overlay(&self) -> &InstanceOverlay {
        self.overlay
            .get_or_init(|| InstanceOverlay::new(self.advisor.version()))
    }

    /// Whether any per-object interceptor is installed
    pub fn has_overlay(&self) -> bool {
        self.overlay.get().is_some_and(|overlay| !overlay.is_empty())
    }

    /// Chain a call on this object would run
    pub fn effective_chain(&self, joinpoint: &ResolvedJoinPoint) -> Result<Option<Arc<Chain>>> {
        self.chain_for(joinpoint, joinpoint.chain())
    }

    pub(crate) fn chain_for(
        &self,
        joinpoint: &ResolvedJoinPoint,
        class_chain: Option<Arc<Chain>>,
    ) -> Result<Option<Arc<Chain>>> {
        match self.overlay.get() {
            Some(overlay) if !overlay.is_empty() => {
                overlay.compose(&self.advisor, joinpoint, class_chain)
            }
            _ => Ok(class_chain),
        }
    }

    /// Dispatch a call on this object by join-point identity
    pub fn invoke(&self, identity: &JoinPointIdentity, args: Vec<Value>) -> InvocationResult {
        let joinpoint = self.advisor.join_point(identity).ok_or_else(|| {
            Fault::from(WeftError::UnknownJoinPoint {
                class: self.advisor.class_name().to_string(),
                identity: identity.to_string(),
            })
        })?;
        dispatch(&self.advisor, &joinpoint, Some(self), args)
    }
}

impl Drop for AdvisedInstance {
    fn drop(&mut self) {
        let released = self.advisor.context().aspects.release_object(self.id);
        if released > 0 {
            trace!(object = %self.id, released, "Released per-instance aspects");
        }
    }
}

impl fmt::Debug for AdvisedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisedInstance")
            .field("id", &self.id)
            .field("advisor", &self.advisor.id())
            .field("overlay", &self.overlay.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EngineContext;
    use crate::invocation::Invocation;
    use weft_core::{AdvisorId, ClassDescriptor, MethodDescriptor, SignatureHash};

    struct Pass(&'static str);

    impl Interceptor for Pass {
        fn name(&self) -> &str {
            self.0
        }

        fn invoke(&self, invocation: &mut Invocation<'_>) -> InvocationResult {
            invocation.invoke_next()
        }
    }

    fn instance() -> (AdvisedInstance, Arc<ResolvedJoinPoint>) {
        let class = ClassDescriptor::new("com.acme.Cart")
            .with_method(MethodDescriptor::new("", "add", "(I)V"));
        let advisor = Arc::new(Advisor::new(
            AdvisorId(3),
            Arc::new(class),
            Arc::new(EngineContext::for_tests()),
        ));
        let joinpoint = advisor
            .join_point(&JoinPointIdentity::MethodExecution {
                method: SignatureHash::method("add", "(I)V"),
            })
            .unwrap();
        joinpoint
            .chain
            .store(Some(Arc::new(Chain::new(vec![Arc::new(Pass("class"))]))));
        (AdvisedInstance::new(ObjectId(1), advisor), joinpoint)
    }

    #[test]
    fn test_no_overlay_returns_class_chain() {
        let (instance, joinpoint) = instance();
        let class_chain = joinpoint.chain().unwrap();
        let effective = instance.effective_chain(&joinpoint).unwrap().unwrap();
        assert!(Arc::ptr_eq(&class_chain, &effective));

        // An empty overlay behaves the same
        instance.overlay();
        assert!(!instance.has_overlay());
        let effective = instance.effective_chain(&joinpoint).unwrap().unwrap();
        assert!(Arc::ptr_eq(&class_chain, &effective));
    }

    #[test]
    fn test_overlay_wraps_class_chain() {
        let (instance, joinpoint) = instance();
        instance.overlay().insert_interceptor(Arc::new(Pass("before")));
        instance.overlay().append_interceptor(Arc::new(Pass("after")));

        let chain = instance.effective_chain(&joinpoint).unwrap().unwrap();
        assert_eq!(chain.names(), vec!["before", "class", "after"]);

        instance.overlay().clear();
        let chain = instance.effective_chain(&joinpoint).unwrap().unwrap();
        assert_eq!(chain.names(), vec!["class"]);
    }

    #[test]
    fn test_version_change_invalidates_layers() {
        let (instance, joinpoint) = instance();
        let overlay = instance.overlay();
        overlay.insert_interceptor(Arc::new(Pass("before")));

        instance.effective_chain(&joinpoint).unwrap();
        assert_eq!(overlay.resync_count(), 0);

        instance.advisor().version.fetch_add(1, Ordering::AcqRel);
        instance.effective_chain(&joinpoint).unwrap();
        assert_eq!(overlay.resync_count(), 1);
        assert_eq!(overlay.stamp(), 1);

        assert!(!overlay.check_version(1));
    }
}
