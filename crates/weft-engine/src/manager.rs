//! Aspect manager
//!
//! Owns the shared engine state, the advisor arena and the aspect
//! definitions. Every deployment change (bindings, aspects, precedence)
//! goes through here and triggers the rebuilds it implies: all advisors for
//! an addition, only the back-referenced advisors for a removal.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use weft_core::{
    AdvisorId, AspectName, BindingName, ClassDescriptor, Fault, JoinPointIdentity,
    MetadataProvider, MethodDescriptor, Modifiers, NoMetadata, ObjectId, PointcutMatcher,
    Result, Value, WeftError,
};

use crate::advisor::Advisor;
use crate::aspect::AspectDefinition;
use crate::aspect_registry::AspectInstanceRegistry;
use crate::binding::AdviceBinding;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::dispatch::dispatch;
use crate::invocation::InvocationResult;
use crate::overlay::AdvisedInstance;
use crate::precedence::PrecedenceDeclaration;
use crate::registry::BindingRegistry;
use crate::resolver::RebuildReport;
use crate::stub::{DispatchStubBackend, NoStubBackend};

/// Builder for [`AspectManager`]
pub struct AspectManagerBuilder {
    config: EngineConfig,
    matcher: Option<Arc<dyn PointcutMatcher>>,
    stubs: Arc<dyn DispatchStubBackend>,
    metadata: Arc<dyn MetadataProvider>,
}

impl AspectManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            matcher: None,
            stubs: Arc::new(NoStubBackend),
            metadata: Arc::new(NoMetadata),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Pointcut matcher; required
    pub fn matcher(mut self, matcher: Arc<dyn PointcutMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn stub_backend(mut self, stubs: Arc<dyn DispatchStubBackend>) -> Self {
        self.stubs = stubs;
        self
    }

    pub fn metadata(mut self, metadata: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn build(self) -> Result<AspectManager> {
        self.config.validate()?;
        let matcher = self
            .matcher
            .ok_or_else(|| WeftError::configuration("No pointcut matcher configured"))?;
        let context = EngineContext {
            config: self.config,
            matcher,
            stubs: self.stubs,
            metadata: self.metadata,
            aspects: Arc::new(AspectInstanceRegistry::new()),
            registry: RwLock::new(BindingRegistry::new()),
        };
        Ok(AspectManager {
            context: Arc::new(context),
            definitions: RwLock::new(IndexMap::new()),
            advisors: RwLock::new(BTreeMap::new()),
            classes: RwLock::new(HashMap::new()),
            next_advisor: AtomicU64::new(1),
            next_object: AtomicU64::new(1),
        })
    }
}

impl Default for AspectManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry point of the engine
pub struct AspectManager {
    context: Arc<EngineContext>,
    definitions: RwLock<IndexMap<AspectName, Arc<AspectDefinition>>>,
    advisors: RwLock<BTreeMap<AdvisorId, Arc<Advisor>>>,
    classes: RwLock<HashMap<Arc<str>, AdvisorId>>,
    next_advisor: AtomicU64,
    next_object: AtomicU64,
}

impl AspectManager {
    pub fn builder() -> AspectManagerBuilder {
        AspectManagerBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.context.config
    }

    /// Live aspect instances across every scope
    pub fn aspect_instances(&self) -> &AspectInstanceRegistry {
        &self.context.aspects
    }

    /// Attach a class and resolve its join points
    ///
    /// Attaching an already attached class returns its existing advisor. If the
    /// initial rebuild fails the advisor is discarded.
    pub fn attach(&self, class: impl Into<Arc<ClassDescriptor>>) -> Result<Arc<Advisor>> {
        let class = class.into();
        let advisor = {
            let mut classes = self.classes.write();
            if let Some(existing) = classes
                .get(&class.name)
                .and_then(|id| self.advisors.read().get(id).cloned())
            {
                return Ok(existing);
            }
            let id = AdvisorId(self.next_advisor.fetch_add(1, Ordering::Relaxed));
            let advisor = Arc::new(Advisor::new(id, class, Arc::clone(&self.context)));
            classes.insert(Arc::clone(advisor.class_name()), id);
            self.advisors.write().insert(id, Arc::clone(&advisor));
            advisor
        };
        info!(
            advisor = %advisor.id(),
            class = %advisor.class_name(),
            join_points = advisor.join_point_count(),
            excluded = advisor.is_excluded(),
            "Attached advisor"
        );
        if let Err(err) = advisor.rebuild() {
            self.discard(&advisor);
            return Err(err);
        }
        Ok(advisor)
    }

    pub fn advisor(&self, id: AdvisorId) -> Option<Arc<Advisor>> {
        self.advisors.read().get(&id).cloned()
    }

    pub fn advisor_for(&self, class: &str) -> Option<Arc<Advisor>> {
        let id = *self.classes.read().get(class)?;
        self.advisor(id)
    }

    /// Attached advisors in attachment order
    pub fn advisors(&self) -> Vec<Arc<Advisor>> {
        self.advisors.read().values().cloned().collect()
    }

    pub fn rebuild(&self, advisor: &Advisor) -> Result<RebuildReport> {
        advisor.rebuild()
    }

    /// Rebuild every attached advisor
    pub fn rebuild_all(&self) -> Result<Vec<RebuildReport>> {
        let ids = self.advisors.read().keys().copied().collect::<Vec<_>>();
        self.rebuild_advisors(ids)
    }

    /// Rebuild the given advisors, attempting all of them; returns the first error
    fn rebuild_advisors(
        &self,
        ids: impl IntoIterator<Item = AdvisorId>,
    ) -> Result<Vec<RebuildReport>> {
        let mut reports = Vec::new();
        let mut first_error = None;
        for id in ids {
            let Some(advisor) = self.advisor(id) else {
                continue;
            };
            match advisor.rebuild() {
                Ok(report) => reports.push(report),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(reports),
        }
    }

    /// Detach an advisor, dropping its chains, back-references and aspect instances
    pub fn cleanup(&self, advisor: &Advisor) -> Result<()> {
        advisor.detach()?;
        let released = self.forget(advisor);
        info!(
            advisor = %advisor.id(),
            class = %advisor.class_name(),
            released,
            "Detached advisor"
        );
        Ok(())
    }

    fn discard(&self, advisor: &Advisor) {
        if let Err(err) = advisor.detach() {
            warn!(advisor = %advisor.id(), error = %err, "Advisor already detached");
        }
        self.forget(advisor);
    }

    fn forget(&self, advisor: &Advisor) -> usize {
        self.advisors.write().remove(&advisor.id());
        {
            let mut classes = self.classes.write();
            if classes.get(advisor.class_name()) == Some(&advisor.id()) {
                classes.remove(advisor.class_name());
            }
        }
        self.context.registry.write().forget_advisor(advisor.id());
        self.context.aspects.release_advisor(advisor.id())
    }

    /// New target object of an advised class
    pub fn instance(&self, advisor: &Arc<Advisor>) -> AdvisedInstance {
        let id = ObjectId(self.next_object.fetch_add(1, Ordering::Relaxed));
        AdvisedInstance::new(id, Arc::clone(advisor))
    }

    /// Dispatch by join-point identity
    pub fn dispatch(
        &self,
        advisor: &Advisor,
        identity: &JoinPointIdentity,
        target: Option<&AdvisedInstance>,
        args: Vec<Value>,
    ) -> InvocationResult {
        match advisor.join_point(identity) {
            Some(joinpoint) => dispatch(advisor, &joinpoint, target, args),
            None => Err(Fault::from(WeftError::UnknownJoinPoint {
                class: advisor.class_name().to_string(),
                identity: identity.to_string(),
            })),
        }
    }

    pub fn discover_method(
        &self,
        advisor: &Advisor,
        method: MethodDescriptor,
    ) -> Result<RebuildReport> {
        advisor.discover_method(method)
    }

    pub fn discover_field(
        &self,
        advisor: &Advisor,
        name: impl Into<Arc<str>>,
        type_descriptor: impl Into<Arc<str>>,
        modifiers: Modifiers,
    ) -> Result<(usize, RebuildReport)> {
        advisor.discover_field(name, type_descriptor, modifiers)
    }

    pub fn discover_constructor(
        &self,
        advisor: &Advisor,
        descriptor: impl Into<Arc<str>>,
        declared_faults: Vec<Arc<str>>,
    ) -> Result<(usize, RebuildReport)> {
        advisor.discover_constructor(descriptor, declared_faults)
    }

    /// Metadata the pointcuts may depend on changed for this class
    pub fn metadata_changed(&self, advisor: &Advisor) -> Result<RebuildReport> {
        advisor.rebuild()
    }

    /// Deploy a binding and rebuild every advisor
    ///
    /// A binding that fails to resolve anywhere is withdrawn again and the
    /// advisors it reached are rebuilt without it.
    pub fn add_binding(&self, binding: AdviceBinding) -> Result<()> {
        {
            let definitions = self.definitions.read();
            if let Some(aspect) = binding
                .behaviors()
                .iter()
                .filter_map(|behavior| behavior.aspect())
                .find(|aspect| !definitions.contains_key(*aspect))
            {
                return Err(WeftError::UnknownAspect {
                    name: aspect.to_string(),
                });
            }
        }
        let name = self.context.registry.write().add(binding)?.name().clone();
        info!(binding = %name, "Deployed binding");
        if !self.context.config.rebuild_on_change {
            return Ok(());
        }

        let ids = self.advisors.read().keys().copied().collect::<Vec<_>>();
        if let Err(err) = self.rebuild_advisors(ids) {
            warn!(binding = %name, error = %err, "Binding failed to resolve; withdrawing it");
            let reached = self
                .context
                .registry
                .write()
                .remove(&name)
                .unwrap_or_default();
            if let Err(rollback) = self.rebuild_advisors(reached) {
                warn!(binding = %name, error = %rollback, "Rebuild after withdrawal failed");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Withdraw a binding and rebuild the advisors it was applied to
    pub fn remove_binding(&self, name: impl Into<BindingName>) -> Result<()> {
        let name = name.into();
        let reached = self.context.registry.write().remove(&name)?;
        info!(binding = %name, advisors = reached.len(), "Withdrew binding");
        self.after_withdrawal(std::slice::from_ref(&name), reached)
    }

    fn after_withdrawal(&self, names: &[BindingName], reached: BTreeSet<AdvisorId>) -> Result<()> {
        if self.context.config.rebuild_on_change {
            self.rebuild_advisors(reached)?;
        } else {
            for advisor in reached.into_iter().filter_map(|id| self.advisor(id)) {
                for name in names {
                    advisor.forget_binding(name);
                }
            }
        }
        Ok(())
    }

    pub fn binding(&self, name: &BindingName) -> Option<Arc<AdviceBinding>> {
        self.context.registry.read().get(name).cloned()
    }

    /// Deployed binding names in deployment order
    pub fn bindings(&self) -> Vec<BindingName> {
        self.context
            .registry
            .read()
            .bindings()
            .map(|binding| binding.name().clone())
            .collect()
    }

    /// Advisors a binding currently contributes to
    pub fn advisors_for_binding(&self, name: &BindingName) -> BTreeSet<AdvisorId> {
        self.context.registry.read().advisors_for(name)
    }

    pub fn add_aspect(&self, definition: AspectDefinition) -> Result<Arc<AspectDefinition>> {
        let mut definitions = self.definitions.write();
        if definitions.contains_key(definition.name()) {
            return Err(WeftError::DuplicateAspect {
                name: definition.name().to_string(),
            });
        }
        let definition = Arc::new(definition);
        definitions.insert(definition.name().clone(), Arc::clone(&definition));
        info!(aspect = %definition.name(), scope = ?definition.scope(), "Defined aspect");
        Ok(definition)
    }

    pub fn aspect(&self, name: &AspectName) -> Option<Arc<AspectDefinition>> {
        self.definitions.read().get(name).cloned()
    }

    /// Remove an aspect together with every binding that uses it
    ///
    /// Returns the withdrawn bindings. Instances are released once the
    /// affected advisors no longer reference the aspect.
    pub fn remove_aspect(&self, name: impl Into<AspectName>) -> Result<Vec<BindingName>> {
        let name = name.into();
        self.definitions
            .write()
            .shift_remove(&name)
            .ok_or_else(|| WeftError::UnknownAspect {
                name: name.to_string(),
            })?;

        let (withdrawn, reached) = {
            let mut registry = self.context.registry.write();
            let withdrawn = registry.bindings_using_aspect(&name);
            let mut reached = BTreeSet::new();
            for binding in &withdrawn {
                reached.extend(registry.remove(binding)?);
            }
            (withdrawn, reached)
        };
        let result = self.after_withdrawal(&withdrawn, reached);
        let released = self.context.aspects.remove_aspect(&name);
        info!(
            aspect = %name,
            bindings = withdrawn.len(),
            released,
            "Removed aspect"
        );
        result.map(|()| withdrawn)
    }

    /// Declare a precedence order and rebuild every advisor
    pub fn add_precedence(&self, declaration: PrecedenceDeclaration) -> Result<()> {
        let name = declaration.name.clone();
        self.context.registry.write().declare_precedence(declaration)?;
        info!(precedence = %name, "Declared precedence");
        if self.context.config.rebuild_on_change {
            self.rebuild_all()?;
        }
        Ok(())
    }

    /// Withdraw a precedence declaration no deployed binding depends on
    pub fn remove_precedence(&self, name: &str) -> Result<()> {
        self.context.registry.write().withdraw_precedence(name)?;
        info!(precedence = %name, "Withdrew precedence");
        if self.context.config.rebuild_on_change {
            self.rebuild_all()?;
        }
        Ok(())
    }

    /// Group names in effective order
    pub fn precedence_order(&self) -> Vec<Arc<str>> {
        self.context.registry.read().precedence().ordered_groups()
    }
}

impl fmt::Debug for AspectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectManager")
            .field("advisors", &self.advisors.read().len())
            .field("aspects", &self.definitions.read().len())
            .field("bindings", &self.context.registry.read().len())
            .finish_non_exhaustive()
    }
}
