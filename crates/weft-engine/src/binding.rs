//! Advice bindings and behavior factories
//!
//! A binding pairs a pointcut with an ordered list of behavior factories. At
//! rebuild every factory is materialized once per matched join point into an
//! [`Interceptor`]. Before, after and throwing advice are compiled into the
//! around-style protocol here, so the dispatcher only ever sees around
//! interceptors.

use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use weft_core::{
    AdvisorId, AspectName, BindingName, Fault, JoinPointIdentity, Pointcut, Result, Value,
};

use crate::aspect::{AspectDefinition, AspectInstance};
use crate::cflow::CflowGuard;
use crate::invocation::{Interceptor, Invocation, InvocationResult};

/// How a behavior relates to the rest of the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceKind {
    Before,
    After,
    Around,
    Throwing,
}

/// Where a behavior is being materialized
#[derive(Debug, Clone, Copy)]
pub struct FactorySite<'a> {
    pub advisor: AdvisorId,
    pub class: &'a str,
    pub identity: &'a JoinPointIdentity,
}

/// Materializes one interceptor per join point
pub trait BehaviorFactory: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> AdviceKind {
        AdviceKind::Around
    }

    /// Aspect backing this behavior, if any
    fn aspect(&self) -> Option<&AspectName> {
        None
    }

    fn create(&self, site: &FactorySite<'_>) -> Result<Arc<dyn Interceptor>>;
}

/// Factory that shares one prebuilt interceptor across all join points
#[derive(Clone)]
pub struct InterceptorFactory {
    interceptor: Arc<dyn Interceptor>,
}

impl InterceptorFactory {
    pub fn new(interceptor: Arc<dyn Interceptor>) -> Self {
        Self { interceptor }
    }
}

impl BehaviorFactory for InterceptorFactory {
    fn name(&self) -> &str {
        self.interceptor.name()
    }

    fn create(&self, _site: &FactorySite<'_>) -> Result<Arc<dyn Interceptor>> {
        Ok(Arc::clone(&self.interceptor))
    }
}

pub type AroundFn =
    Arc<dyn Fn(&AspectInstance, &mut Invocation<'_>) -> InvocationResult + Send + Sync>;
pub type BeforeFn =
    Arc<dyn Fn(&AspectInstance, &Invocation<'_>) -> std::result::Result<(), Fault> + Send + Sync>;
pub type AfterFn =
    Arc<dyn Fn(&AspectInstance, &Invocation<'_>, Value) -> InvocationResult + Send + Sync>;
pub type ThrowingFn = Arc<dyn Fn(&AspectInstance, &Invocation<'_>, &Fault) + Send + Sync>;

/// Advice body, called with the aspect instance resolved for the call
#[derive(Clone)]
pub enum Advice {
    Around(AroundFn),
    Before(BeforeFn),
    /// Runs after a successful body; may substitute the result
    After(AfterFn),
    /// Observes a fault; the fault is always rethrown
    Throwing(ThrowingFn),
}

impl Advice {
    fn kind(&self) -> AdviceKind {
        match self {
            Advice::Around(_) => AdviceKind::Around,
            Advice::Before(_) => AdviceKind::Before,
            Advice::After(_) => AdviceKind::After,
            Advice::Throwing(_) => AdviceKind::Throwing,
        }
    }
}

/// Factory for advice implemented by an aspect
#[derive(Clone)]
pub struct AdviceFactory {
    name: Arc<str>,
    aspect: Arc<AspectDefinition>,
    advice: Advice,
}

impl AdviceFactory {
    pub fn new(name: impl Into<Arc<str>>, aspect: Arc<AspectDefinition>, advice: Advice) -> Self {
        Self {
            name: name.into(),
            aspect,
            advice,
        }
    }

    pub fn around<F>(name: impl Into<Arc<str>>, aspect: Arc<AspectDefinition>, advice: F) -> Self
    where
        F: Fn(&AspectInstance, &mut Invocation<'_>) -> InvocationResult + Send + Sync + 'static,
    {
        Self::new(name, aspect, Advice::Around(Arc::new(advice)))
    }

    pub fn before<F>(name: impl Into<Arc<str>>, aspect: Arc<AspectDefinition>, advice: F) -> Self
    where
        F: Fn(&AspectInstance, &Invocation<'_>) -> std::result::Result<(), Fault>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, aspect, Advice::Before(Arc::new(advice)))
    }

    pub fn after<F>(name: impl Into<Arc<str>>, aspect: Arc<AspectDefinition>, advice: F) -> Self
    where
        F: Fn(&AspectInstance, &Invocation<'_>, Value) -> InvocationResult + Send + Sync + 'static,
    {
        Self::new(name, aspect, Advice::After(Arc::new(advice)))
    }

    pub fn throwing<F>(
        name: impl Into<Arc<str>>,
        aspect: Arc<AspectDefinition>,
        advice: F,
    ) -> Self
    where
        F: Fn(&AspectInstance, &Invocation<'_>, &Fault) + Send + Sync + 'static,
    {
        Self::new(name, aspect, Advice::Throwing(Arc::new(advice)))
    }
}

impl BehaviorFactory for AdviceFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> AdviceKind {
        self.advice.kind()
    }

    fn aspect(&self) -> Option<&AspectName> {
        Some(self.aspect.name())
    }

    fn create(&self, _site: &FactorySite<'_>) -> Result<Arc<dyn Interceptor>> {
        Ok(Arc::new(AdviceInterceptor {
            name: Arc::clone(&self.name),
            aspect: Arc::clone(&self.aspect),
            advice: self.advice.clone(),
            pinned: OnceCell::new(),
        }))
    }
}

/// Interceptor running aspect advice
///
/// Instances of target-independent scopes are pinned after the first lookup;
/// per-instance and per-join-point aspects are resolved on every call.
struct AdviceInterceptor {
    name: Arc<str>,
    aspect: Arc<AspectDefinition>,
    advice: Advice,
    pinned: OnceCell<AspectInstance>,
}

impl AdviceInterceptor {
    fn instance(&self, invocation: &Invocation<'_>) -> Result<Option<AspectInstance>> {
        if let Some(instance) = self.pinned.get() {
            return Ok(Some(Arc::clone(instance)));
        }
        let instance = invocation.aspect_instance(&self.aspect)?;
        if let Some(instance) = &instance {
            if !self.aspect.scope().varies_by_target() {
                let _ = self.pinned.set(Arc::clone(instance));
            }
        }
        Ok(instance)
    }
}

impl Interceptor for AdviceInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, invocation: &mut Invocation<'_>) -> InvocationResult {
        let instance = match self.instance(invocation) {
            Ok(Some(instance)) => instance,
            Ok(None) => return invocation.invoke_next(),
            Err(error) => return Err(Fault::aspect_creation(&error)),
        };
        match &self.advice {
            Advice::Around(advice) => advice(&instance, invocation),
            Advice::Before(advice) => {
                advice(&instance, invocation)?;
                invocation.invoke_next()
            }
            Advice::After(advice) => {
                let value = invocation.invoke_next()?;
                advice(&instance, invocation, value)
            }
            Advice::Throwing(advice) => match invocation.invoke_next() {
                Ok(value) => Ok(value),
                Err(fault) => {
                    advice(&instance, invocation, &fault);
                    Err(fault)
                }
            },
        }
    }
}

/// Named association of a pointcut with the advice it applies
#[derive(Clone)]
pub struct AdviceBinding {
    name: BindingName,
    pointcut: Pointcut,
    behaviors: Vec<Arc<dyn BehaviorFactory>>,
    cflow: Option<Arc<dyn CflowGuard>>,
    precedence_group: Option<Arc<str>>,
}

impl AdviceBinding {
    pub fn new(name: impl Into<BindingName>, pointcut: impl Into<Pointcut>) -> Self {
        Self {
            name: name.into(),
            pointcut: pointcut.into(),
            behaviors: Vec::new(),
            cflow: None,
            precedence_group: None,
        }
    }

    /// Append a behavior factory
    pub fn with_behavior(mut self, factory: impl BehaviorFactory + 'static) -> Self {
        self.behaviors.push(Arc::new(factory));
        self
    }

    /// Append a prebuilt interceptor shared by every matched join point
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.behaviors
            .push(Arc::new(InterceptorFactory::new(interceptor)));
        self
    }

    /// Run this binding's behaviors only when the guard matches
    pub fn with_cflow(mut self, guard: Arc<dyn CflowGuard>) -> Self {
        self.cflow = Some(guard);
        self
    }

    /// Order this binding's behaviors by a declared precedence group
    pub fn in_group(mut self, group: impl Into<Arc<str>>) -> Self {
        self.precedence_group = Some(group.into());
        self
    }

    pub fn name(&self) -> &BindingName {
        &self.name
    }

    pub fn pointcut(&self) -> &Pointcut {
        &self.pointcut
    }

    pub fn behaviors(&self) -> &[Arc<dyn BehaviorFactory>] {
        &self.behaviors
    }

    pub fn cflow(&self) -> Option<&Arc<dyn CflowGuard>> {
        self.cflow.as_ref()
    }

    pub fn precedence_group(&self) -> Option<&Arc<str>> {
        self.precedence_group.as_ref()
    }

    /// Whether any behavior is backed by `aspect`
    pub fn uses_aspect(&self, aspect: &AspectName) -> bool {
        self.behaviors
            .iter()
            .any(|behavior| behavior.aspect() == Some(aspect))
    }
}

impl fmt::Debug for AdviceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let behaviors: Vec<&str> = self.behaviors.iter().map(|b| b.name()).collect();
        f.debug_struct("AdviceBinding")
            .field("name", &self.name)
            .field("pointcut", &self.pointcut)
            .field("behaviors", &behaviors)
            .field("cflow", &self.cflow.is_some())
            .field("precedence_group", &self.precedence_group)
            .finish()
    }
}
