//! State shared by a manager and every advisor it attached

use parking_lot::RwLock;
use std::sync::Arc;
use weft_core::{MetadataProvider, PointcutMatcher};

use crate::aspect_registry::AspectInstanceRegistry;
use crate::config::EngineConfig;
use crate::registry::BindingRegistry;
use crate::stub::DispatchStubBackend;

pub(crate) struct EngineContext {
    pub(crate) config: EngineConfig,
    pub(crate) matcher: Arc<dyn PointcutMatcher>,
    pub(crate) stubs: Arc<dyn DispatchStubBackend>,
    pub(crate) metadata: Arc<dyn MetadataProvider>,
    pub(crate) aspects: Arc<AspectInstanceRegistry>,
    /// Bindings and precedence; rebuilds hold an upgradable read for their whole run
    pub(crate) registry: RwLock<BindingRegistry>,
}

#[cfg(test)]
impl EngineContext {
    pub(crate) fn for_tests() -> Self {
        Self::for_tests_with_metadata(Arc::new(weft_core::NoMetadata))
    }

    pub(crate) fn for_tests_with_metadata(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self {
            config: EngineConfig::default(),
            matcher: Arc::new(tests::NeverMatcher),
            stubs: Arc::new(crate::stub::NoStubBackend),
            metadata,
            aspects: Arc::new(AspectInstanceRegistry::new()),
            registry: RwLock::new(BindingRegistry::new()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use weft_core::{
        Callee, Caller, ClassDescriptor, ConstructorDescriptor, FieldDescriptor, InheritancePolicy,
        JoinPointKind, MethodDescriptor, Pointcut, PointcutMatcher, Result,
    };

    /// Matcher that selects nothing
    pub(crate) struct NeverMatcher;

    impl PointcutMatcher for NeverMatcher {
        fn matches_execution(
            &self,
            _pointcut: &Pointcut,
            _class: &ClassDescriptor,
            _method: &MethodDescriptor,
            _policy: InheritancePolicy,
        ) -> Result<bool> {
            Ok(false)
        }

        fn matches_field(
            &self,
            _pointcut: &Pointcut,
            _class: &ClassDescriptor,
            _field: &FieldDescriptor,
            _write: bool,
        ) -> Result<bool> {
            Ok(false)
        }

        fn matches_constructor(
            &self,
            _pointcut: &Pointcut,
            _class: &ClassDescriptor,
            _constructor: &ConstructorDescriptor,
            _kind: JoinPointKind,
        ) -> Result<bool> {
            Ok(false)
        }

        fn matches_call(
            &self,
            _pointcut: &Pointcut,
            _class: &ClassDescriptor,
            _caller: Caller<'_>,
            _callee_class: &str,
            _callee: Callee<'_>,
        ) -> Result<bool> {
            Ok(false)
        }
    }
}
