//! Pointcut handles and the matcher seam
//!
//! Parsing and structural matching of pointcut expressions live outside the
//! engine. The engine only holds an opaque [`Pointcut`] per binding and asks a
//! [`PointcutMatcher`] whether it selects a given member of a given class.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::descriptor::{ClassDescriptor, ConstructorDescriptor, FieldDescriptor, MethodDescriptor};
use crate::errors::Result;
use crate::joinpoint::JoinPointKind;

/// Opaque handle to a pointcut expression
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pointcut {
    expression: Arc<str>,
}

impl Pointcut {
    pub fn new(expression: impl Into<Arc<str>>) -> Self {
        Self {
            expression: expression.into(),
        }
    }

    /// The expression text handed to the matcher
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl fmt::Display for Pointcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl From<&str> for Pointcut {
    fn from(expression: &str) -> Self {
        Self::new(expression)
    }
}

/// Which class an inherited, non-overridden method is matched against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritancePolicy {
    /// Match against the class that declares the method
    #[default]
    DeclaringClass,
    /// Match against the advised subclass
    AdvisedClass,
}

impl InheritancePolicy {
    /// Class name a method should be matched against under this policy
    pub fn match_class<'a>(
        &self,
        advised: &'a ClassDescriptor,
        method: &'a MethodDescriptor,
    ) -> &'a str {
        match self {
            InheritancePolicy::DeclaringClass => &method.declaring_class,
            InheritancePolicy::AdvisedClass => &advised.name,
        }
    }
}

/// The member hosting a call site
#[derive(Debug, Clone, Copy)]
pub enum Caller<'a> {
    Method(&'a MethodDescriptor),
    Constructor(&'a ConstructorDescriptor),
}

/// The member a call site invokes
#[derive(Debug, Clone, Copy)]
pub enum Callee<'a> {
    Method(&'a MethodDescriptor),
    Constructor(&'a ConstructorDescriptor),
}

/// A member paired with the join-point kind being asked about
#[derive(Debug, Clone, Copy)]
pub enum MatchTarget<'a> {
    Execution(&'a MethodDescriptor),
    FieldRead(&'a FieldDescriptor),
    FieldWrite(&'a FieldDescriptor),
    ConstructorExecution(&'a ConstructorDescriptor),
    Construction(&'a ConstructorDescriptor),
    Call {
        caller: Caller<'a>,
        callee_class: &'a str,
        callee: Callee<'a>,
    },
}

impl MatchTarget<'_> {
    /// Join-point kind this target describes
    pub fn kind(&self) -> JoinPointKind {
        match self {
            MatchTarget::Execution(_) => JoinPointKind::MethodExecution,
            MatchTarget::FieldRead(_) => JoinPointKind::FieldRead,
            MatchTarget::FieldWrite(_) => JoinPointKind::FieldWrite,
            MatchTarget::ConstructorExecution(_) => JoinPointKind::ConstructorExecution,
            MatchTarget::Construction(_) => JoinPointKind::Construction,
            MatchTarget::Call { caller, callee, .. } => match (caller, callee) {
                (Caller::Method(_), Callee::Method(_)) => JoinPointKind::MethodCalledByMethod,
                (Caller::Constructor(_), Callee::Method(_)) => {
                    JoinPointKind::MethodCalledByConstructor
                }
                (Caller::Method(_), Callee::Constructor(_)) => {
                    JoinPointKind::ConstructorCalledByMethod
                }
                (Caller::Constructor(_), Callee::Constructor(_)) => {
                    JoinPointKind::ConstructorCalledByConstructor
                }
            },
        }
    }
}

/// Decides whether a pointcut selects a member
///
/// Implementations must be pure: the same inputs always give the same answer,
/// which is what makes repeated rebuilds deterministic. A malformed expression
/// is reported as a configuration error and fails the rebuild.
pub trait PointcutMatcher: Send + Sync {
    /// Method execution; `policy` decides how inherited methods are matched
    fn matches_execution(
        &self,
        pointcut: &Pointcut,
        class: &ClassDescriptor,
        method: &MethodDescriptor,
        policy: InheritancePolicy,
    ) -> Result<bool>;

    /// Field read (`write == false`) or write
    fn matches_field(
        &self,
        pointcut: &Pointcut,
        class: &ClassDescriptor,
        field: &FieldDescriptor,
        write: bool,
    ) -> Result<bool>;

    /// Constructor execution or post-construction, selected by `kind`
    fn matches_constructor(
        &self,
        pointcut: &Pointcut,
        class: &ClassDescriptor,
        constructor: &ConstructorDescriptor,
        kind: JoinPointKind,
    ) -> Result<bool>;

    /// One of the four call-site kinds
    fn matches_call(
        &self,
        pointcut: &Pointcut,
        class: &ClassDescriptor,
        caller: Caller<'_>,
        callee_class: &str,
        callee: Callee<'_>,
    ) -> Result<bool>;

    /// Dispatch on the target's kind
    fn matches(
        &self,
        pointcut: &Pointcut,
        class: &ClassDescriptor,
        target: &MatchTarget<'_>,
        policy: InheritancePolicy,
    ) -> Result<bool> {
        match *target {
            MatchTarget::Execution(method) => {
                self.matches_execution(pointcut, class, method, policy)
            }
            MatchTarget::FieldRead(field) => self.matches_field(pointcut, class, field, false),
            MatchTarget::FieldWrite(field) => self.matches_field(pointcut, class, field, true),
            MatchTarget::ConstructorExecution(ctor) => self.matches_constructor(
                pointcut,
                class,
                ctor,
                JoinPointKind::ConstructorExecution,
            ),
            MatchTarget::Construction(ctor) => {
                self.matches_constructor(pointcut, class, ctor, JoinPointKind::Construction)
            }
            MatchTarget::Call {
                caller,
                callee_class,
                callee,
            } => self.matches_call(pointcut, class, caller, callee_class, callee),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Matches on the expression being the member name
    struct NameMatcher;

    impl PointcutMatcher for NameMatcher {
        fn matches_execution(
            &self,
            pointcut: &Pointcut,
            class: &ClassDescriptor,
            method: &MethodDescriptor,
            policy: InheritancePolicy,
        ) -> Result<bool> {
            let owner = policy.match_class(class, method);
            Ok(pointcut.expression() == format!("{owner}.{}", method.name))
        }

        fn matches_field(
            &self,
            pointcut: &Pointcut,
            _class: &ClassDescriptor,
            field: &FieldDescriptor,
            write: bool,
        ) -> Result<bool> {
            Ok(write && pointcut.expression() == &*field.name)
        }

        fn matches_constructor(
            &self,
            _pointcut: &Pointcut,
            _class: &ClassDescriptor,
            _constructor: &ConstructorDescriptor,
            kind: JoinPointKind,
        ) -> Result<bool> {
            Ok(kind == JoinPointKind::Construction)
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

    #[test]
    fn test_default_matches_dispatches_on_kind() {
        let class = ClassDescriptor::new("com.acme.Point")
            .with_field("x", "I", Default::default())
            .with_constructor("()V", Vec::new());
        let pointcut = Pointcut::new("x");

        let read = MatchTarget::FieldRead(&class.fields[0]);
        let write = MatchTarget::FieldWrite(&class.fields[0]);
        assert!(!NameMatcher
            .matches(&pointcut, &class, &read, InheritancePolicy::default())
            .unwrap_or(true));
        assert!(NameMatcher
            .matches(&pointcut, &class, &write, InheritancePolicy::default())
            .unwrap_or(false));

        let construction = MatchTarget::Construction(&class.constructors[0]);
        assert_eq!(construction.kind(), JoinPointKind::Construction);
        assert!(NameMatcher
            .matches(&pointcut, &class, &construction, InheritancePolicy::default())
            .unwrap_or(false));
    }

    #[test]
    fn test_inheritance_policy_selects_match_class() {
        let base = Arc::new(
            ClassDescriptor::new("com.acme.Base")
                .with_method(MethodDescriptor::new("", "audit", "()V")),
        );
        let class = ClassDescriptor::new("com.acme.Account").with_superclass(base);
        let methods = class.advisable_methods(false);
        let audit = methods[0];

        let by_declaring = Pointcut::new("com.acme.Base.audit");
        let by_advised = Pointcut::new("com.acme.Account.audit");

        assert!(NameMatcher
            .matches_execution(&by_declaring, &class, audit, InheritancePolicy::DeclaringClass)
            .unwrap_or(false));
        assert!(!NameMatcher
            .matches_execution(&by_advised, &class, audit, InheritancePolicy::DeclaringClass)
            .unwrap_or(true));
        assert!(NameMatcher
            .matches_execution(&by_advised, &class, audit, InheritancePolicy::AdvisedClass)
            .unwrap_or(false));
    }

    #[test]
    fn test_call_target_kind() {
        let caller = ConstructorDescriptor {
            declaring_class: Arc::from("com.acme.Main"),
            descriptor: Arc::from("()V"),
            index: 0,
            modifiers: Default::default(),
            declared_faults: Vec::new(),
            excluded: false,
        };
        let callee = MethodDescriptor::new("java.io.Writer", "write", "(I)V");
        let target = MatchTarget::Call {
            caller: Caller::Constructor(&caller),
            callee_class: "java.io.Writer",
            callee: Callee::Method(&callee),
        };
        assert_eq!(target.kind(), JoinPointKind::MethodCalledByConstructor);
    }
}
