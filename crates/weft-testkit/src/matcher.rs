//! Glob pointcut matcher
//!
//! A small pointcut language for tests:
//!
//! ```text
//! expr       := term ("||" term)*
//! term       := factor ("&&" factor)*
//! factor     := "!" factor | designator "(" pattern ")"
//! designator := execution | get | set | constructor | construction
//!             | call | within | tagged
//! ```
//!
//! Patterns are `Class.member` globs in [`glob`] syntax; `*` matches any run of
//! characters, dots included.
//! `constructor(Class)` selects constructor execution, `construction(Class)`
//! selects post-construction, `call(Class.new)` selects constructor calls and
//! `tagged(key)` selects members carrying the metadata key.

use glob::Pattern;
use std::sync::Arc;
use weft_core::{
    Callee, Caller, ClassDescriptor, ConstructorDescriptor, FieldDescriptor, InheritancePolicy,
    JoinPointKind, MatchTarget, MemberRef, MetadataProvider, MethodDescriptor, NoMetadata,
    Pointcut, PointcutMatcher, Result, WeftError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Designator {
    Execution { class: String, member: String },
    Get { class: String, member: String },
    Set { class: String, member: String },
    Constructor { class: String },
    Construction { class: String },
    Call { class: String, member: String },
    Within { class: String },
    Tagged { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    Designator(Designator),
}

fn parse(expression: &str) -> Result<Expr> {
    let terms = expression
        .split("||")
        .map(|term| {
            let factors = term
                .split("&&")
                .map(|factor| parse_factor(factor.trim(), expression))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::And(factors))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Expr::Or(terms))
}

fn parse_factor(factor: &str, expression: &str) -> Result<Expr> {
    if let Some(negated) = factor.strip_prefix('!') {
        return Ok(Expr::Not(Box::new(parse_factor(negated.trim(), expression)?)));
    }
    let malformed = || WeftError::configuration(format!("Malformed pointcut '{expression}'"));
    let (designator, rest) = factor.split_once('(').ok_or_else(malformed)?;
    let pattern = rest.strip_suffix(')').ok_or_else(malformed)?.trim();
    if pattern.is_empty() || Pattern::new(pattern).is_err() {
        return Err(malformed());
    }
    let member_pattern = || -> Result<(String, String)> {
        let (class, member) = pattern.rsplit_once('.').ok_or_else(malformed)?;
        Ok((class.to_string(), member.to_string()))
    };
    let designator = match designator.trim() {
        "execution" => {
            let (class, member) = member_pattern()?;
            Designator::Execution { class, member }
        }
        "get" => {
            let (class, member) = member_pattern()?;
            Designator::Get { class, member }
        }
        "set" => {
            let (class, member) = member_pattern()?;
            Designator::Set { class, member }
        }
        "call" => {
            let (class, member) = member_pattern()?;
            Designator::Call { class, member }
        }
        "constructor" => Designator::Constructor {
            class: pattern.to_string(),
        },
        "construction" => Designator::Construction {
            class: pattern.to_string(),
        },
        "within" => Designator::Within {
            class: pattern.to_string(),
        },
        "tagged" => Designator::Tagged {
            key: pattern.to_string(),
        },
        other => {
            return Err(WeftError::configuration(format!(
                "Unknown pointcut designator '{other}' in '{expression}'"
            )))
        }
    };
    Ok(Expr::Designator(designator))
}

/// Whether `text` matches the glob `pattern`; a malformed pattern matches nothing
pub fn glob_matches(pattern: &str, text: &str) -> bool {
    Pattern::new(pattern).is_ok_and(|pattern| pattern.matches(text))
}

/// Matcher for the glob pointcut language
#[derive(Clone)]
pub struct PatternMatcher {
    metadata: Arc<dyn MetadataProvider>,
}

impl PatternMatcher {
    pub fn new() -> Self {
        Self {
            metadata: Arc::new(NoMetadata),
        }
    }

    /// Resolve `tagged(key)` against `metadata`
    pub fn with_metadata(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self { metadata }
    }

    /// Parse an expression, reporting the configuration error a rebuild would
    pub fn validate(expression: &str) -> Result<()> {
        parse(expression).map(|_| ())
    }

    fn evaluate(
        &self,
        expr: &Expr,
        class: &ClassDescriptor,
        target: &MatchTarget<'_>,
        policy: InheritancePolicy,
    ) -> bool {
        match expr {
            Expr::Or(terms) => terms
                .iter()
                .any(|term| self.evaluate(term, class, target, policy)),
            Expr::And(factors) => factors
                .iter()
                .all(|factor| self.evaluate(factor, class, target, policy)),
            Expr::Not(inner) => !self.evaluate(inner, class, target, policy),
            Expr::Designator(designator) => self.designator(designator, class, target, policy),
        }
    }

    fn designator(
        &self,
        designator: &Designator,
        class: &ClassDescriptor,
        target: &MatchTarget<'_>,
        policy: InheritancePolicy,
    ) -> bool {
        match (designator, *target) {
            (Designator::Execution { class: pattern, member }, MatchTarget::Execution(method)) => {
                glob_matches(pattern, policy.match_class(class, method))
                    && glob_matches(member, &method.name)
            }
            (Designator::Get { class: pattern, member }, MatchTarget::FieldRead(field))
            | (Designator::Set { class: pattern, member }, MatchTarget::FieldWrite(field)) => {
                glob_matches(pattern, &field.declaring_class) && glob_matches(member, &field.name)
            }
            (
                Designator::Constructor { class: pattern },
                MatchTarget::ConstructorExecution(ctor),
            )
            | (Designator::Construction { class: pattern }, MatchTarget::Construction(ctor)) => {
                glob_matches(pattern, &ctor.declaring_class)
            }
            (
                Designator::Call { class: pattern, member },
                MatchTarget::Call {
                    callee_class,
                    callee,
                    ..
                },
            ) => {
                let name = match callee {
                    Callee::Method(method) => &*method.name,
                    Callee::Constructor(_) => "new",
                };
                glob_matches(pattern, callee_class) && glob_matches(member, name)
            }
            (Designator::Within { class: pattern }, _) => glob_matches(pattern, &class.name),
            (Designator::Tagged { key }, target) => self
                .metadata
                .resolve(&class.name, member_ref(&target), key)
                .is_some(),
            _ => false,
        }
    }

    fn check(
        &self,
        pointcut: &Pointcut,
        class: &ClassDescriptor,
        target: MatchTarget<'_>,
        policy: InheritancePolicy,
    ) -> Result<bool> {
        let expr = parse(pointcut.expression())?;
        Ok(self.evaluate(&expr, class, &target, policy))
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn member_ref<'a>(target: &MatchTarget<'a>) -> MemberRef<'a> {
    match *target {
        MatchTarget::Execution(method)
        | MatchTarget::Call {
            caller: Caller::Method(method),
            ..
        } => MemberRef::Method {
            name: &method.name,
            descriptor: &method.descriptor,
        },
        MatchTarget::FieldRead(field) | MatchTarget::FieldWrite(field) => {
            MemberRef::Field { name: &field.name }
        }
        MatchTarget::ConstructorExecution(ctor)
        | MatchTarget::Construction(ctor)
        | MatchTarget::Call {
            caller: Caller::Constructor(ctor),
            ..
        } => MemberRef::Constructor {
            descriptor: &ctor.descriptor,
        },
    }
}

impl PointcutMatcher for PatternMatcher {
    fn matches_execution(
        &self,
        pointcut: &Pointcut,
        class: &ClassDescriptor,
        method: &MethodDescriptor,
        policy: InheritancePolicy,
    ) -> Result<bool> {
        self.check(pointcut, class, MatchTarget::Execution(method), policy)
    }

    fn matches_field(
        &self,
        pointcut: &Pointcut,
        class: &ClassDescriptor,
        field: &FieldDescriptor,
        write: bool,
    ) -> Result<bool> {
        let target = if write {
            MatchTarget::FieldWrite(field)
        } else {
            MatchTarget::FieldRead(field)
        };
        self.check(pointcut, class, target, InheritancePolicy::default())
    }

    fn matches_constructor(
        &self,
        pointcut: &Pointcut,
        class: &ClassDescriptor,
        constructor: &ConstructorDescriptor,
        kind: JoinPointKind,
    ) -> Result<bool> {
        let target = if kind == JoinPointKind::Construction {
            MatchTarget::Construction(constructor)
        } else {
            MatchTarget::ConstructorExecution(constructor)
        };
        self.check(pointcut, class, target, InheritancePolicy::default())
    }

    fn matches_call(
        &self,
        pointcut: &Pointcut,
        class: &ClassDescriptor,
        caller: Caller<'_>,
        callee_class: &str,
        callee: Callee<'_>,
    ) -> Result<bool> {
        let target = MatchTarget::Call {
            caller,
            callee_class,
            callee,
        };
        self.check(pointcut, class, target, InheritancePolicy::default())
    }
}
