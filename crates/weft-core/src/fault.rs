//! Runtime faults raised inside advised calls
//!
//! A [`Fault`] is the hosted program's exception. It travels back through the
//! interceptor chain as the `Err` side of an invocation result. Faults are either
//! *checked* (the member signature must declare them) or *unchecked*; at the
//! dispatch boundary an undeclared checked fault is wrapped into an unchecked
//! [`Fault::UNDECLARED`] fault so callers never observe a checked type their
//! signature did not promise.

use std::fmt;
use std::sync::Arc;

use crate::errors::WeftError;

/// An exception raised by advice or by the advised member itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    /// Fully qualified fault type
    pub type_name: Arc<str>,
    pub message: Arc<str>,
    /// Whether member signatures must declare this fault type
    pub checked: bool,
    pub cause: Option<Arc<Fault>>,
}

impl Fault {
    /// Wrapper type for checked faults that escape an undeclaring signature
    pub const UNDECLARED: &'static str = "UndeclaredThrowable";

    /// Type of faults raised when an aspect factory fails during dispatch
    pub const ASPECT_CREATION: &'static str = "AspectCreationFailed";

    /// Type of faults raised when dispatch cannot find its target
    pub const DISPATCH: &'static str = "DispatchFailed";

    /// A checked fault
    pub fn checked(type_name: impl Into<Arc<str>>, message: impl Into<Arc<str>>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            checked: true,
            cause: None,
        }
    }

    /// An unchecked fault
    pub fn unchecked(type_name: impl Into<Arc<str>>, message: impl Into<Arc<str>>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            checked: false,
            cause: None,
        }
    }

    /// Attach a cause
    pub fn with_cause(mut self, cause: Fault) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Fault raised when an aspect factory fails on lazy creation
    pub fn aspect_creation(error: &WeftError) -> Self {
        Self::unchecked(Self::ASPECT_CREATION, error.to_string())
    }

    /// Whether this fault has the given type
    pub fn is(&self, type_name: &str) -> bool {
        &*self.type_name == type_name
    }

    /// Apply declared-type filtering at the dispatch boundary
    ///
    /// Unchecked faults and checked faults listed in `declared` pass unchanged.
    /// Any other checked fault becomes an unchecked [`Fault::UNDECLARED`] whose
    /// cause is the original.
    pub fn filter_declared(self, declared: &[Arc<str>]) -> Self {
        if !self.checked || declared.iter().any(|ty| **ty == *self.type_name) {
            return self;
        }
        let message = format!("undeclared checked fault {}", self.type_name);
        Self::unchecked(Self::UNDECLARED, message).with_cause(self)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<WeftError> for Fault {
    fn from(error: WeftError) -> Self {
        match &error {
            WeftError::AspectCreation { .. } => Self::aspect_creation(&error),
            _ => Self::unchecked(Self::DISPATCH, error.to_string()),
        }
    }
}
