//! Error type for configuration and resolution failures
//!
//! Everything that can go wrong while deploying bindings, declaring precedence,
//! attaching classes or rebuilding chains is reported as a [`WeftError`]. Failures
//! *inside* an advised call are [`crate::Fault`]s instead.

/// Unified error type for all Weft configuration and resolution operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WeftError {
    /// Invalid configuration or malformed pointcut expression
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the invalid input
        message: String,
    },

    /// A binding names a precedence group nobody declared
    #[error("Unknown precedence group '{group}' referenced by binding '{binding}'")]
    UnknownPrecedenceGroup {
        /// The undeclared group
        group: String,
        /// The binding referencing it
        binding: String,
    },

    /// The declared precedence relation contains a cycle
    #[error("Precedence relation is cyclic through group '{group}'")]
    PrecedenceCycle {
        /// A group participating in the cycle
        group: String,
    },

    /// A binding with this name is already deployed
    #[error("Binding '{name}' is already deployed")]
    DuplicateBinding {
        /// Binding name
        name: String,
    },

    /// No binding with this name is deployed
    #[error("Binding '{name}' is not deployed")]
    UnknownBinding {
        /// Binding name
        name: String,
    },

    /// An aspect with this name is already defined
    #[error("Aspect '{name}' is already defined")]
    DuplicateAspect {
        /// Aspect name
        name: String,
    },

    /// No aspect with this name is defined
    #[error("Aspect '{name}' is not defined")]
    UnknownAspect {
        /// Aspect name
        name: String,
    },

    /// The advisor owns no join point with this identity
    #[error("Join point {identity} is not known to the advisor of {class}")]
    UnknownJoinPoint {
        /// Advised class
        class: String,
        /// Rendered join-point identity
        identity: String,
    },

    /// Dispatch reached a join point that has no executable entry point
    #[error("No dispatch stub registered for {identity} on {class}")]
    MissingDispatchStub {
        /// Advised class
        class: String,
        /// Rendered join-point identity
        identity: String,
    },

    /// An aspect factory failed
    #[error("Failed to create instance of aspect '{aspect}': {message}")]
    AspectCreation {
        /// Aspect name
        aspect: String,
        /// Factory failure description
        message: String,
    },

    /// The advisor was cleaned up and no longer accepts changes
    #[error("Advisor {advisor} for {class} has been cleaned up")]
    AdvisorDetached {
        /// Advisor index
        advisor: u64,
        /// Advised class
        class: String,
    },

    /// Internal invariant violation
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the violated invariant
        message: String,
    },
}

impl WeftError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an aspect creation error
    pub fn aspect_creation(aspect: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AspectCreation {
            aspect: aspect.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error stems from deployment configuration rather than engine state
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::UnknownPrecedenceGroup { .. }
                | Self::PrecedenceCycle { .. }
                | Self::DuplicateBinding { .. }
                | Self::UnknownBinding { .. }
                | Self::DuplicateAspect { .. }
                | Self::UnknownAspect { .. }
        )
    }
}

/// Standard Result type for Weft operations
pub type Result<T> = std::result::Result<T, WeftError>;

impl From<std::io::Error> for WeftError {
    fn from(err: std::io::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WeftError::PrecedenceCycle {
            group: "tx".to_string(),
        };
        assert_eq!(err.to_string(), "Precedence relation is cyclic through group 'tx'");
    }

    #[test]
    fn test_configuration_classification() {
        assert!(WeftError::configuration("bad expression").is_configuration());
        assert!(!WeftError::internal("oops").is_configuration());
        assert!(!WeftError::aspect_creation("Audit", "boom").is_configuration());
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "weft.toml");
        let err = WeftError::from(io_err);
        assert!(matches!(err, WeftError::Configuration { .. }));
    }
}
