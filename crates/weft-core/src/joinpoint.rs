//! Join-point identities
//!
//! A [`JoinPointIdentity`] names one advisable location of one class. It is the
//! lookup key into an advisor and stays stable for as long as the class keeps its
//! structural shape: methods are keyed by signature hash, fields and constructors
//! by declaration index, call sites by (caller, callee class, callee signature).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::identifiers::SignatureHash;

/// Closed set of advisable location kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPointKind {
    MethodExecution,
    FieldRead,
    FieldWrite,
    ConstructorExecution,
    Construction,
    MethodCalledByMethod,
    MethodCalledByConstructor,
    ConstructorCalledByMethod,
    ConstructorCalledByConstructor,
}

impl JoinPointKind {
    /// All kinds in declaration order
    pub const ALL: [JoinPointKind; 9] = [
        JoinPointKind::MethodExecution,
        JoinPointKind::FieldRead,
        JoinPointKind::FieldWrite,
        JoinPointKind::ConstructorExecution,
        JoinPointKind::Construction,
        JoinPointKind::MethodCalledByMethod,
        JoinPointKind::MethodCalledByConstructor,
        JoinPointKind::ConstructorCalledByMethod,
        JoinPointKind::ConstructorCalledByConstructor,
    ];

    /// Whether this kind is observed at the caller rather than the callee
    pub fn is_caller_side(&self) -> bool {
        matches!(
            self,
            Self::MethodCalledByMethod
                | Self::MethodCalledByConstructor
                | Self::ConstructorCalledByMethod
                | Self::ConstructorCalledByConstructor
        )
    }

    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MethodExecution => "method_execution",
            Self::FieldRead => "field_read",
            Self::FieldWrite => "field_write",
            Self::ConstructorExecution => "constructor_execution",
            Self::Construction => "construction",
            Self::MethodCalledByMethod => "method_called_by_method",
            Self::MethodCalledByConstructor => "method_called_by_constructor",
            Self::ConstructorCalledByMethod => "constructor_called_by_method",
            Self::ConstructorCalledByConstructor => "constructor_called_by_constructor",
        }
    }
}

impl fmt::Display for JoinPointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed identity of one advisable location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JoinPointIdentity {
    MethodExecution {
        method: SignatureHash,
    },
    FieldRead {
        field: usize,
    },
    FieldWrite {
        field: usize,
    },
    ConstructorExecution {
        constructor: usize,
    },
    Construction {
        constructor: usize,
    },
    MethodCalledByMethod {
        caller: SignatureHash,
        callee_class: Arc<str>,
        callee: SignatureHash,
    },
    MethodCalledByConstructor {
        caller: usize,
        callee_class: Arc<str>,
        callee: SignatureHash,
    },
    ConstructorCalledByMethod {
        caller: SignatureHash,
        callee_class: Arc<str>,
        callee: SignatureHash,
    },
    ConstructorCalledByConstructor {
        caller: usize,
        callee_class: Arc<str>,
        callee: SignatureHash,
    },
}

impl JoinPointIdentity {
    /// The kind tag of this identity
    pub fn kind(&self) -> JoinPointKind {
        match self {
            Self::MethodExecution { .. } => JoinPointKind::MethodExecution,
            Self::FieldRead { .. } => JoinPointKind::FieldRead,
            Self::FieldWrite { .. } => JoinPointKind::FieldWrite,
            Self::ConstructorExecution { .. } => JoinPointKind::ConstructorExecution,
            Self::Construction { .. } => JoinPointKind::Construction,
            Self::MethodCalledByMethod { .. } => JoinPointKind::MethodCalledByMethod,
            Self::MethodCalledByConstructor { .. } => JoinPointKind::MethodCalledByConstructor,
            Self::ConstructorCalledByMethod { .. } => JoinPointKind::ConstructorCalledByMethod,
            Self::ConstructorCalledByConstructor { .. } => {
                JoinPointKind::ConstructorCalledByConstructor
            }
        }
    }

    /// Whether this identity names a call site
    pub fn is_caller_side(&self) -> bool {
        self.kind().is_caller_side()
    }

    /// Callee class of a call-site identity
    pub fn callee_class(&self) -> Option<&str> {
        match self {
            Self::MethodCalledByMethod { callee_class, .. }
            | Self::MethodCalledByConstructor { callee_class, .. }
            | Self::ConstructorCalledByMethod { callee_class, .. }
            | Self::ConstructorCalledByConstructor { callee_class, .. } => Some(callee_class),
            _ => None,
        }
    }
}

impl fmt::Display for JoinPointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodExecution { method } => write!(f, "execution[{method}]"),
            Self::FieldRead { field } => write!(f, "field-read[{field}]"),
            Self::FieldWrite { field } => write!(f, "field-write[{field}]"),
            Self::ConstructorExecution { constructor } => {
                write!(f, "constructor-execution[{constructor}]")
            }
            Self::Construction { constructor } => write!(f, "construction[{constructor}]"),
            Self::MethodCalledByMethod {
                caller,
                callee_class,
                callee,
            } => write!(f, "call[{caller} -> {callee_class}#{callee}]"),
            Self::MethodCalledByConstructor {
                caller,
                callee_class,
                callee,
            } => write!(f, "call[<init>{caller} -> {callee_class}#{callee}]"),
            Self::ConstructorCalledByMethod {
                caller,
                callee_class,
                callee,
            } => write!(f, "new[{caller} -> {callee_class}#{callee}]"),
            Self::ConstructorCalledByConstructor {
                caller,
                callee_class,
                callee,
            } => write!(f, "new[<init>{caller} -> {callee_class}#{callee}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let call = JoinPointIdentity::MethodCalledByConstructor {
            caller: 0,
            callee_class: Arc::from("com.acme.Ledger"),
            callee: SignatureHash::method("post", "()V"),
        };
        assert_eq!(call.kind(), JoinPointKind::MethodCalledByConstructor);
        assert!(call.is_caller_side());
        assert_eq!(call.callee_class(), Some("com.acme.Ledger"));

        let read = JoinPointIdentity::FieldRead { field: 2 };
        assert!(!read.is_caller_side());
        assert_eq!(read.callee_class(), None);
        assert_eq!(read.to_string(), "field-read[2]");

        let caller_kinds = JoinPointKind::ALL
            .iter()
            .filter(|kind| kind.is_caller_side())
            .count();
        assert_eq!(caller_kinds, 4);
    }

    #[test]
    fn test_identity_serializes_with_kind_tag() {
        let identity = JoinPointIdentity::FieldWrite { field: 1 };
        let value = serde_json::to_value(&identity).expect("serialize identity");
        assert_eq!(value["kind"], "field_write");
        assert_eq!(value["field"], 1);
    }

    #[test]
    fn test_identity_ordering_is_total() {
        let mut identities = vec![
            JoinPointIdentity::Construction { constructor: 0 },
            JoinPointIdentity::FieldRead { field: 3 },
            JoinPointIdentity::FieldRead { field: 1 },
            JoinPointIdentity::MethodExecution {
                method: SignatureHash(7),
            },
        ];
        identities.sort();
        assert_eq!(
            identities[0],
            JoinPointIdentity::MethodExecution {
                method: SignatureHash(7)
            }
        );
        assert_eq!(identities[1], JoinPointIdentity::FieldRead { field: 1 });
    }
}
