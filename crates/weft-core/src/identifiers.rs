//! Identifiers and signature hashing

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Index of an advisor inside its manager's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdvisorId(pub u64);

impl fmt::Display for AdvisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "advisor-{}", self.0)
    }
}

/// Identity of one advised object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object-{}", self.0)
    }
}

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Create a name from any string-like value
            pub fn new(name: impl Into<Arc<str>>) -> Self {
                Self(name.into())
            }

            /// Borrow the name as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), &*self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

name_type!(
    /// Unique name of an advice binding
    BindingName
);

name_type!(
    /// Unique name of an aspect definition
    AspectName
);

/// Stable hash of a member signature (name plus type descriptor)
///
/// Two members with the same name and descriptor hash identically regardless of
/// the declaring class, which is what lets a subclass advisor recognise an
/// override of an inherited method.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureHash(pub i64);

/// Member name used for constructor signatures
pub const CONSTRUCTOR_NAME: &str = "<init>";

impl SignatureHash {
    /// Hash of a method signature
    pub fn method(name: &str, descriptor: &str) -> Self {
        Self::digest(name, descriptor)
    }

    /// Hash of a constructor signature
    pub fn constructor(descriptor: &str) -> Self {
        Self::digest(CONSTRUCTOR_NAME, descriptor)
    }

    fn digest(name: &str, descriptor: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(descriptor.as_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(i64::from_be_bytes(prefix))
    }
}

impl fmt::Debug for SignatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureHash({self})")
    }
}

impl fmt::Display for SignatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.to_be_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_hash_is_stable() {
        let a = SignatureHash::method("deposit", "(J)V");
        let b = SignatureHash::method("deposit", "(J)V");
        assert_eq!(a, b);
        assert_eq!(a.to_string().len(), 16);
    }

    #[test]
    fn test_signature_hash_separates_name_and_descriptor() {
        assert_ne!(
            SignatureHash::method("ab", "c"),
            SignatureHash::method("a", "bc")
        );
        assert_ne!(
            SignatureHash::method(CONSTRUCTOR_NAME, "()V"),
            SignatureHash::method("init", "()V")
        );
        assert_eq!(
            SignatureHash::constructor("()V"),
            SignatureHash::method(CONSTRUCTOR_NAME, "()V")
        );
    }

    #[test]
    fn test_names_compare_by_content() {
        let a = BindingName::from("audit");
        let b = BindingName::new(String::from("audit"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "audit");
        assert_eq!(format!("{a:?}"), "BindingName(\"audit\")");
    }
}
