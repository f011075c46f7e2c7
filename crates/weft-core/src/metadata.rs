//! Member metadata lookup
//!
//! Metadata is tag/value data attached to classes and members by the host. The
//! resolution algorithm never consults it; advice reads it through the
//! invocation, which falls back to the configured [`MetadataProvider`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::Value;

/// The class or member a metadata lookup is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRef<'a> {
    Class,
    Method { name: &'a str, descriptor: &'a str },
    Field { name: &'a str },
    Constructor { descriptor: &'a str },
}

impl MemberRef<'_> {
    fn key(&self) -> String {
        match self {
            MemberRef::Class => String::new(),
            MemberRef::Method { name, descriptor } => format!("{name}{descriptor}"),
            MemberRef::Field { name } => (*name).to_string(),
            MemberRef::Constructor { descriptor } => format!("<init>{descriptor}"),
        }
    }
}

/// Source of member metadata
pub trait MetadataProvider: Send + Sync {
    /// Look up `key` on `member` of `class`
    fn resolve(&self, class: &str, member: MemberRef<'_>, key: &str) -> Option<Value>;
}

/// Provider with no metadata at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetadata;

impl MetadataProvider for NoMetadata {
    fn resolve(&self, _class: &str, _member: MemberRef<'_>, _key: &str) -> Option<Value> {
        None
    }
}

/// Immutable in-memory metadata table
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    entries: HashMap<(Arc<str>, String, String), Value>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    pub fn with(
        mut self,
        class: impl Into<Arc<str>>,
        member: MemberRef<'_>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.entries
            .insert((class.into(), member.key(), key.into()), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MetadataProvider for MetadataTable {
    fn resolve(&self, class: &str, member: MemberRef<'_>, key: &str) -> Option<Value> {
        self.entries
            .get(&(Arc::from(class), member.key(), key.to_string()))
            .cloned()
    }
}
