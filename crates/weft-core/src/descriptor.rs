//! Class and member descriptions
//!
//! A [`ClassDescriptor`] is the engine's only view of a host class: its name,
//! superclass chain and declared members. The engine never loads or parses
//! classes itself; hosts build descriptors from whatever object model they have.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::identifiers::{SignatureHash, CONSTRUCTOR_NAME};

/// Member modifiers relevant to advisability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_native: bool,
    pub is_synthetic: bool,
    pub is_final: bool,
}

impl Modifiers {
    /// Modifiers of a static member
    pub fn static_member() -> Self {
        Self {
            is_static: true,
            ..Self::default()
        }
    }

    /// Modifiers of an abstract member
    pub fn abstract_member() -> Self {
        Self {
            is_abstract: true,
            ..Self::default()
        }
    }

    /// Modifiers of a native member
    pub fn native_member() -> Self {
        Self {
            is_native: true,
            ..Self::default()
        }
    }

    /// Modifiers of a compiler-generated wrapper
    pub fn synthetic_member() -> Self {
        Self {
            is_synthetic: true,
            ..Self::default()
        }
    }

    /// Whether a member with these modifiers has a body that can be advised
    pub fn has_advisable_body(&self, advise_synthetic: bool) -> bool {
        !self.is_abstract && !self.is_native && (advise_synthetic || !self.is_synthetic)
    }
}

/// A declared method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub declaring_class: Arc<str>,
    pub name: Arc<str>,
    pub descriptor: Arc<str>,
    pub modifiers: Modifiers,
    /// Checked fault types the method declares it may raise
    pub declared_faults: Vec<Arc<str>>,
    /// Explicitly excluded from advice
    pub excluded: bool,
}

impl MethodDescriptor {
    /// Create a method description
    pub fn new(
        declaring_class: impl Into<Arc<str>>,
        name: impl Into<Arc<str>>,
        descriptor: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            declaring_class: declaring_class.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            modifiers: Modifiers::default(),
            declared_faults: Vec::new(),
            excluded: false,
        }
    }

    /// Set the modifiers
    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Declare a checked fault type
    pub fn declaring_fault(mut self, fault_type: impl Into<Arc<str>>) -> Self {
        self.declared_faults.push(fault_type.into());
        self
    }

    /// Mark the method as explicitly excluded from advice
    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }

    /// Signature hash used as the method's join-point key
    pub fn hash(&self) -> SignatureHash {
        SignatureHash::method(&self.name, &self.descriptor)
    }

    /// Whether advice may attach to this method
    pub fn is_advisable(&self, advise_synthetic: bool) -> bool {
        !self.excluded && self.modifiers.has_advisable_body(advise_synthetic)
    }
}

/// A declared field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub declaring_class: Arc<str>,
    pub name: Arc<str>,
    pub type_descriptor: Arc<str>,
    /// Position among the class's declared fields
    pub index: usize,
    pub modifiers: Modifiers,
    pub excluded: bool,
}

impl FieldDescriptor {
    /// Whether reads and writes of this field may be advised
    pub fn is_advisable(&self, advise_synthetic: bool) -> bool {
        !self.excluded && (advise_synthetic || !self.modifiers.is_synthetic)
    }
}

/// A declared constructor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructorDescriptor {
    pub declaring_class: Arc<str>,
    pub descriptor: Arc<str>,
    /// Position among the class's declared constructors
    pub index: usize,
    pub modifiers: Modifiers,
    pub declared_faults: Vec<Arc<str>>,
    pub excluded: bool,
}

impl ConstructorDescriptor {
    /// Signature hash used when this constructor is the callee of a call site
    pub fn hash(&self) -> SignatureHash {
        SignatureHash::constructor(&self.descriptor)
    }

    /// Whether construction of the class through this constructor may be advised
    pub fn is_advisable(&self, advise_synthetic: bool) -> bool {
        !self.excluded && self.modifiers.has_advisable_body(advise_synthetic)
    }

    /// Member name used for constructors
    pub fn name(&self) -> &'static str {
        CONSTRUCTOR_NAME
    }
}

/// Structural description of one class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDescriptor {
    pub name: Arc<str>,
    pub superclass: Option<Arc<ClassDescriptor>>,
    pub methods: Vec<MethodDescriptor>,
    pub fields: Vec<FieldDescriptor>,
    pub constructors: Vec<ConstructorDescriptor>,
    pub modifiers: Modifiers,
}

impl ClassDescriptor {
    /// Create an empty class description
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            methods: Vec::new(),
            fields: Vec::new(),
            constructors: Vec::new(),
            modifiers: Modifiers::default(),
        }
    }

    /// Set the superclass
    pub fn with_superclass(mut self, superclass: Arc<ClassDescriptor>) -> Self {
        self.superclass = Some(superclass);
        self
    }

    /// Declare a method; its declaring class is forced to this class
    pub fn with_method(mut self, mut method: MethodDescriptor) -> Self {
        method.declaring_class = Arc::clone(&self.name);
        self.methods.push(method);
        self
    }

    /// Declare a field at the next field index
    pub fn with_field(
        mut self,
        name: impl Into<Arc<str>>,
        type_descriptor: impl Into<Arc<str>>,
        modifiers: Modifiers,
    ) -> Self {
        let index = self.fields.len();
        self.fields.push(FieldDescriptor {
            declaring_class: Arc::clone(&self.name),
            name: name.into(),
            type_descriptor: type_descriptor.into(),
            index,
            modifiers,
            excluded: false,
        });
        self
    }

    /// Declare a constructor at the next constructor index
    pub fn with_constructor(
        mut self,
        descriptor: impl Into<Arc<str>>,
        declared_faults: Vec<Arc<str>>,
    ) -> Self {
        let index = self.constructors.len();
        self.constructors.push(ConstructorDescriptor {
            declaring_class: Arc::clone(&self.name),
            descriptor: descriptor.into(),
            index,
            modifiers: Modifiers::default(),
            declared_faults,
            excluded: false,
        });
        self
    }

    /// Superclass chain, nearest first
    pub fn ancestors(&self) -> impl Iterator<Item = &ClassDescriptor> {
        std::iter::successors(self.superclass.as_deref(), |class| {
            class.superclass.as_deref()
        })
    }

    /// Whether `name` is this class or one of its ancestors
    pub fn is_subclass_of(&self, name: &str) -> bool {
        &*self.name == name || self.ancestors().any(|class| &*class.name == name)
    }

    /// Find a declared or inherited method by signature hash
    pub fn find_method(&self, hash: SignatureHash) -> Option<&MethodDescriptor> {
        std::iter::once(self)
            .chain(self.ancestors())
            .flat_map(|class| class.methods.iter())
            .find(|method| method.hash() == hash)
    }

    /// Methods whose execution may be advised on this class
    ///
    /// Declared methods come first in declaration order, followed by inherited
    /// methods that no nearer class overrides. A non-advisable declaration still
    /// hides the inherited method it overrides.
    pub fn advisable_methods(&self, advise_synthetic: bool) -> Vec<&MethodDescriptor> {
        let mut seen = HashSet::new();
        let mut methods = Vec::new();
        for class in std::iter::once(self).chain(self.ancestors()) {
            for method in &class.methods {
                if !seen.insert(method.hash()) {
                    continue;
                }
                if method.modifiers.is_static && !std::ptr::eq(class, self) {
                    continue;
                }
                if method.is_advisable(advise_synthetic) {
                    methods.push(method);
                }
            }
        }
        methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Arc<ClassDescriptor> {
        Arc::new(
            ClassDescriptor::new("com.acme.Base")
                .with_method(MethodDescriptor::new("", "toString", "()Ljava/lang/String;"))
                .with_method(MethodDescriptor::new("", "audit", "()V"))
                .with_method(
                    MethodDescriptor::new("", "helper", "()V")
                        .with_modifiers(Modifiers::static_member()),
                ),
        )
    }

    #[test]
    fn test_inherited_methods_follow_declared_ones() {
        let class = ClassDescriptor::new("com.acme.Account")
            .with_superclass(base())
            .with_method(MethodDescriptor::new("", "deposit", "(J)V"))
            .with_method(MethodDescriptor::new("", "toString", "()Ljava/lang/String;"));

        let methods = class.advisable_methods(false);
        let names: Vec<(&str, &str)> = methods
            .iter()
            .map(|m| (&*m.declaring_class, &*m.name))
            .collect();

        assert_eq!(
            names,
            vec![
                ("com.acme.Account", "deposit"),
                ("com.acme.Account", "toString"),
                ("com.acme.Base", "audit"),
            ]
        );
    }

    #[test]
    fn test_non_advisable_members_are_filtered() {
        let class = ClassDescriptor::new("com.acme.Shape")
            .with_method(
                MethodDescriptor::new("", "area", "()D")
                    .with_modifiers(Modifiers::abstract_member()),
            )
            .with_method(
                MethodDescriptor::new("", "hash", "()I").with_modifiers(Modifiers::native_member()),
            )
            .with_method(
                MethodDescriptor::new("", "access$000", "()V")
                    .with_modifiers(Modifiers::synthetic_member()),
            )
            .with_method(MethodDescriptor::new("", "secret", "()V").excluded())
            .with_method(MethodDescriptor::new("", "draw", "()V"));

        let names: Vec<&str> = class
            .advisable_methods(false)
            .iter()
            .map(|m| &*m.name)
            .collect();
        assert_eq!(names, vec!["draw"]);

        let with_synthetic: Vec<&str> = class
            .advisable_methods(true)
            .iter()
            .map(|m| &*m.name)
            .collect();
        assert_eq!(with_synthetic, vec!["access$000", "draw"]);
    }

    #[test]
    fn test_abstract_override_hides_inherited_body() {
        let class = ClassDescriptor::new("com.acme.Abstract")
            .with_superclass(base())
            .with_method(
                MethodDescriptor::new("", "audit", "()V")
                    .with_modifiers(Modifiers::abstract_member()),
            );

        assert!(class
            .advisable_methods(false)
            .iter()
            .all(|m| &*m.name != "audit"));
    }

    #[test]
    fn test_member_indices_follow_declaration_order() {
        let class = ClassDescriptor::new("com.acme.Point")
            .with_field("x", "I", Modifiers::default())
            .with_field("y", "I", Modifiers::default())
            .with_constructor("()V", Vec::new())
            .with_constructor("(II)V", Vec::new());

        assert_eq!(class.fields[1].index, 1);
        assert_eq!(&*class.fields[1].declaring_class, "com.acme.Point");
        assert_eq!(class.constructors[1].index, 1);
        assert_ne!(class.constructors[0].hash(), class.constructors[1].hash());
    }

    #[test]
    fn test_subclass_queries() {
        let class = ClassDescriptor::new("com.acme.Account").with_superclass(base());
        assert!(class.is_subclass_of("com.acme.Base"));
        assert!(class.is_subclass_of("com.acme.Account"));
        assert!(!class.is_subclass_of("com.acme.Other"));
        assert!(class
            .find_method(SignatureHash::method("audit", "()V"))
            .is_some());
    }
}
