//! Weft Core - Join Point Data Model
//!
//! Pure data types shared by the weaving engine and its hosts. Nothing in this
//! crate locks, allocates chains, or dispatches calls; it only describes *where*
//! advice can attach and *what* flows through an advised call.
//!
//! # Contents
//!
//! ## Identity
//! - [`JoinPointIdentity`]: the nine advisable location kinds, used as lookup keys
//! - [`SignatureHash`]: stable hash of a member's name and descriptor
//! - [`AdvisorId`], [`ObjectId`], [`BindingName`], [`AspectName`]
//!
//! ## Class Shape
//! - [`ClassDescriptor`] with its [`MethodDescriptor`], [`FieldDescriptor`] and
//!   [`ConstructorDescriptor`] members
//!
//! ## Runtime Payloads
//! - [`Value`]: arguments and results
//! - [`Fault`]: the hosted program's exception, with declared-type filtering
//!
//! ## Consumed Interfaces
//! - [`PointcutMatcher`]: does a pointcut select a member?
//! - [`MetadataProvider`]: tag/value lookup for members

#![allow(missing_docs)]
#![forbid(unsafe_code)]

/// Class and member descriptions
pub mod descriptor;

/// Configuration and resolution errors
pub mod errors;

/// Runtime faults raised by advised calls
pub mod fault;

/// Identifiers and signature hashing
pub mod identifiers;

/// Join-point identities and kinds
pub mod joinpoint;

/// Member metadata lookup
pub mod metadata;

/// Pointcut handles and the matcher interface
pub mod pointcut;

/// Argument and result values
pub mod value;

pub use descriptor::{
    ClassDescriptor, ConstructorDescriptor, FieldDescriptor, MethodDescriptor, Modifiers,
};
pub use errors::{Result, WeftError};
pub use fault::Fault;
pub use identifiers::{AdvisorId, AspectName, BindingName, ObjectId, SignatureHash};
pub use joinpoint::{JoinPointIdentity, JoinPointKind};
pub use metadata::{MemberRef, MetadataProvider, MetadataTable, NoMetadata};
pub use pointcut::{Callee, Caller, InheritancePolicy, MatchTarget, Pointcut, PointcutMatcher};
pub use value::{ObjectRef, Value};
