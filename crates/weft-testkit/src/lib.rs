//! Weft Testing Infrastructure
//!
//! Shared fixtures for engine tests: a glob-based [`PatternMatcher`], recording
//! and control-flow interceptors, canned class shapes and dispatch stubs, and
//! proptest strategies.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! weft-testkit = { path = "../weft-testkit" }
//! ```
//!
//! ```rust,ignore
//! use weft_testkit::*;
//!
//! #[test]
//! fn audit_runs_first() {
//!     let manager = test_manager();
//!     let journal = Journal::new();
//!     manager
//!         .add_binding(AdviceBinding::new("audit", "execution(*.deposit)")
//!             .with_interceptor(RecordingInterceptor::new("audit", &journal)))
//!         .unwrap();
//!     let advisor = manager.attach(account_class()).unwrap();
//!     // ...
//! }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

pub mod fixtures;
pub mod interceptors;
pub mod logging;
pub mod matcher;
pub mod strategies;

pub use fixtures::*;
pub use interceptors::*;
pub use logging::init_test_tracing;
pub use matcher::{glob_matches, PatternMatcher};
