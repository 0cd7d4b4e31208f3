//! # stockferry testkit
//!
//! Test utilities for stockferry.
//!
//! This crate provides:
//! - Record fixtures and store helpers
//! - A scripted transport for driving transfers deterministically
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockferry_testkit::prelude::*;
//!
//! #[test]
//! fn flaky_chunk_recovers() {
//!     let transport = ScriptedTransport::new().fail_chunk(2, 2);
//!     let engine = TestEngine::in_memory(SyncConfig::new(), transport.clone());
//!     // ... submit and wait
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::transport::*;
    pub use stockferry_core::ManualClock;
}

pub use fixtures::*;
pub use generators::*;
pub use stockferry_core::ManualClock;
pub use transport::*;
