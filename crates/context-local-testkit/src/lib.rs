//! Shared test fixtures for context-local
//!
//! Add this to a crate's `Cargo.toml` dev-dependencies:
//! ```toml
//! [dev-dependencies]
//! context-local-testkit = { path = "../context-local-testkit" }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod branches;
pub mod fixtures;
pub mod logging;

pub use branches::*;
pub use fixtures::*;
pub use logging::*;
