//! Test Utilities Crate
//!
//! Provides shared test infrastructure, fixtures, and helpers for the
//! workflow test suites.
//!
//! # Modules
//!
//! - `fixtures`: Canonical validator, actors and timestamps
//! - `builders`: Builder patterns for events and event sequences
//! - `database`: PostgreSQL test container management
//! - `assertions`: Assertion helpers for projections and staged events
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
