//! Testing infrastructure for traceflow integration tests.
//!
//! - `fixtures`: raw trace payload builders and a fixed test clock
//! - `assertions`: structural checks on reduced trace groups
//! - `logging`: opt-in log output for test runs

pub mod assertions;
pub mod fixtures;
pub mod logging;

pub use fixtures::{Payload, at};
pub use logging::init_test_logging;
