//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod attribution;
pub mod classifier;
pub mod dependencies;
pub mod derive;
pub mod naming;
pub mod outcome;
pub mod selector;
pub mod types;
