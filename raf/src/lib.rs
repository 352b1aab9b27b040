//! RAF: run planned project tasks with an execution agent.
//!
//! A project is a folder of numbered plan files. Task state is never stored:
//! it is derived from which outcome files exist and the marker they end with.
//! The orchestrator repeatedly picks the next executable task, runs the agent
//! with a per-attempt timeout, and records the result as an outcome file and
//! git commits. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (dependency parsing, state
//!   derivation, selection, attempt classification, naming).
//! - **[`io`]**: Side-effecting operations (filesystem, git, child processes,
//!   configuration, prompt rendering).
//!
//! [`execute`] and [`start`] coordinate the two to implement `raf do`.

pub mod core;
pub mod execute;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod start;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
