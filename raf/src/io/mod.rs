//! Side-effecting adapters: filesystem, git, child processes, configuration.

pub mod agent;
pub mod config;
pub mod context;
pub mod git;
pub mod process;
pub mod project;
pub mod prompt;
pub mod tracker;
pub mod worktree;
