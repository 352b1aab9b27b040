//! Stable exit codes for `raf` commands.

/// Command succeeded; for `raf do`, the project completed.
pub const OK: i32 = 0;
/// Invalid arguments, configuration or repository state, or any runner error.
pub const INVALID: i32 = 1;
/// `raf do` finished with at least one failed task.
pub const FAILED: i32 = 2;
/// Stopped by Ctrl-C.
pub const INTERRUPTED: i32 = 3;
/// Merging a project branch hit conflicts; the merge was aborted.
pub const CONFLICT: i32 = 4;
