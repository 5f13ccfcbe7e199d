//! Stable exit codes for cobbler CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed (git, tracker, config or lifecycle error).
pub const FAILED: i32 = 1;
/// Lifecycle transition refused because the working tree is dirty.
pub const DIRTY: i32 = 2;
/// Generation branch could not be chosen unambiguously.
pub const AMBIGUOUS: i32 = 3;
