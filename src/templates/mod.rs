//! Embedded resources.

/// Seccomp profile applied when a task does not name its own. It keeps the
/// default Docker denials for host-affecting syscalls but lets programs call
/// `personality(ADDR_NO_RANDOMIZE)` so address layouts stay deterministic.
pub(crate) const SECCOMP_PROFILE: &str = include_str!("seccomp_allow_addr_no_randomize.json");

/// Minimal task definition written by `ctfbench init`.
pub(crate) const SAMPLE_TASK_TOML: &str = include_str!("task.toml");
