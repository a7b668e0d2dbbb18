//! CLI command implementations.
//!
//! Each submodule implements one `ctfbench` subcommand, keeping formatting
//! and decision logic in pure functions so they can be tested without
//! Docker or a terminal.

pub mod debug_env;
pub mod init;
pub mod run;
pub mod validate;
