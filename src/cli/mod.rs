//! Command-line interface for music-courier.
//!
//! Subcommands drive the plan pipeline end to end (`download`), or its
//! stages separately (`plan`, `resume`), plus `history` and `validate`.

mod commands;

pub use commands::{run_command, Cli, Commands};
