//! Command-line interface for lex.

mod commands;
mod progress;

pub use commands::{is_verbose, run};
