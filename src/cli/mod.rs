//! Command line interface
//!
//! Argument parsing and the runner that drives one push with console output.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::Runner;
