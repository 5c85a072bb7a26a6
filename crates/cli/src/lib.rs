//! Entry points behind the `eats` binary.

pub mod commands;
pub mod config;
pub mod error;

pub use config::Config;
pub use error::{CliError, CliResult};
