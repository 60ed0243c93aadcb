//! Configuration module

pub mod cli;
pub mod settings;

pub use cli::{BackendKind, CliArgs, CliCommand};
pub use settings::Settings;
