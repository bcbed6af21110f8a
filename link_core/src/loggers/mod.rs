/// `tracing` subscriber setup: console output plus an optional daily rolling JSON file.
pub mod tracing_setup;

pub use tracing_setup::{setup_logging, LoggerOptions};
