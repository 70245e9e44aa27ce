use thiserror::Error;

/// Startup failures. Everything here is fatal before the first cycle.
#[derive(Error, Debug)]
pub enum LeadSignalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),
}
