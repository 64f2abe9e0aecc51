use thiserror::Error;

/// Errors produced by the infrastructure layer
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// The executor has been shut down and no longer accepts operations
    #[error("Executor '{0}' is shut down")]
    ExecutorShutdown(String),

    /// The subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Result type for infrastructure operations
pub type Result<T> = std::result::Result<T, Error>;
