//! Common infrastructure shared by the RCS core crates
//!
//! This crate provides:
//!
//! - [`logging`]: tracing subscriber setup used by binaries and tests
//! - [`executor`]: a serial executor for core operations, so that events
//!   arriving from several sources mutate connection state one at a time
//! - [`errors`]: the error type returned by the above

pub mod errors;
pub mod executor;
pub mod logging;

pub use errors::{Error, Result};
pub use executor::SerialExecutor;
pub use logging::{setup_logging, LoggingConfig};
