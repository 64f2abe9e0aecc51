//! Serialized execution of core operations
//!
//! Connectivity and battery notifications arrive from independent sources.
//! Every handler that mutates connection state is posted to a single
//! [`SerialExecutor`], which runs the operations one after another in
//! submission order on a dedicated task.

mod serial;

pub use serial::{CoreOperation, SerialExecutor};
