//! IMS connection state machine and registration polling

mod backoff;
mod manager;

pub use backoff::{jitter_coefficient, RegistrationBackoff};
pub use manager::{ConnectionState, ImsConnectionManager};
