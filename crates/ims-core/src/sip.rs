//! SIP collaborators driven by the network interfaces
//!
//! The SIP transaction and dialog layers live outside this crate. An
//! [`ImsNetworkInterface`](crate::ImsNetworkInterface) only needs to bring
//! a stack up towards the resolved proxy, run REGISTER through it, and
//! keep NAT bindings alive on connection-oriented transports.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{NetworkType, SipProtocol};
use crate::error::Result;

/// Why the client is not (or no longer) registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReasonCode {
    #[default]
    Unspecified,
    ConnectionLost,
    BatteryLow,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::BatteryLow => write!(f, "battery low"),
        }
    }
}

/// Parameters for bringing up the SIP stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipStackConfig {
    /// Address obtained on the access network
    pub local_address: Option<IpAddr>,
    pub outbound_proxy: SocketAddr,
    pub protocol: SipProtocol,
    /// Switch from UDP to TCP for requests above the path MTU
    /// (RFC 3261 §18.1.1)
    pub tcp_fallback: bool,
    pub network_type: NetworkType,
}

/// Sends keep-alives (double CRLF, RFC 5626) on the flow to the proxy
pub trait KeepAliveManager: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_running(&self) -> bool;
}

/// SIP stack lifecycle
#[async_trait]
pub trait SipManager: Send + Sync {
    async fn init_stack(&self, config: &SipStackConfig) -> Result<()>;

    /// Tear the stack down. A no-op when it is not initialized.
    async fn close_stack(&self);

    fn is_stack_initialized(&self) -> bool;

    /// Proxy the current stack sends to, if initialized
    fn outbound_proxy(&self) -> Option<SocketAddr>;

    /// Keep-alive manager of the current stack
    fn keep_alive(&self) -> Option<Arc<dyn KeepAliveManager>>;
}

/// REGISTER procedure towards the IMS
#[async_trait]
pub trait RegistrationManager: Send + Sync {
    /// Run one registration attempt. `Ok(false)` is a normal rejection
    /// (the caller retries later); `Err` is a fault in the attempt.
    async fn register(&self) -> Result<bool>;

    /// REGISTER with expiry 0
    async fn deregister(&self) -> Result<()>;

    /// Forget the registration without signaling, recording `reason`
    async fn stop_registration(&self, reason: ReasonCode);

    fn is_registered(&self) -> bool;

    fn reason_code(&self) -> ReasonCode;

    /// Retry-After received with the last failure response
    fn retry_after(&self) -> Option<Duration>;
}
