//! DNS service discovery of the IMS outbound proxy
//!
//! [`DnsResolver`] implements the NAPTR → SRV → A chain on top of a
//! [`DnsLookup`] backend. [`HickoryLookup`] is the production backend;
//! tests substitute canned record sets.

mod hickory;
mod resolver;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use async_trait::async_trait;

use crate::error::Result;

pub use hickory::HickoryLookup;
pub use resolver::{best_srv, validate_domain, DnsResolver};

/// Proxy endpoint produced by one resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DnsResolvedFields {
    pub ip_address: IpAddr,
    pub port: u16,
}

impl DnsResolvedFields {
    pub fn new(ip_address: impl Into<IpAddr>, port: u16) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip_address, self.port)
    }
}

impl fmt::Display for DnsResolvedFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// NAPTR record (RFC 3403) as used by RFC 3263 SIP server location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaptrRecord {
    pub order: u16,
    pub preference: u16,
    pub flags: String,
    pub service: String,
    /// SRV name to follow, without the trailing dot
    pub replacement: String,
}

/// SRV record (RFC 2782)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    /// Host name, without the trailing dot
    pub target: String,
}

/// Record lookups used by [`DnsResolver`].
///
/// An empty result means the name has no records of that type; `Err` is
/// reserved for resolver failures.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn naptr(&self, name: &str) -> Result<Vec<NaptrRecord>>;

    async fn srv(&self, name: &str) -> Result<Vec<SrvRecord>>;

    async fn ipv4(&self, name: &str) -> Result<Vec<Ipv4Addr>>;
}
