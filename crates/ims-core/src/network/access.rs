use std::net::IpAddr;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::NetworkType;

/// Local address state of one access network
#[derive(Debug)]
pub struct NetworkAccess {
    network_type: NetworkType,
    ip_address: RwLock<Option<IpAddr>>,
}

impl NetworkAccess {
    pub fn new(network_type: NetworkType) -> Self {
        Self {
            network_type,
            ip_address: RwLock::new(None),
        }
    }

    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    /// Address the access was last connected with
    pub fn ip_address(&self) -> Option<IpAddr> {
        *self.ip_address.read()
    }

    pub fn is_connected(&self) -> bool {
        self.ip_address.read().is_some()
    }

    pub fn connect(&self, ip_address: IpAddr) {
        debug!("Network access {} connected with {}", self.network_type, ip_address);
        *self.ip_address.write() = Some(ip_address);
    }

    pub fn disconnect(&self) {
        if self.ip_address.write().take().is_some() {
            debug!("Network access {} disconnected", self.network_type);
        }
    }

    /// access-type value of the P-Access-Network-Info header (RFC 7315)
    pub fn access_info(&self) -> &'static str {
        match self.network_type {
            NetworkType::Mobile => "3GPP-E-UTRAN-FDD",
            NetworkType::Wifi => "IEEE-802.11",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_connect_disconnect() {
        let access = NetworkAccess::new(NetworkType::Wifi);
        assert!(!access.is_connected());

        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        access.connect(ip);
        assert_eq!(access.ip_address(), Some(ip));

        access.disconnect();
        access.disconnect();
        assert_eq!(access.ip_address(), None);
        assert_eq!(access.access_info(), "IEEE-802.11");
    }
}
