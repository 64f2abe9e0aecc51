//! Platform services the connection manager depends on

use std::net::IpAddr;

use async_trait::async_trait;

use crate::config::NetworkType;
use crate::dns::DnsResolvedFields;
use crate::network::UserProfile;

/// Snapshot of the active data network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    pub network_type: NetworkType,
    pub connected: bool,
    pub roaming: bool,
}

impl NetworkInfo {
    pub fn connected(network_type: NetworkType) -> Self {
        Self {
            network_type,
            connected: true,
            roaming: false,
        }
    }
}

/// Battery broadcast content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    /// Charge in percent
    pub level: u8,
    pub plugged: bool,
}

/// Connectivity and SIM state of the device
pub trait ConnectivityProvider: Send + Sync {
    /// `None` when no network is up (airplane mode, no coverage)
    fn active_network(&self) -> Option<NetworkInfo>;

    /// Local address on `network_type`, picked to reach `proxy` when known
    fn local_ip_address(
        &self,
        proxy: Option<&DnsResolvedFields>,
        network_type: NetworkType,
    ) -> Option<IpAddr>;

    fn sim_operator_name(&self) -> Option<String>;

    /// IMSI of the inserted SIM
    fn subscriber_id(&self) -> Option<String>;

    /// Account the client was last provisioned for
    fn last_user_account(&self) -> Option<String>;

    /// Account of the SIM currently inserted
    fn current_user_account(&self) -> Option<String>;
}

/// IMS service layer started once registered
#[async_trait]
pub trait ImsServices: Send + Sync {
    /// Whether the core finished loading and services may start
    fn is_initialization_finished(&self) -> bool;

    async fn start_services(&self);

    async fn stop_services(&self);

    /// Periodic health check while registered
    async fn check_services(&self);

    /// Install the identity of the interface now in use
    fn load_user_profile(&self, profile: UserProfile);

    /// A different SIM was inserted; the core must be re-provisioned
    fn handle_sim_has_changed(&self);
}
