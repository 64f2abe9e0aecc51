use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{NetworkAccess, UserProfile};
use crate::config::{AuthenticationProcedure, ImsSettings, NetworkType, ProxySettings, SipProtocol};
use crate::dns::{DnsResolvedFields, DnsResolver};
use crate::error::{ImsError, Result};
use crate::sip::{ReasonCode, RegistrationManager, SipManager, SipStackConfig};

#[derive(Debug, Default)]
struct NatState {
    behind_nat: bool,
    public_address: Option<SocketAddr>,
}

/// Binding of one access network (mobile or Wi-Fi) to its outbound
/// proxy, authentication procedure and SIP collaborators.
///
/// Registration is the only entry point that talks to the network:
/// it resolves the proxy when needed, brings the SIP stack up and runs
/// REGISTER. A rejected registration is `Ok(false)`; resolution and stack
/// faults are errors.
pub struct ImsNetworkInterface {
    network_type: NetworkType,
    proxy: ProxySettings,
    tcp_fallback: bool,
    keep_alive_enabled: bool,
    settings: Arc<ImsSettings>,
    access: NetworkAccess,
    resolver: DnsResolver,
    sip: Arc<dyn SipManager>,
    registration: Arc<dyn RegistrationManager>,
    nat: RwLock<NatState>,
}

impl ImsNetworkInterface {
    pub fn new(
        network_type: NetworkType,
        settings: Arc<ImsSettings>,
        resolver: DnsResolver,
        sip: Arc<dyn SipManager>,
        registration: Arc<dyn RegistrationManager>,
    ) -> Self {
        let proxy = settings.proxy(network_type).clone();
        // Fallback to TCP only makes sense when starting on UDP
        let tcp_fallback = proxy.protocol == SipProtocol::Udp && settings.tcp_fallback;

        match proxy.authentication {
            AuthenticationProcedure::Giba => {
                debug!("Load GIBA authentication procedure for {}", network_type)
            }
            AuthenticationProcedure::Digest => {
                debug!("Load HTTP Digest authentication procedure for {}", network_type)
            }
        }

        Self {
            network_type,
            tcp_fallback,
            keep_alive_enabled: settings.sip_keep_alive,
            proxy,
            settings,
            access: NetworkAccess::new(network_type),
            resolver,
            sip,
            registration,
            nat: RwLock::new(NatState::default()),
        }
    }

    pub fn network_type(&self) -> NetworkType {
        self.network_type
    }

    pub fn access(&self) -> &NetworkAccess {
        &self.access
    }

    pub fn proxy(&self) -> &ProxySettings {
        &self.proxy
    }

    pub fn sip_manager(&self) -> &Arc<dyn SipManager> {
        &self.sip
    }

    pub fn registration_manager(&self) -> &Arc<dyn RegistrationManager> {
        &self.registration
    }

    /// An interface without a proxy address can't register
    pub fn is_interface_configured(&self) -> bool {
        self.proxy.address.is_some()
    }

    pub fn authentication_procedure(&self) -> AuthenticationProcedure {
        self.proxy.authentication
    }

    pub fn is_tcp_fallback(&self) -> bool {
        self.tcp_fallback
    }

    pub fn is_registered(&self) -> bool {
        self.registration.is_registered()
    }

    pub fn registration_reason_code(&self) -> ReasonCode {
        self.registration.reason_code()
    }

    /// Retry-After carried by the last registration failure
    pub fn retry_after(&self) -> Option<Duration> {
        self.registration
            .retry_after()
            .filter(|duration| !duration.is_zero())
    }

    pub fn access_info(&self) -> &'static str {
        self.access.access_info()
    }

    pub fn is_behind_nat(&self) -> bool {
        self.nat.read().behind_nat
    }

    pub fn set_nat_traversal(&self, behind_nat: bool) {
        self.nat.write().behind_nat = behind_nat;
    }

    /// Address and port the proxy sees us with (received/rport)
    pub fn nat_public_address(&self) -> Option<SocketAddr> {
        self.nat.read().public_address
    }

    pub fn set_nat_public_address(&self, address: Option<SocketAddr>) {
        self.nat.write().public_address = address;
    }

    /// Identities to register with, per the authentication procedure.
    /// GIBA needs the IMSI of the inserted SIM.
    pub fn user_profile(&self, subscriber_id: Option<&str>) -> Result<UserProfile> {
        match self.proxy.authentication {
            AuthenticationProcedure::Giba => {
                debug!("Load user profile derived from IMSI (GIBA)");
                let imsi = subscriber_id.ok_or_else(|| {
                    ImsError::Configuration("GIBA requires the SIM IMSI".into())
                })?;
                UserProfile::from_imsi(imsi, self.settings.user.mnc_length)
            }
            AuthenticationProcedure::Digest => {
                debug!("Load user profile from settings");
                Ok(UserProfile::from_settings(&self.settings.user))
            }
        }
    }

    /// Resolve the configured proxy
    pub async fn dns_resolved_fields(&self) -> Result<DnsResolvedFields> {
        let address = self.proxy.address.as_deref().ok_or_else(|| {
            ImsError::Configuration(format!("no IMS proxy configured for {}", self.network_type))
        })?;
        self.resolver
            .resolve(address, self.proxy.protocol, self.proxy.port)
            .await
    }

    /// Register through this interface, resolving the proxy first when
    /// `dns` is `None`
    pub async fn register(&self, dns: Option<DnsResolvedFields>) -> Result<bool> {
        debug!("Register to IMS over {}", self.network_type);

        let dns = match dns {
            Some(dns) => dns,
            None => self.dns_resolved_fields().await?,
        };

        let config = SipStackConfig {
            local_address: self.access.ip_address(),
            outbound_proxy: dns.socket_addr(),
            protocol: self.proxy.protocol,
            tcp_fallback: self.tcp_fallback,
            network_type: self.network_type,
        };
        self.sip.init_stack(&config).await.map_err(|e| match e {
            ImsError::StackInitialization(_) => e,
            other => ImsError::StackInitialization(format!(
                "can't reach {} over {}: {}",
                dns, self.proxy.protocol, other
            )),
        })?;

        let registered = self.registration.register().await?;
        if !registered {
            debug!("IMS registration has failed");
            return Ok(false);
        }
        info!("IMS registered over {} via {}", self.network_type, dns);

        if self.keep_alive_enabled && self.proxy.protocol != SipProtocol::Udp {
            match self.sip.keep_alive() {
                Some(keep_alive) => keep_alive.start(),
                None => warn!("SIP stack has no keep-alive manager"),
            }
        }

        Ok(true)
    }

    /// Re-resolve the proxy and return the result when re-registration is
    /// warranted: the stack is down or now points elsewhere
    pub async fn check_dns_resolved_fields_changed(&self) -> Result<Option<DnsResolvedFields>> {
        let dns = self.dns_resolved_fields().await?;

        if !self.sip.is_stack_initialized() {
            debug!("Registration state has changed: SIP stack not initialized yet");
            return Ok(Some(dns));
        }

        match self.sip.outbound_proxy() {
            Some(current) if current.ip() != dns.ip_address => {
                debug!(
                    "Registration state has changed: proxy IP address has changed (old: {} - new: {})",
                    current.ip(),
                    dns.ip_address
                );
                Ok(Some(dns))
            }
            Some(current) if current.port() != dns.port => {
                debug!(
                    "Registration state has changed: proxy port has changed (old: {} - new: {})",
                    current.port(),
                    dns.port
                );
                Ok(Some(dns))
            }
            Some(_) => Ok(None),
            None => Ok(Some(dns)),
        }
    }

    /// Deregister, then close the stack
    pub async fn unregister(&self) -> Result<()> {
        debug!("Unregister from IMS over {}", self.network_type);
        self.stop_keep_alive();
        let result = self.registration.deregister().await;
        self.sip.close_stack().await;
        result
    }

    /// Drop the registration without signaling, then close the stack
    pub async fn registration_terminated(&self, reason: ReasonCode) {
        debug!("Registration has been terminated ({})", reason);
        self.stop_keep_alive();
        self.registration.stop_registration(reason).await;
        self.sip.close_stack().await;
    }

    /// Tear down the stack after a failed attempt so the next one starts
    /// clean
    pub async fn close_stack(&self) {
        self.stop_keep_alive();
        self.sip.close_stack().await;
    }

    fn stop_keep_alive(&self) {
        if let Some(keep_alive) = self.sip.keep_alive() {
            if keep_alive.is_running() {
                keep_alive.stop();
            }
        }
    }
}
