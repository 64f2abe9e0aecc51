//! IMS connectivity settings
//!
//! Settings are plain serde structs with every field defaulted, so a TOML
//! file only needs to name what differs from the defaults:
//!
//! ```toml
//! network_access = "wifi"
//! register_retry_base_time_ms = 1000
//!
//! [mobile]
//! address = "ims.mnc001.mcc208.3gppnetwork.org"
//! protocol = "TCP"
//! authentication = "GIBA"
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ImsError, Result};

/// Access network an interface is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mobile,
    Wifi,
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mobile => write!(f, "mobile"),
            Self::Wifi => write!(f, "wifi"),
        }
    }
}

/// Which access networks may be used to reach the IMS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkAccessType {
    #[default]
    Any,
    Mobile,
    Wifi,
}

impl NetworkAccessType {
    pub fn allows(&self, network: NetworkType) -> bool {
        match self {
            Self::Any => true,
            Self::Mobile => network == NetworkType::Mobile,
            Self::Wifi => network == NetworkType::Wifi,
        }
    }
}

/// SIP transport towards the outbound proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SipProtocol {
    #[default]
    Udp,
    Tcp,
    Tls,
}

impl SipProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Udp => "UDP",
            Self::Tcp => "TCP",
            Self::Tls => "TLS",
        }
    }

    /// NAPTR service tag advertising this transport
    pub fn naptr_service(&self) -> &'static str {
        match self {
            Self::Udp => "SIP+D2U",
            Self::Tcp => "SIP+D2T",
            Self::Tls => "SIPS+D2T",
        }
    }
}

impl fmt::Display for SipProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SipProtocol {
    type Err = ImsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UDP" => Ok(Self::Udp),
            "TCP" => Ok(Self::Tcp),
            "TLS" => Ok(Self::Tls),
            _ => Err(ImsError::UnsupportedProtocol(s.to_string())),
        }
    }
}

impl TryFrom<String> for SipProtocol {
    type Error = ImsError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SipProtocol> for String {
    fn from(protocol: SipProtocol) -> Self {
        protocol.as_str().to_string()
    }
}

/// IMS authentication procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthenticationProcedure {
    /// Identities derived from the IMSI, no credentials exchanged
    Giba,
    #[default]
    Digest,
}

/// Battery level below which the client leaves the IMS while unplugged.
///
/// Stored as a percentage; `0` means never stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum MinimumBatteryLevel {
    #[default]
    NeverStop,
    Percent(u8),
}

impl From<u8> for MinimumBatteryLevel {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::NeverStop,
            level => Self::Percent(level.min(100)),
        }
    }
}

impl From<MinimumBatteryLevel> for u8 {
    fn from(level: MinimumBatteryLevel) -> Self {
        match level {
            MinimumBatteryLevel::NeverStop => 0,
            MinimumBatteryLevel::Percent(level) => level,
        }
    }
}

/// Outbound proxy of one access network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// FQDN, `_sip._<proto>.` SRV name or IPv4 literal; unset means the
    /// interface is not configured
    pub address: Option<String>,
    pub port: u16,
    pub protocol: SipProtocol,
    pub authentication: AuthenticationProcedure,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            address: None,
            port: 5060,
            protocol: SipProtocol::Udp,
            authentication: AuthenticationProcedure::Digest,
        }
    }
}

/// Subscriber identity used by HTTP Digest registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub username: String,
    pub display_name: String,
    pub home_domain: String,
    pub private_id: String,
    pub password: String,
    pub realm: String,
    /// MNC digits in the IMSI, used to derive GIBA identities
    pub mnc_length: u8,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            username: String::new(),
            display_name: String::new(),
            home_domain: String::new(),
            private_id: String::new(),
            password: String::new(),
            realm: String::new(),
            mnc_length: 2,
        }
    }
}

/// Settings consumed by the connection manager and network interfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImsSettings {
    pub network_access: NetworkAccessType,
    /// SIM operator name the client is restricted to; empty allows any
    pub network_operator: String,
    pub mobile: ProxySettings,
    pub wifi: ProxySettings,
    pub user: UserSettings,
    pub register_retry_base_time_ms: u64,
    pub register_retry_max_time_ms: u64,
    pub service_polling_period_ms: u64,
    /// Pause while registered but the services are not started yet
    pub services_start_retry_ms: u64,
    pub sip_keep_alive: bool,
    pub min_battery_level: MinimumBatteryLevel,
    /// Allow the SIP stack to switch from UDP to TCP for large requests
    pub tcp_fallback: bool,
    pub dns_negative_cache_ttl_secs: u64,
}

impl Default for ImsSettings {
    fn default() -> Self {
        Self {
            network_access: NetworkAccessType::Any,
            network_operator: String::new(),
            mobile: ProxySettings::default(),
            wifi: ProxySettings::default(),
            user: UserSettings::default(),
            register_retry_base_time_ms: 30_000,
            register_retry_max_time_ms: 1_800_000,
            service_polling_period_ms: 30_000,
            services_start_retry_ms: 5_000,
            sip_keep_alive: true,
            min_battery_level: MinimumBatteryLevel::NeverStop,
            tcp_fallback: false,
            dns_negative_cache_ttl_secs: 5,
        }
    }
}

impl ImsSettings {
    /// Parse and validate settings from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings: Self = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate settings from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ImsError::Configuration(format!("can't read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.register_retry_base_time_ms == 0 {
            return Err(ImsError::Configuration(
                "register retry base time must be positive".into(),
            ));
        }
        if self.register_retry_base_time_ms > self.register_retry_max_time_ms {
            return Err(ImsError::Configuration(format!(
                "register retry base time {} ms exceeds max time {} ms",
                self.register_retry_base_time_ms, self.register_retry_max_time_ms
            )));
        }
        if self.service_polling_period_ms == 0 {
            return Err(ImsError::Configuration(
                "service polling period must be positive".into(),
            ));
        }
        if self.services_start_retry_ms == 0 {
            return Err(ImsError::Configuration(
                "services start retry period must be positive".into(),
            ));
        }
        if !(2..=3).contains(&self.user.mnc_length) {
            return Err(ImsError::Configuration(format!(
                "MNC length must be 2 or 3, got {}",
                self.user.mnc_length
            )));
        }
        Ok(())
    }

    pub fn proxy(&self, network: NetworkType) -> &ProxySettings {
        match network {
            NetworkType::Mobile => &self.mobile,
            NetworkType::Wifi => &self.wifi,
        }
    }

    pub fn register_retry_base_time(&self) -> Duration {
        Duration::from_millis(self.register_retry_base_time_ms)
    }

    pub fn register_retry_max_time(&self) -> Duration {
        Duration::from_millis(self.register_retry_max_time_ms)
    }

    pub fn service_polling_period(&self) -> Duration {
        Duration::from_millis(self.service_polling_period_ms)
    }

    pub fn services_start_retry(&self) -> Duration {
        Duration::from_millis(self.services_start_retry_ms)
    }

    pub fn dns_negative_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.dns_negative_cache_ttl_secs)
    }
}
