//! IMS connectivity and registration for the RCS core
//!
//! [`ImsConnectionManager`] reacts to connectivity and battery changes,
//! picks the active [`ImsNetworkInterface`] (mobile or Wi-Fi) and runs the
//! registration polling loop. Each interface resolves its proxy through
//! [`DnsResolver`] (NAPTR, then SRV, then A) and hands the result to the
//! SIP collaborators declared in [`sip`].
//!
//! Platform facilities (connectivity state, SIM data, the IMS service
//! layer) are consumed through the traits in [`platform`].

pub mod config;
pub mod connection;
pub mod dns;
pub mod error;
pub mod network;
pub mod platform;
pub mod sip;

pub use config::{
    AuthenticationProcedure, ImsSettings, MinimumBatteryLevel, NetworkAccessType, NetworkType,
    ProxySettings, SipProtocol, UserSettings,
};
pub use connection::{ConnectionState, ImsConnectionManager, RegistrationBackoff};
pub use dns::{DnsLookup, DnsResolvedFields, DnsResolver, HickoryLookup, NaptrRecord, SrvRecord};
pub use error::{ErrorKind, ImsError, Result};
pub use network::{ImsNetworkInterface, NetworkAccess, UserProfile};
pub use platform::{BatteryStatus, ConnectivityProvider, ImsServices, NetworkInfo};
pub use sip::{KeepAliveManager, ReasonCode, RegistrationManager, SipManager, SipStackConfig};
