//! Per-access-network IMS binding

mod access;
mod interface;
mod profile;

pub use access::NetworkAccess;
pub use interface::ImsNetworkInterface;
pub use profile::UserProfile;
