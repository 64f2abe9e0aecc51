//! Error types for IMS connectivity

use std::fmt;

use thiserror::Error;

/// Result type for IMS operations
pub type Result<T> = std::result::Result<T, ImsError>;

/// Errors raised while resolving, registering or managing connectivity
#[derive(Error, Debug)]
pub enum ImsError {
    /// No usable address was found for the proxy
    #[error("DNS resolution failed for {host}: {reason}")]
    Resolution { host: String, reason: String },

    /// The proxy host is not a valid domain name
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// The configured SIP transport is not UDP, TCP or TLS
    #[error("Unsupported SIP protocol: {0}")]
    UnsupportedProtocol(String),

    /// The SIP stack could not be created for the resolved endpoint
    #[error("SIP stack initialization failed: {0}")]
    StackInitialization(String),

    /// A SIP message could not be built or understood
    #[error("Payload error: {0}")]
    Payload(String),

    /// The network rejected or dropped a request
    #[error("Network error: {0}")]
    Network(String),

    /// The contact store failed during registration
    #[error("Contact manager error: {0}")]
    ContactManager(String),

    /// Settings are missing or inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected internal fault
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Coarse classification the registration polling loop matches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Payload,
    Network,
    ContactManager,
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payload => write!(f, "Payload"),
            Self::Network => write!(f, "Network"),
            Self::ContactManager => write!(f, "ContactManager"),
            Self::Runtime => write!(f, "Runtime"),
        }
    }
}

impl ImsError {
    pub fn resolution(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            host: host.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution { .. }
            | Self::InvalidDomain(_)
            | Self::UnsupportedProtocol(_)
            | Self::StackInitialization(_)
            | Self::Payload(_) => ErrorKind::Payload,

            Self::Network(_) => ErrorKind::Network,

            Self::ContactManager(_) => ErrorKind::ContactManager,

            Self::Configuration(_) | Self::Runtime(_) => ErrorKind::Runtime,
        }
    }

    /// Whether the polling loop should count the failure and try again
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Runtime)
    }
}

impl From<std::io::Error> for ImsError {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<toml::de::Error> for ImsError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<rcs_infra_common::Error> for ImsError {
    fn from(err: rcs_infra_common::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            ImsError::resolution("ims.example.com", "no A record").kind(),
            ErrorKind::Payload
        );
        assert_eq!(ImsError::InvalidDomain("a..b".into()).kind(), ErrorKind::Payload);
        assert_eq!(ImsError::Network("reset".into()).kind(), ErrorKind::Network);
        assert_eq!(
            ImsError::ContactManager("locked".into()).kind(),
            ErrorKind::ContactManager
        );
        assert_eq!(ImsError::Runtime("bug".into()).kind(), ErrorKind::Runtime);
    }

    #[test]
    fn test_retryable() {
        assert!(ImsError::Network("timeout".into()).is_retryable());
        assert!(ImsError::StackInitialization("bind".into()).is_retryable());
        assert!(!ImsError::Runtime("bug".into()).is_retryable());
        assert!(!ImsError::Configuration("bad".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ImsError::resolution("ims.example.com", "no A record");
        assert_eq!(
            err.to_string(),
            "DNS resolution failed for ims.example.com: no A record"
        );
        assert_eq!(ErrorKind::ContactManager.to_string(), "ContactManager");
    }
}
