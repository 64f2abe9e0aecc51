use std::time::Duration;
use thiserror::Error;

/// Errors raised by the RTP/RTCP codecs and transports
#[derive(Error, Debug)]
pub enum Error {
    /// The datagram does not follow the RTP or RTCP layout
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// The RTCP version bits are not `10`
    #[error("Invalid RTCP version: {0}")]
    InvalidVersion(u8),

    /// RTCP packet type outside 200..=204
    #[error("Unknown RTCP packet type: {0}")]
    UnknownPacketType(u8),

    /// Buffer is shorter than a fixed-size structure requires
    #[error("Buffer too small: need {required} bytes but only {available} available")]
    BufferTooSmall { required: usize, available: usize },

    /// Nothing arrived before the read deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The connection or receiver was closed
    #[error("Connection closed")]
    Closed,

    /// Socket level failure
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// Caller supplied an unusable argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedPacket(msg.into())
    }

    /// True for every decode failure, whatever its detail
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::MalformedPacket(_)
                | Error::InvalidVersion(_)
                | Error::UnknownPacketType(_)
                | Error::BufferTooSmall { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}
