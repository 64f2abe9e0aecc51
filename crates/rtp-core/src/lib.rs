//! RTP and RTCP media transport for the RCS core
//!
//! The crate is organised bottom-up:
//!
//! - [`packet`]: byte-exact RTP (RFC 3550 §5.1, RFC 5285 one-byte header
//!   extensions) and RTCP compound packet codecs (RFC 3550 §6)
//! - [`session`]: the state shared by an RTCP receiver and transmitter,
//!   per-source reception statistics and the RTCP report interval
//! - [`transport`]: datagram connections plus the background RTP and RTCP
//!   receivers and transmitters built on them
//! - [`stats`]: packet counters kept by the transports
//! - [`time`]: RTP clock conversions

pub mod error;
pub mod packet;
pub mod session;
pub mod stats;
pub mod time;
pub mod transport;

pub use error::Error;

pub use packet::rtcp::{
    NtpTimestamp, RtcpApplicationDefined, RtcpCompoundPacket, RtcpGoodbye, RtcpPacket,
    RtcpPacketType, RtcpReceiverReport, RtcpReportBlock, RtcpSenderReport, RtcpSourceDescription,
    RtcpSdesChunk, RtcpSdesItem, RtcpSdesItemType,
};
pub use packet::{RtpExtensionElement, RtpHeaderExtension, RtpPacket};
pub use session::{RtcpSession, RtcpSessionConfig, RtpSource};
pub use transport::{
    DatagramConnection, MediaBuffer, ReceivedRtpPacket, RtcpEvent, RtcpEventListener,
    RtcpPacketReceiver, RtcpPacketTransmitter, RtpPacketReceiver, RtpPacketTransmitter,
    UdpConnection,
};

/// Result type for RTP/RTCP operations
pub type Result<T> = std::result::Result<T, Error>;

/// RTP synchronization source identifier
pub type RtpSsrc = u32;

/// RTP sequence number
pub type RtpSequenceNumber = u16;

/// RTP media timestamp
pub type RtpTimestamp = u32;
