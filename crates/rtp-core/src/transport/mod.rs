//! Datagram transports for RTP and RTCP
//!
//! Each receiver owns a background task reading from a
//! [`DatagramConnection`]. Transmitters either own their connection or
//! share the receiver's one (symmetric RTP), in which case closing the
//! transmitter leaves the connection open.

mod connection;
mod fifo;
mod rtcp_receiver;
mod rtcp_transmitter;
mod rtp_receiver;
mod rtp_transmitter;

pub use connection::{DatagramConnection, UdpConnection};
pub use fifo::{PacketFifo, FIFO_CAPACITY, FIFO_EVICTION_BATCH};
pub use rtcp_receiver::{RtcpEvent, RtcpEventListener, RtcpPacketReceiver};
pub use rtcp_transmitter::RtcpPacketTransmitter;
pub use rtp_receiver::{ReceivedRtpPacket, RtpPacketReceiver, STALE_SEQUENCE_THRESHOLD};
pub use rtp_transmitter::{MediaBuffer, RtpPacketTransmitter};

/// Largest datagram the receivers accept
pub const MAX_DATAGRAM_SIZE: usize = 65535;
