//! RTP and RTCP wire formats

pub mod extension;
pub mod rtcp;
pub mod rtp;

pub use extension::{RtpExtensionElement, RtpHeaderExtension, ONE_BYTE_PROFILE};
pub use rtp::{RtpPacket, EMPTY_PAYLOAD_TYPE, RTP_HEADER_SIZE, RTP_VERSION};
