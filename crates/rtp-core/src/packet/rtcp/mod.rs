//! RTCP packets (RFC 3550 §6)
//!
//! Individual sub-packets only know how to encode and decode their body.
//! The common header, length validation and padding live in
//! [`compound`], since RTCP is always carried as a compound datagram.

mod app;
mod bye;
pub mod compound;
pub mod ntp;
mod receiver_report;
mod report_block;
mod sdes;
mod sender_report;

use bytes::{BufMut, BytesMut};

use crate::error::Error;
use crate::Result;

pub use app::RtcpApplicationDefined;
pub use bye::RtcpGoodbye;
pub use compound::RtcpCompoundPacket;
pub use ntp::{duration_to_dlsr, NtpTimestamp};
pub use receiver_report::RtcpReceiverReport;
pub use report_block::RtcpReportBlock;
pub use sdes::{RtcpSdesChunk, RtcpSdesItem, RtcpSdesItemType, RtcpSourceDescription};
pub use sender_report::RtcpSenderReport;

/// RTCP protocol version
pub const RTCP_VERSION: u8 = 2;

/// Size of the common sub-packet header
pub const RTCP_HEADER_SIZE: usize = 4;

/// Largest value of the 5-bit count field
pub const MAX_COUNT: usize = 31;

/// RTCP packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RtcpPacketType {
    SenderReport = 200,
    ReceiverReport = 201,
    SourceDescription = 202,
    Goodbye = 203,
    ApplicationDefined = 204,
}

impl TryFrom<u8> for RtcpPacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            200 => Ok(RtcpPacketType::SenderReport),
            201 => Ok(RtcpPacketType::ReceiverReport),
            202 => Ok(RtcpPacketType::SourceDescription),
            203 => Ok(RtcpPacketType::Goodbye),
            204 => Ok(RtcpPacketType::ApplicationDefined),
            other => Err(Error::UnknownPacketType(other)),
        }
    }
}

/// One sub-packet of a compound RTCP datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(RtcpSenderReport),
    ReceiverReport(RtcpReceiverReport),
    SourceDescription(RtcpSourceDescription),
    Goodbye(RtcpGoodbye),
    ApplicationDefined(RtcpApplicationDefined),
}

impl RtcpPacket {
    pub fn packet_type(&self) -> RtcpPacketType {
        match self {
            RtcpPacket::SenderReport(_) => RtcpPacketType::SenderReport,
            RtcpPacket::ReceiverReport(_) => RtcpPacketType::ReceiverReport,
            RtcpPacket::SourceDescription(_) => RtcpPacketType::SourceDescription,
            RtcpPacket::Goodbye(_) => RtcpPacketType::Goodbye,
            RtcpPacket::ApplicationDefined(_) => RtcpPacketType::ApplicationDefined,
        }
    }

    /// Value of the 5-bit count field: report count, chunk count, source
    /// count or APP subtype
    pub fn count(&self) -> usize {
        match self {
            RtcpPacket::SenderReport(sr) => sr.report_blocks.len(),
            RtcpPacket::ReceiverReport(rr) => rr.report_blocks.len(),
            RtcpPacket::SourceDescription(sdes) => sdes.chunks.len(),
            RtcpPacket::Goodbye(bye) => bye.sources.len(),
            RtcpPacket::ApplicationDefined(app) => app.subtype as usize,
        }
    }

    fn body_size(&self) -> usize {
        match self {
            RtcpPacket::SenderReport(sr) => sr.body_size(),
            RtcpPacket::ReceiverReport(rr) => rr.body_size(),
            RtcpPacket::SourceDescription(sdes) => sdes.body_size(),
            RtcpPacket::Goodbye(bye) => bye.body_size(),
            RtcpPacket::ApplicationDefined(app) => app.body_size(),
        }
    }

    /// Length on the wire, header included. Always a multiple of 4.
    pub fn calc_length(&self) -> usize {
        RTCP_HEADER_SIZE + self.body_size()
    }

    /// Append the header and body to `buf`
    pub fn serialize_into(&self, buf: &mut BytesMut) -> Result<()> {
        let count = self.count();
        if count > MAX_COUNT {
            return Err(Error::InvalidParameter(format!(
                "{:?} count {} exceeds {}",
                self.packet_type(),
                count,
                MAX_COUNT
            )));
        }

        let length = self.calc_length();
        let words = length / 4 - 1;
        if words > u16::MAX as usize {
            return Err(Error::InvalidParameter(format!(
                "RTCP packet of {} bytes is too long",
                length
            )));
        }

        buf.reserve(length);
        buf.put_u8(RTCP_VERSION << 6 | count as u8);
        buf.put_u8(self.packet_type() as u8);
        buf.put_u16(words as u16);

        match self {
            RtcpPacket::SenderReport(sr) => sr.serialize_body(buf),
            RtcpPacket::ReceiverReport(rr) => rr.serialize_body(buf),
            RtcpPacket::SourceDescription(sdes) => sdes.serialize_body(buf),
            RtcpPacket::Goodbye(bye) => bye.serialize_body(buf),
            RtcpPacket::ApplicationDefined(app) => app.serialize_body(buf),
        }

        Ok(())
    }
}

/// Round a byte count up to the next 32-bit boundary
pub(crate) fn padded_to_word(len: usize) -> usize {
    (len + 3) & !3
}
