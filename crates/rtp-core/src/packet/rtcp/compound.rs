//! Compound RTCP datagrams
//!
//! Parsing is all-or-nothing: any sub-packet that fails validation
//! rejects the whole datagram.

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;

use super::{
    RtcpApplicationDefined, RtcpGoodbye, RtcpPacket, RtcpPacketType, RtcpReceiverReport,
    RtcpReportBlock, RtcpSenderReport, RtcpSourceDescription, RTCP_HEADER_SIZE, RTCP_VERSION,
};
use crate::error::Error;
use crate::Result;

/// Size of the random prefix written ahead of an encrypted compound packet
pub const ENCRYPTION_PREFIX_SIZE: usize = 4;

/// A sequence of RTCP sub-packets sent in one datagram
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcpCompoundPacket {
    pub packets: Vec<RtcpPacket>,
}

impl RtcpCompoundPacket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_packets(packets: Vec<RtcpPacket>) -> Self {
        Self { packets }
    }

    pub fn push(&mut self, packet: RtcpPacket) {
        self.packets.push(packet);
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Unpadded length of all sub-packets
    pub fn calc_length(&self) -> usize {
        self.packets.iter().map(|p| p.calc_length()).sum()
    }

    /// Concatenate all sub-packets without padding
    pub fn serialize(&self) -> Result<Bytes> {
        self.assemble(self.calc_length(), false)
    }

    /// Encode into exactly `length` bytes.
    ///
    /// With `encrypted` set, four random octets precede the packets. When
    /// `length` exceeds the natural size, the last sub-packet is padded: its
    /// P bit is set, the final octet holds the pad count, and the pad (in
    /// 32-bit words) is added to its length field with carry into the high
    /// octet.
    pub fn assemble(&self, length: usize, encrypted: bool) -> Result<Bytes> {
        if self.packets.is_empty() {
            return Err(Error::InvalidParameter("empty compound packet".into()));
        }

        let prefix = if encrypted { ENCRYPTION_PREFIX_SIZE } else { 0 };
        let natural = prefix + self.calc_length();
        if length < natural {
            return Err(Error::InvalidParameter(format!(
                "compound packet needs {} bytes, {} requested",
                natural, length
            )));
        }

        let pad = length - natural;
        if pad % 4 != 0 || pad > 255 {
            return Err(Error::InvalidParameter(format!(
                "padding of {} bytes must be a multiple of 4 below 256",
                pad
            )));
        }

        let mut buf = BytesMut::with_capacity(length);
        if encrypted {
            let mut random = [0u8; ENCRYPTION_PREFIX_SIZE];
            rand::thread_rng().fill_bytes(&mut random);
            buf.put_slice(&random);
        }

        let mut last_start = buf.len();
        for packet in &self.packets {
            last_start = buf.len();
            packet.serialize_into(&mut buf)?;
        }

        if pad > 0 {
            buf.put_bytes(0, pad);
            buf[last_start] |= 0x20;
            buf[length - 1] = pad as u8;

            let low = buf[last_start + 3] as usize + (pad >> 2);
            if low >= 256 {
                buf[last_start + 2] = buf[last_start + 2].wrapping_add((low >> 8) as u8);
            }
            buf[last_start + 3] = low as u8;
        }

        Ok(buf.freeze())
    }

    /// Decode and validate a compound datagram.
    ///
    /// Rules applied to every sub-packet:
    /// - version bits must be `10`
    /// - `(length + 1) * 4` must fit in the remaining datagram
    /// - the P bit is only allowed on the last sub-packet, whose final
    ///   octet then gives a non-zero pad count
    /// - SR must be exactly `28 + 24 * rc` bytes, RR `8 + 24 * rc`
    /// - SDES chunks must each carry a CNAME and fill the packet exactly
    /// - BYE must be exactly the SSRC list plus the padded reason
    /// - APP must be at least 12 bytes
    /// - any other packet type is rejected
    pub fn parse(data: &[u8]) -> Result<Self> {
        let total = data.len();
        if total < RTCP_HEADER_SIZE {
            return Err(Error::malformed(format!("RTCP datagram of {} bytes", total)));
        }

        let mut packets = Vec::new();
        let mut offset = 0;
        while offset < total {
            if offset + RTCP_HEADER_SIZE > total {
                return Err(Error::malformed("truncated RTCP header"));
            }

            let first = data[offset];
            if first >> 6 != RTCP_VERSION {
                return Err(Error::InvalidVersion(first >> 6));
            }
            let packet_type = data[offset + 1];
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            let length = (words + 1) << 2;

            if offset + length > total {
                return Err(Error::malformed(format!(
                    "RTCP length {} exceeds datagram of {} bytes",
                    offset + length,
                    total
                )));
            }

            let mut pad = 0;
            if first & 0x20 != 0 {
                if offset + length != total {
                    return Err(Error::malformed("padding bit set on inner sub-packet"));
                }
                pad = data[total - 1] as usize;
                if pad == 0 || pad > length - RTCP_HEADER_SIZE {
                    return Err(Error::malformed(format!("invalid RTCP padding {}", pad)));
                }
            }

            let inner_length = length - pad;
            let count = (first & 0x1F) as usize;
            let body = &data[offset + RTCP_HEADER_SIZE..offset + inner_length];

            let packet = match RtcpPacketType::try_from(packet_type)? {
                RtcpPacketType::SenderReport => {
                    let expected = 28 + RtcpReportBlock::SIZE * count;
                    if inner_length != expected {
                        return Err(Error::malformed(format!(
                            "SR with {} reports must be {} bytes, got {}",
                            count, expected, inner_length
                        )));
                    }
                    RtcpPacket::SenderReport(RtcpSenderReport::parse_body(&mut &body[..], count)?)
                }
                RtcpPacketType::ReceiverReport => {
                    let expected = 8 + RtcpReportBlock::SIZE * count;
                    if inner_length != expected {
                        return Err(Error::malformed(format!(
                            "RR with {} reports must be {} bytes, got {}",
                            count, expected, inner_length
                        )));
                    }
                    RtcpPacket::ReceiverReport(RtcpReceiverReport::parse_body(
                        &mut &body[..],
                        count,
                    )?)
                }
                RtcpPacketType::SourceDescription => RtcpPacket::SourceDescription(
                    RtcpSourceDescription::parse_body(body, count)?,
                ),
                RtcpPacketType::Goodbye => {
                    RtcpPacket::Goodbye(RtcpGoodbye::parse_body(body, count)?)
                }
                RtcpPacketType::ApplicationDefined => RtcpPacket::ApplicationDefined(
                    RtcpApplicationDefined::parse_body(body, count)?,
                ),
            };

            packets.push(packet);
            offset += length;
        }

        Ok(Self { packets })
    }
}
