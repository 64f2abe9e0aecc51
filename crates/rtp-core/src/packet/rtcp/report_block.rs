use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSsrc};

/// Reception report block carried by SR and RR packets
/// (RFC 3550 §6.4.1)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcpReportBlock {
    /// Source this block reports on
    pub ssrc: RtpSsrc,

    /// Fraction lost since the previous report, in 1/256 units
    pub fraction_lost: u8,

    /// Cumulative number of packets lost, 24-bit two's complement
    pub cumulative_lost: u32,

    /// Extended highest sequence number received
    pub highest_seq: u32,

    /// Interarrival jitter in timestamp units
    pub jitter: u32,

    /// Middle 32 bits of the last SR NTP timestamp
    pub last_sr: u32,

    /// Delay since that SR in units of 1/65536 seconds
    pub delay_since_last_sr: u32,
}

impl RtcpReportBlock {
    pub const SIZE: usize = 24;

    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            ..Default::default()
        }
    }

    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(Error::BufferTooSmall {
                required: Self::SIZE,
                available: buf.remaining(),
            });
        }

        let ssrc = buf.get_u32();
        let lost = buf.get_u32();

        Ok(Self {
            ssrc,
            fraction_lost: (lost >> 24) as u8,
            cumulative_lost: lost & 0x00FF_FFFF,
            highest_seq: buf.get_u32(),
            jitter: buf.get_u32(),
            last_sr: buf.get_u32(),
            delay_since_last_sr: buf.get_u32(),
        })
    }

    pub fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_u32((self.fraction_lost as u32) << 24 | (self.cumulative_lost & 0x00FF_FFFF));
        buf.put_u32(self.highest_seq);
        buf.put_u32(self.jitter);
        buf.put_u32(self.last_sr);
        buf.put_u32(self.delay_since_last_sr);
    }

    /// Clamp a signed loss count into the 24-bit wire field
    pub fn encode_cumulative_lost(lost: i64) -> u32 {
        let clamped = lost.clamp(-0x80_0000, 0x7F_FFFF);
        (clamped as i32 as u32) & 0x00FF_FFFF
    }

    /// Signed view of the 24-bit cumulative loss
    pub fn cumulative_lost_signed(&self) -> i32 {
        ((self.cumulative_lost << 8) as i32) >> 8
    }
}
