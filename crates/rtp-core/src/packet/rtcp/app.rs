use bytes::{BufMut, Bytes, BytesMut};

use super::padded_to_word;
use crate::error::Error;
use crate::{Result, RtpSsrc};

/// RTCP Application-defined packet (RFC 3550 §6.7)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpApplicationDefined {
    /// 5-bit subtype carried in the count field
    pub subtype: u8,

    pub ssrc: RtpSsrc,

    /// Four ASCII characters
    pub name: [u8; 4],

    /// Application data, padded to 32 bits on the wire
    pub data: Bytes,
}

impl RtcpApplicationDefined {
    /// Minimum sub-packet length: header, SSRC and name
    pub const MIN_LENGTH: usize = 12;

    pub fn new(subtype: u8, ssrc: RtpSsrc, name: [u8; 4], data: impl Into<Bytes>) -> Self {
        Self {
            subtype: subtype & 0x1F,
            ssrc,
            name,
            data: data.into(),
        }
    }

    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub(crate) fn body_size(&self) -> usize {
        8 + padded_to_word(self.data.len())
    }

    pub(crate) fn serialize_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.ssrc);
        buf.put_slice(&self.name);
        buf.put_slice(&self.data);
        buf.put_bytes(0, padded_to_word(self.data.len()) - self.data.len());
    }

    pub(crate) fn parse_body(body: &[u8], subtype: usize) -> Result<Self> {
        if body.len() + 4 < Self::MIN_LENGTH {
            return Err(Error::malformed(format!(
                "APP packet of {} bytes",
                body.len() + 4
            )));
        }

        Ok(Self {
            subtype: subtype as u8,
            ssrc: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            name: [body[4], body[5], body[6], body[7]],
            data: Bytes::copy_from_slice(&body[8..]),
        })
    }
}
