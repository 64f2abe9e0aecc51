use bytes::{BufMut, Bytes, BytesMut};

use super::extension::RtpHeaderExtension;
use crate::error::Error;
use crate::{Result, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// Size of the fixed RTP header
pub const RTP_HEADER_SIZE: usize = 12;

/// RTP protocol version
pub const RTP_VERSION: u8 = 2;

/// Payload type used by peers to mark packets without media
pub const EMPTY_PAYLOAD_TYPE: u8 = 20;

/// An RTP packet (RFC 3550 §5.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Marker bit
    pub marker: bool,

    /// 7-bit payload type
    pub payload_type: u8,

    pub sequence_number: RtpSequenceNumber,

    pub timestamp: RtpTimestamp,

    pub ssrc: RtpSsrc,

    /// Contributing sources, at most 15
    pub csrc: Vec<RtpSsrc>,

    /// Header extension, if the X bit is set
    pub extension: Option<RtpHeaderExtension>,

    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(
        payload_type: u8,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            marker: false,
            payload_type: payload_type & 0x7F,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension: None,
            payload: payload.into(),
        }
    }

    /// Offset of the payload inside the serialized packet
    pub fn header_size(&self) -> usize {
        RTP_HEADER_SIZE
            + self.csrc.len() * 4
            + self.extension.as_ref().map_or(0, |e| e.size())
    }

    pub fn size(&self) -> usize {
        self.header_size() + self.payload.len()
    }

    /// Decode a datagram.
    ///
    /// A set padding bit strips the trailing padding from the payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTP_HEADER_SIZE,
                available: data.len(),
            });
        }

        let version = data[0] >> 6;
        if version != RTP_VERSION {
            return Err(Error::malformed(format!("RTP version {}", version)));
        }
        let padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;

        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7F;
        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = RTP_HEADER_SIZE;
        if data.len() < offset + csrc_count * 4 {
            return Err(Error::malformed(format!(
                "{} CSRC entries exceed packet of {} bytes",
                csrc_count,
                data.len()
            )));
        }
        let csrc = data[offset..offset + csrc_count * 4]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        offset += csrc_count * 4;

        let extension = if has_extension {
            if data.len() < offset + 4 {
                return Err(Error::malformed("truncated extension header"));
            }
            let profile = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4;

            let ext_len = words * 4;
            if data.len() < offset + ext_len {
                return Err(Error::malformed(format!(
                    "extension length {} exceeds packet of {} bytes",
                    ext_len,
                    data.len()
                )));
            }
            let ext = RtpHeaderExtension::parse(profile, &data[offset..offset + ext_len]);
            offset += ext_len;
            Some(ext)
        } else {
            None
        };

        let mut end = data.len();
        if padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(Error::malformed(format!("invalid RTP padding {}", pad)));
            }
            end -= pad;
        }

        Ok(Self {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension,
            payload: Bytes::copy_from_slice(&data[offset..end]),
        })
    }

    /// Encode into `buf`, never setting the padding bit
    pub fn serialize_into(&self, buf: &mut BytesMut) -> Result<()> {
        if self.csrc.len() > 15 {
            return Err(Error::InvalidParameter(format!(
                "{} CSRC entries, at most 15 allowed",
                self.csrc.len()
            )));
        }
        if let Some(ext) = &self.extension {
            if ext.length_words() > u16::MAX as usize {
                return Err(Error::InvalidParameter("header extension too long".into()));
            }
        }

        buf.reserve(self.size());

        let mut first = RTP_VERSION << 6 | self.csrc.len() as u8;
        if self.extension.is_some() {
            first |= 0x10;
        }
        buf.put_u8(first);
        buf.put_u8((self.marker as u8) << 7 | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in &self.csrc {
            buf.put_u32(*csrc);
        }
        if let Some(ext) = &self.extension {
            ext.serialize(buf);
        }
        buf.put_slice(&self.payload);

        Ok(())
    }

    pub fn serialize(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.size());
        self.serialize_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Read the sequence number of a raw datagram without decoding it
    pub fn peek_sequence_number(data: &[u8]) -> Option<RtpSequenceNumber> {
        (data.len() >= RTP_HEADER_SIZE).then(|| u16::from_be_bytes([data[2], data[3]]))
    }

    /// Read the payload type of a raw datagram without decoding it
    pub fn peek_payload_type(data: &[u8]) -> Option<u8> {
        (data.len() >= RTP_HEADER_SIZE).then(|| data[1] & 0x7F)
    }
}
