use bytes::{BufMut, BytesMut};

use super::{padded_to_word, RTCP_HEADER_SIZE};
use crate::error::Error;
use crate::{Result, RtpSsrc};

/// SDES item types (RFC 3550 §6.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RtcpSdesItemType {
    Cname = 1,
    Name = 2,
    Email = 3,
    Phone = 4,
    Loc = 5,
    Tool = 6,
    Note = 7,
    Priv = 8,
}

impl TryFrom<u8> for RtcpSdesItemType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => RtcpSdesItemType::Cname,
            2 => RtcpSdesItemType::Name,
            3 => RtcpSdesItemType::Email,
            4 => RtcpSdesItemType::Phone,
            5 => RtcpSdesItemType::Loc,
            6 => RtcpSdesItemType::Tool,
            7 => RtcpSdesItemType::Note,
            8 => RtcpSdesItemType::Priv,
            other => return Err(Error::malformed(format!("SDES item type {}", other))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSdesItem {
    pub item_type: RtcpSdesItemType,
    pub value: String,
}

impl RtcpSdesItem {
    pub fn new(item_type: RtcpSdesItemType, value: impl Into<String>) -> Self {
        Self {
            item_type,
            value: value.into(),
        }
    }

    pub fn cname(value: impl Into<String>) -> Self {
        Self::new(RtcpSdesItemType::Cname, value)
    }

    fn wire_len(&self) -> usize {
        self.value.len().min(255)
    }
}

/// Items describing one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtcpSdesChunk {
    pub ssrc: RtpSsrc,
    pub items: Vec<RtcpSdesItem>,
}

impl RtcpSdesChunk {
    pub fn new(ssrc: RtpSsrc) -> Self {
        Self {
            ssrc,
            items: Vec::new(),
        }
    }

    pub fn with_cname(ssrc: RtpSsrc, cname: impl Into<String>) -> Self {
        Self {
            ssrc,
            items: vec![RtcpSdesItem::cname(cname)],
        }
    }

    pub fn cname(&self) -> Option<&str> {
        self.items
            .iter()
            .find(|i| i.item_type == RtcpSdesItemType::Cname)
            .map(|i| i.value.as_str())
    }

    /// Chunk size including the terminating null octet and padding
    fn size(&self) -> usize {
        let items: usize = self.items.iter().map(|i| 2 + i.wire_len()).sum();
        padded_to_word(4 + items + 1)
    }
}

/// RTCP Source Description packet (RFC 3550 §6.5)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcpSourceDescription {
    pub chunks: Vec<RtcpSdesChunk>,
}

impl RtcpSourceDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single chunk carrying a CNAME
    pub fn for_cname(ssrc: RtpSsrc, cname: impl Into<String>) -> Self {
        Self {
            chunks: vec![RtcpSdesChunk::with_cname(ssrc, cname)],
        }
    }

    pub fn add_chunk(&mut self, chunk: RtcpSdesChunk) {
        self.chunks.push(chunk);
    }

    pub(crate) fn body_size(&self) -> usize {
        self.chunks.iter().map(|c| c.size()).sum()
    }

    pub(crate) fn serialize_body(&self, buf: &mut BytesMut) {
        for chunk in &self.chunks {
            let start = buf.len();
            buf.put_u32(chunk.ssrc);
            for item in &chunk.items {
                let len = item.wire_len();
                buf.put_u8(item.item_type as u8);
                buf.put_u8(len as u8);
                buf.put_slice(&item.value.as_bytes()[..len]);
            }
            let written = buf.len() - start;
            buf.put_bytes(0, chunk.size() - written);
        }
    }

    /// Decode `chunk_count` chunks from `body`, which must be consumed
    /// exactly. Every chunk must carry a CNAME.
    pub(crate) fn parse_body(body: &[u8], chunk_count: usize) -> Result<Self> {
        // Offsets are tracked from the start of the sub-packet so that
        // alignment matches the sender's view.
        let base = RTCP_HEADER_SIZE;
        let mut pos = 0;
        let mut chunks = Vec::with_capacity(chunk_count);

        for _ in 0..chunk_count {
            if pos + 4 > body.len() {
                return Err(Error::malformed("truncated SDES chunk"));
            }
            let ssrc = u32::from_be_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]]);
            pos += 4;

            let mut items = Vec::new();
            loop {
                let Some(&item_type) = body.get(pos) else {
                    return Err(Error::malformed("SDES chunk not terminated"));
                };
                pos += 1;
                if item_type == 0 {
                    break;
                }

                let item_type = RtcpSdesItemType::try_from(item_type)?;
                let Some(&len) = body.get(pos) else {
                    return Err(Error::malformed("truncated SDES item"));
                };
                pos += 1;
                let len = len as usize;
                if pos + len > body.len() {
                    return Err(Error::malformed("SDES item overruns packet"));
                }
                items.push(RtcpSdesItem {
                    item_type,
                    value: String::from_utf8_lossy(&body[pos..pos + len]).into_owned(),
                });
                pos += len;
            }

            let chunk = RtcpSdesChunk { ssrc, items };
            if chunk.cname().is_none() {
                return Err(Error::malformed(format!(
                    "SDES chunk for {:08x} has no CNAME",
                    ssrc
                )));
            }
            chunks.push(chunk);

            pos = padded_to_word(base + pos) - base;
        }

        if pos != body.len() {
            return Err(Error::malformed(format!(
                "SDES length {} does not match content {}",
                body.len() + base,
                pos + base
            )));
        }

        Ok(Self { chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cname_chunk_layout() {
        let sdes = RtcpSourceDescription::for_cname(0x01020304, "ab");
        let mut buf = BytesMut::new();
        sdes.serialize_body(&mut buf);

        // ssrc, CNAME item (type, len, 2 bytes), null, padding to 12
        assert_eq!(
            &buf[..],
            &[1, 2, 3, 4, 1, 2, b'a', b'b', 0, 0, 0, 0]
        );
        assert_eq!(sdes.body_size(), 12);

        let parsed = RtcpSourceDescription::parse_body(&buf, 1).unwrap();
        assert_eq!(parsed, sdes);
        assert_eq!(parsed.chunks[0].cname(), Some("ab"));
    }

    #[test]
    fn test_word_aligned_items_still_get_terminator() {
        // ssrc + item header + value + null octet, rounded up to a word
        let sdes = RtcpSourceDescription::for_cname(7, "xy");
        assert_eq!(sdes.body_size(), 12);

        let sdes = RtcpSourceDescription::for_cname(7, "xyz");
        assert_eq!(sdes.body_size(), 12);

        let sdes = RtcpSourceDescription::for_cname(7, "wxyz");
        assert_eq!(sdes.body_size(), 12);

        let sdes = RtcpSourceDescription::for_cname(7, "vwxyz");
        assert_eq!(sdes.body_size(), 12);

        let sdes = RtcpSourceDescription::for_cname(7, "uvwxyz");
        assert_eq!(sdes.body_size(), 16);
    }

    #[test]
    fn test_chunk_without_cname_is_malformed() {
        let mut sdes = RtcpSourceDescription::new();
        let mut chunk = RtcpSdesChunk::new(9);
        chunk.items.push(RtcpSdesItem::new(RtcpSdesItemType::Tool, "rcs"));
        sdes.add_chunk(chunk);

        let mut buf = BytesMut::new();
        sdes.serialize_body(&mut buf);
        assert!(matches!(
            RtcpSourceDescription::parse_body(&buf, 1),
            Err(Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_invalid_item_type() {
        let body = [0, 0, 0, 1, 9, 1, b'x', 0];
        assert!(RtcpSourceDescription::parse_body(&body, 1).is_err());
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let sdes = RtcpSourceDescription::for_cname(1, "cname");
        let mut buf = BytesMut::new();
        sdes.serialize_body(&mut buf);
        buf.put_u32(0);
        assert!(RtcpSourceDescription::parse_body(&buf, 1).is_err());
    }
}
