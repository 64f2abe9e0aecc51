use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::Result;

/// Profile identifier of the RFC 5285 one-byte header extension
pub const ONE_BYTE_PROFILE: u16 = 0xBEDE;

/// A single one-byte-header element: 4-bit id, 1..=16 data bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpExtensionElement {
    /// Local identifier, 1..=14
    pub id: u8,
    /// Element payload, 1..=16 bytes
    pub data: Bytes,
}

impl RtpExtensionElement {
    pub fn new(id: u8, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if !(1..=14).contains(&id) {
            return Err(Error::InvalidParameter(format!(
                "extension element id {} outside 1..=14",
                id
            )));
        }
        if data.is_empty() || data.len() > 16 {
            return Err(Error::InvalidParameter(format!(
                "extension element length {} outside 1..=16",
                data.len()
            )));
        }
        Ok(Self { id, data })
    }
}

/// RTP header extension (RFC 3550 §5.3.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpHeaderExtension {
    /// Application-specific one-byte elements under profile 0xBEDE
    OneByte(Vec<RtpExtensionElement>),

    /// Any other profile, kept as opaque 32-bit aligned data
    Raw { profile: u16, data: Bytes },
}

impl RtpHeaderExtension {
    pub fn profile(&self) -> u16 {
        match self {
            RtpHeaderExtension::OneByte(_) => ONE_BYTE_PROFILE,
            RtpHeaderExtension::Raw { profile, .. } => *profile,
        }
    }

    /// Look up a one-byte element by id
    pub fn element(&self, id: u8) -> Option<&RtpExtensionElement> {
        match self {
            RtpHeaderExtension::OneByte(elements) => elements.iter().find(|e| e.id == id),
            RtpHeaderExtension::Raw { .. } => None,
        }
    }

    /// Length of the extension data in 32-bit words, excluding the 4-byte
    /// profile/length header
    pub fn length_words(&self) -> usize {
        let bytes = match self {
            RtpHeaderExtension::OneByte(elements) => {
                elements.iter().map(|e| 1 + e.data.len()).sum::<usize>()
            }
            RtpHeaderExtension::Raw { data, .. } => data.len(),
        };
        (bytes + 3) / 4
    }

    /// Total wire size including the profile/length header
    pub fn size(&self) -> usize {
        4 + self.length_words() * 4
    }

    /// Decode the data following the profile/length header.
    ///
    /// One-byte elements are read until the data is exhausted. Id 0 is a
    /// padding byte. Id 15, or an element overrunning the data, stops
    /// element parsing without failing the packet.
    pub fn parse(profile: u16, data: &[u8]) -> Self {
        if profile != ONE_BYTE_PROFILE {
            return RtpHeaderExtension::Raw {
                profile,
                data: Bytes::copy_from_slice(data),
            };
        }

        let mut elements = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let id = data[pos] >> 4;
            if id == 0 {
                pos += 1;
                continue;
            }
            if id == 15 {
                break;
            }

            let len = (data[pos] & 0x0F) as usize + 1;
            pos += 1;
            if pos + len > data.len() {
                break;
            }
            elements.push(RtpExtensionElement {
                id,
                data: Bytes::copy_from_slice(&data[pos..pos + len]),
            });
            pos += len;
        }

        RtpHeaderExtension::OneByte(elements)
    }

    /// Write profile, length and padded data
    pub fn serialize(&self, buf: &mut BytesMut) {
        let words = self.length_words();
        buf.put_u16(self.profile());
        buf.put_u16(words as u16);

        let start = buf.len();
        match self {
            RtpHeaderExtension::OneByte(elements) => {
                for element in elements {
                    buf.put_u8((element.id << 4) | ((element.data.len() - 1) as u8 & 0x0F));
                    buf.put_slice(&element.data);
                }
            }
            RtpHeaderExtension::Raw { data, .. } => buf.put_slice(data),
        }

        let written = buf.len() - start;
        buf.put_bytes(0, words * 4 - written);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_byte_elements_with_padding() {
        // id=1 len=2, padding byte, id=3 len=1
        let data = [0x11, 0xAA, 0xBB, 0x00, 0x30, 0xCC, 0x00, 0x00];
        let ext = RtpHeaderExtension::parse(ONE_BYTE_PROFILE, &data);

        let RtpHeaderExtension::OneByte(elements) = &ext else {
            panic!("expected one-byte extension");
        };
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].id, 1);
        assert_eq!(&elements[0].data[..], &[0xAA, 0xBB]);
        assert_eq!(elements[1].id, 3);
        assert_eq!(&elements[1].data[..], &[0xCC]);
        assert_eq!(ext.element(3).map(|e| e.data.len()), Some(1));
    }

    #[test]
    fn test_reserved_id_stops_parsing() {
        let data = [0x10, 0x01, 0xF0, 0x20, 0x02, 0x00, 0x00, 0x00];
        let ext = RtpHeaderExtension::parse(ONE_BYTE_PROFILE, &data);
        assert_eq!(ext, RtpHeaderExtension::OneByte(vec![RtpExtensionElement {
            id: 1,
            data: Bytes::from_static(&[0x01]),
        }]));
    }

    #[test]
    fn test_overrunning_element_is_dropped() {
        let data = [0x1F, 0x01, 0x02, 0x03];
        let ext = RtpHeaderExtension::parse(ONE_BYTE_PROFILE, &data);
        assert_eq!(ext, RtpHeaderExtension::OneByte(Vec::new()));
    }

    #[test]
    fn test_serialize_pads_to_word_boundary() {
        let ext = RtpHeaderExtension::OneByte(vec![
            RtpExtensionElement::new(2, vec![0x01, 0x02, 0x03]).unwrap(),
            RtpExtensionElement::new(5, vec![0x04]).unwrap(),
        ]);
        let mut buf = BytesMut::new();
        ext.serialize(&mut buf);

        assert_eq!(ext.length_words(), 2);
        assert_eq!(
            &buf[..],
            &[0xBE, 0xDE, 0x00, 0x02, 0x22, 0x01, 0x02, 0x03, 0x50, 0x04, 0x00, 0x00]
        );
    }

    #[test]
    fn test_element_bounds() {
        assert!(RtpExtensionElement::new(0, vec![1]).is_err());
        assert!(RtpExtensionElement::new(15, vec![1]).is_err());
        assert!(RtpExtensionElement::new(1, Vec::new()).is_err());
        assert!(RtpExtensionElement::new(1, vec![0; 17]).is_err());
        assert!(RtpExtensionElement::new(14, vec![0; 16]).is_ok());
    }
}
