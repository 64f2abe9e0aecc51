use bytes::{BufMut, BytesMut};

use super::padded_to_word;
use crate::error::Error;
use crate::{Result, RtpSsrc};

/// RTCP Goodbye packet (RFC 3550 §6.6)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtcpGoodbye {
    /// Sources leaving the session, at most 31
    pub sources: Vec<RtpSsrc>,

    /// Reason for leaving
    pub reason: Option<String>,
}

impl RtcpGoodbye {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_for_source(ssrc: RtpSsrc) -> Self {
        Self {
            sources: vec![ssrc],
            reason: None,
        }
    }

    pub fn new_with_reason(ssrc: RtpSsrc, reason: impl Into<String>) -> Self {
        Self {
            sources: vec![ssrc],
            reason: Some(reason.into()),
        }
    }

    fn reason_len(&self) -> Option<usize> {
        self.reason.as_ref().map(|r| r.len().min(255))
    }

    pub(crate) fn body_size(&self) -> usize {
        self.sources.len() * 4 + self.reason_len().map_or(0, |len| padded_to_word(len + 1))
    }

    pub(crate) fn serialize_body(&self, buf: &mut BytesMut) {
        for ssrc in &self.sources {
            buf.put_u32(*ssrc);
        }

        if let (Some(reason), Some(len)) = (&self.reason, self.reason_len()) {
            buf.put_u8(len as u8);
            buf.put_slice(&reason.as_bytes()[..len]);
            buf.put_bytes(0, padded_to_word(len + 1) - (len + 1));
        }
    }

    /// `body` must be exactly the SSRC list plus the padded reason, if any
    pub(crate) fn parse_body(body: &[u8], source_count: usize) -> Result<Self> {
        let ssrc_len = source_count * 4;
        if body.len() < ssrc_len {
            return Err(Error::malformed(format!(
                "BYE with {} sources in {} bytes",
                source_count,
                body.len()
            )));
        }

        let sources = body[..ssrc_len]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let rest = &body[ssrc_len..];
        let (reason, reason_size) = match rest.first() {
            Some(&len) => {
                let len = len as usize;
                let size = padded_to_word(len + 1);
                if rest.len() < size {
                    return Err(Error::malformed("BYE reason overruns packet"));
                }
                let text = String::from_utf8_lossy(&rest[1..1 + len]).into_owned();
                (Some(text), size)
            }
            None => (None, 0),
        };

        if rest.len() != reason_size {
            return Err(Error::malformed(format!(
                "BYE length {} does not match content {}",
                body.len(),
                ssrc_len + reason_size
            )));
        }

        Ok(Self { sources, reason })
    }
}
