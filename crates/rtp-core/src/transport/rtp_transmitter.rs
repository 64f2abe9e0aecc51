use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, trace};

use super::connection::DatagramConnection;
use crate::error::Error;
use crate::packet::{RtpHeaderExtension, RtpPacket};
use crate::session::RtcpSession;
use crate::stats::TransmitterStats;
use crate::{Result, RtpSequenceNumber, RtpTimestamp};

/// Outgoing media handed to [`RtpPacketTransmitter::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBuffer {
    pub payload: Bytes,
    pub timestamp: RtpTimestamp,
    pub payload_type: u8,
    pub marker: bool,
    pub extension: Option<RtpHeaderExtension>,
}

impl MediaBuffer {
    pub fn new(payload: impl Into<Bytes>, timestamp: RtpTimestamp, payload_type: u8) -> Self {
        Self {
            payload: payload.into(),
            timestamp,
            payload_type,
            marker: false,
            extension: None,
        }
    }

    pub fn with_marker(mut self) -> Self {
        self.marker = true;
        self
    }

    pub fn with_extension(mut self, extension: RtpHeaderExtension) -> Self {
        self.extension = Some(extension);
        self
    }
}

/// Serializes media buffers into RTP packets and sends them.
///
/// Sequence numbers start at a random value and wrap at 2^16.
pub struct RtpPacketTransmitter {
    connection: Arc<dyn DatagramConnection>,
    owns_connection: bool,
    session: Arc<RtcpSession>,
    sequence: Mutex<RtpSequenceNumber>,
    stats: Mutex<TransmitterStats>,
    closed: AtomicBool,
}

impl RtpPacketTransmitter {
    /// Transmitter owning `connection`
    pub fn new(connection: Arc<dyn DatagramConnection>, session: Arc<RtcpSession>) -> Self {
        Self::with_sequence(connection, session, true, rand::thread_rng().gen())
    }

    /// Transmitter sending through a receiver's connection; closing it
    /// leaves the connection open
    pub fn symmetric(connection: Arc<dyn DatagramConnection>, session: Arc<RtcpSession>) -> Self {
        Self::with_sequence(connection, session, false, rand::thread_rng().gen())
    }

    pub fn with_sequence(
        connection: Arc<dyn DatagramConnection>,
        session: Arc<RtcpSession>,
        owns_connection: bool,
        initial_sequence: RtpSequenceNumber,
    ) -> Self {
        Self {
            connection,
            owns_connection,
            session,
            sequence: Mutex::new(initial_sequence),
            stats: Mutex::new(TransmitterStats::default()),
            closed: AtomicBool::new(false),
        }
    }

    fn next_sequence(&self) -> RtpSequenceNumber {
        let mut sequence = self.sequence.lock();
        let current = *sequence;
        *sequence = current.wrapping_add(1);
        current
    }

    /// Encode and send one buffer, returning the sequence number used
    pub async fn send(&self, buffer: &MediaBuffer) -> Result<RtpSequenceNumber> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        let mut packet = RtpPacket::new(
            buffer.payload_type,
            self.next_sequence(),
            buffer.timestamp,
            self.session.ssrc(),
            buffer.payload.clone(),
        );
        packet.marker = buffer.marker;
        packet.extension = buffer.extension.clone();

        let data = packet.serialize()?;
        self.connection.send(&data).await?;
        trace!(
            "Sent RTP packet seq={} ts={} ({} bytes)",
            packet.sequence_number,
            packet.timestamp,
            data.len()
        );

        self.stats.lock().record(data.len());
        self.session.on_rtp_sent(buffer.payload.len(), buffer.timestamp);

        Ok(packet.sequence_number)
    }

    pub fn stats(&self) -> TransmitterStats {
        *self.stats.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop sending. An owned connection is closed exactly once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.owns_connection {
            self.connection.close();
        }
        debug!("RTP transmitter closed");
    }
}

impl Drop for RtpPacketTransmitter {
    fn drop(&mut self) {
        self.close();
    }
}
