use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use super::connection::DatagramConnection;
use super::fifo::PacketFifo;
use super::MAX_DATAGRAM_SIZE;
use crate::error::Error;
use crate::packet::{RtpPacket, EMPTY_PAYLOAD_TYPE, RTP_HEADER_SIZE};
use crate::session::RtcpSession;
use crate::stats::{sequence_lag, RtpReceiverStats};
use crate::Result;

/// Packets more than this many sequence numbers behind the last accepted
/// one are dropped as stale
pub const STALE_SEQUENCE_THRESHOLD: i16 = 10;

/// A decoded RTP packet together with its receive context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedRtpPacket {
    pub packet: RtpPacket,
    /// Sequence number extended with the wrap count of the source
    pub extended_sequence: u32,
    /// Time the datagram was read from the socket
    pub received_at: Instant,
}

struct Datagram {
    data: Bytes,
    received_at: Instant,
}

#[derive(Default)]
struct FilterState {
    last_sequence: Option<u16>,
}

struct Shared {
    connection: Arc<dyn DatagramConnection>,
    session: Arc<RtcpSession>,
    fifo: PacketFifo<Datagram>,
    stats: Mutex<RtpReceiverStats>,
    filter: Mutex<FilterState>,
}

/// Receives RTP datagrams on a background task and queues them for
/// [`read_rtp_packet`](Self::read_rtp_packet).
///
/// The receive loop ends on socket timeout, on close, or on an unexpected
/// error; a receiver cannot be restarted afterwards.
pub struct RtpPacketReceiver {
    shared: Arc<Shared>,
    socket_timeout: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RtpPacketReceiver {
    /// A zero `socket_timeout` waits for traffic indefinitely
    pub fn new(
        connection: Arc<dyn DatagramConnection>,
        session: Arc<RtcpSession>,
        socket_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connection,
                session,
                fifo: PacketFifo::new(),
                stats: Mutex::new(RtpReceiverStats::default()),
                filter: Mutex::new(FilterState::default()),
            }),
            socket_timeout,
            task: Mutex::new(None),
        }
    }

    /// Connection shared with a symmetric transmitter
    pub fn connection(&self) -> Arc<dyn DatagramConnection> {
        self.shared.connection.clone()
    }

    /// Spawn the receive loop. Calling it again has no effect.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let shared = self.shared.clone();
        let socket_timeout = self.socket_timeout;
        *task = Some(tokio::spawn(async move {
            Self::receive_loop(shared, socket_timeout).await;
        }));
    }

    async fn receive_loop(shared: Arc<Shared>, socket_timeout: Duration) {
        debug!("RTP receiver started");
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            match shared.connection.receive(&mut buf, socket_timeout).await {
                Ok(len) => Self::handle_datagram(&shared, &buf[..len]),
                Err(Error::Timeout(_)) => {
                    info!("No RTP received within {:?}, receiver stopped", socket_timeout);
                    break;
                }
                Err(Error::Closed) => break,
                Err(e) => {
                    error!("RTP receiver failed: {}", e);
                    break;
                }
            }
        }

        shared.fifo.close();
        debug!("RTP receiver terminated");
    }

    fn handle_datagram(shared: &Shared, data: &[u8]) {
        if data.len() < RTP_HEADER_SIZE {
            trace!("Ignoring {} byte datagram", data.len());
            return;
        }
        if RtpPacket::peek_payload_type(data) == Some(EMPTY_PAYLOAD_TYPE) {
            trace!("Ignoring empty RTP packet");
            return;
        }

        let Some(seq) = RtpPacket::peek_sequence_number(data) else {
            return;
        };
        {
            let mut filter = shared.filter.lock();
            if let Some(last) = filter.last_sequence {
                if sequence_lag(last, seq) > STALE_SEQUENCE_THRESHOLD {
                    debug!("Dropping stale RTP packet {} (last {})", seq, last);
                    shared.stats.lock().bad_packets += 1;
                    return;
                }
            }
            filter.last_sequence = Some(seq);
        }

        let evicted = shared.fifo.push(Datagram {
            data: Bytes::copy_from_slice(data),
            received_at: Instant::now(),
        });
        if evicted > 0 {
            debug!("RTP queue full, dropped {} oldest packets", evicted);
        }
    }

    /// Wait for the next packet. A zero `timeout` waits indefinitely.
    ///
    /// Undecodable datagrams are counted as bad and skipped. Fails with
    /// [`Error::Timeout`] when nothing decodable arrives in time and with
    /// [`Error::Closed`] once the loop has ended and the queue is drained.
    pub async fn read_rtp_packet(&self, timeout: Duration) -> Result<ReceivedRtpPacket> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(Error::Timeout(timeout));
                    }
                    left
                }
                None => Duration::ZERO,
            };

            let datagram = match self.shared.fifo.pop(remaining).await {
                Ok(datagram) => datagram,
                Err(Error::Timeout(_)) => return Err(Error::Timeout(timeout)),
                Err(e) => return Err(e),
            };

            let packet = match RtpPacket::parse(&datagram.data) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!("Dropping malformed RTP packet: {}", e);
                    self.shared.stats.lock().bad_packets += 1;
                    continue;
                }
            };

            {
                let mut stats = self.shared.stats.lock();
                stats.packets += 1;
                stats.bytes += datagram.data.len() as u64;
            }

            let extended_sequence = self.shared.session.receive_rtp(&packet, datagram.received_at);

            return Ok(ReceivedRtpPacket {
                packet,
                extended_sequence,
                received_at: datagram.received_at,
            });
        }
    }

    /// Counters for packets read so far and for dropped packets
    pub fn stats(&self) -> RtpReceiverStats {
        *self.shared.stats.lock()
    }

    /// Packets waiting to be read
    pub fn queued(&self) -> usize {
        self.shared.fifo.len()
    }

    /// Whether the receive loop is still running
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// Close the connection and stop the loop. Idempotent.
    pub async fn close(&self) {
        self.shared.connection.close();
        self.shared.fifo.close();

        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for RtpPacketReceiver {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
