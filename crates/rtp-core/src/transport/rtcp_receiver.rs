use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::connection::DatagramConnection;
use super::MAX_DATAGRAM_SIZE;
use crate::error::Error;
use crate::packet::rtcp::{
    RtcpApplicationDefined, RtcpCompoundPacket, RtcpGoodbye, RtcpPacket, RtcpReceiverReport,
    RtcpSenderReport, RtcpSourceDescription,
};
use crate::session::RtcpSession;
use crate::stats::RtcpReceiverStats;

/// Notifications delivered to [`RtcpEventListener`]s
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpEvent {
    SenderReport(RtcpSenderReport),
    ReceiverReport(RtcpReceiverReport),
    SourceDescription(RtcpSourceDescription),
    Goodbye(RtcpGoodbye),
    ApplicationDefined(RtcpApplicationDefined),
    /// Nothing was received within the socket timeout
    ConnectionTimeout,
}

impl From<RtcpPacket> for RtcpEvent {
    fn from(packet: RtcpPacket) -> Self {
        match packet {
            RtcpPacket::SenderReport(sr) => RtcpEvent::SenderReport(sr),
            RtcpPacket::ReceiverReport(rr) => RtcpEvent::ReceiverReport(rr),
            RtcpPacket::SourceDescription(sdes) => RtcpEvent::SourceDescription(sdes),
            RtcpPacket::Goodbye(bye) => RtcpEvent::Goodbye(bye),
            RtcpPacket::ApplicationDefined(app) => RtcpEvent::ApplicationDefined(app),
        }
    }
}

/// Observer of RTCP traffic. Called from the receive task, so
/// implementations should return quickly.
pub trait RtcpEventListener: Send + Sync {
    fn on_rtcp_event(&self, event: &RtcpEvent);
}

struct Shared {
    connection: Arc<dyn DatagramConnection>,
    session: Arc<RtcpSession>,
    listeners: RwLock<Vec<Arc<dyn RtcpEventListener>>>,
    stats: Mutex<RtcpReceiverStats>,
}

impl Shared {
    fn notify(&self, event: &RtcpEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_rtcp_event(event);
        }
    }
}

/// Parses inbound compound RTCP packets on a background task and fans
/// them out to listeners in registration order.
///
/// A datagram failing validation is counted and dropped as a whole;
/// listeners only ever see packets from fully valid datagrams.
pub struct RtcpPacketReceiver {
    shared: Arc<Shared>,
    socket_timeout: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RtcpPacketReceiver {
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
                listeners: RwLock::new(Vec::new()),
                stats: Mutex::new(RtcpReceiverStats::default()),
            }),
            socket_timeout,
            task: Mutex::new(None),
        }
    }

    pub fn connection(&self) -> Arc<dyn DatagramConnection> {
        self.shared.connection.clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn RtcpEventListener>) {
        debug!("Add an RTCP event listener");
        self.shared.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RtcpEventListener>) {
        debug!("Remove an RTCP event listener");
        self.shared
            .listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

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
        debug!("RTCP receiver started");
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            match shared.connection.receive(&mut buf, socket_timeout).await {
                Ok(len) => Self::handle_datagram(&shared, &buf[..len]),
                Err(Error::Timeout(_)) => {
                    info!("No RTCP received within {:?}", socket_timeout);
                    shared.notify(&RtcpEvent::ConnectionTimeout);
                    break;
                }
                Err(Error::Closed) => break,
                Err(e) => {
                    error!("RTCP receiver failed: {}", e);
                    break;
                }
            }
        }

        debug!("RTCP receiver terminated");
    }

    fn handle_datagram(shared: &Shared, data: &[u8]) {
        {
            let mut stats = shared.stats.lock();
            stats.packets += 1;
            stats.bytes += data.len() as u64;
        }
        shared.session.update_avg_rtcp_size(data.len());

        let compound = match RtcpCompoundPacket::parse(data) {
            Ok(compound) => compound,
            Err(e) => {
                let mut stats = shared.stats.lock();
                match e {
                    Error::InvalidVersion(_) => stats.bad_packets += 1,
                    Error::UnknownPacketType(_) => {
                        stats.unknown_types += 1;
                        stats.malformed_packets += 1;
                    }
                    _ => stats.malformed_packets += 1,
                }
                warn!("Dropping RTCP datagram of {} bytes: {}", data.len(), e);
                return;
            }
        };

        let now = Instant::now();
        for packet in compound.packets {
            match &packet {
                RtcpPacket::SenderReport(sr) => {
                    shared.stats.lock().sr_packets += 1;
                    shared.session.on_sender_report(sr, now);
                }
                RtcpPacket::SourceDescription(sdes) => {
                    for chunk in &sdes.chunks {
                        shared.session.on_source_description(chunk);
                    }
                }
                RtcpPacket::Goodbye(bye) => {
                    for ssrc in &bye.sources {
                        shared.session.on_goodbye(*ssrc);
                    }
                }
                RtcpPacket::ReceiverReport(_) | RtcpPacket::ApplicationDefined(_) => {}
            }
            shared.notify(&RtcpEvent::from(packet));
        }
    }

    pub fn stats(&self) -> RtcpReceiverStats {
        *self.shared.stats.lock()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// Close the connection and wait for the loop to end. Idempotent.
    pub async fn close(&self) {
        self.shared.connection.close();

        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for RtcpPacketReceiver {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
