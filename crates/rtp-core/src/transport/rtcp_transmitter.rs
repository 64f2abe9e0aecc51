use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::connection::DatagramConnection;
use crate::error::Error;
use crate::packet::rtcp::{
    RtcpCompoundPacket, RtcpGoodbye, RtcpPacket, RtcpReceiverReport, RtcpSourceDescription,
};
use crate::session::RtcpSession;
use crate::stats::TransmitterStats;
use crate::Result;

enum Wake {
    Elapsed,
    Interrupted,
    Closed,
}

struct Shared {
    connection: Arc<dyn DatagramConnection>,
    owns_connection: bool,
    session: Arc<RtcpSession>,
    stats: Mutex<TransmitterStats>,
    closed: AtomicBool,
    interrupt: Notify,
    cancel: CancellationToken,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn transmit(&self, compound: &RtcpCompoundPacket) -> Result<()> {
        let data = compound.serialize()?;
        self.connection.send(&data).await?;
        self.stats.lock().record(data.len());
        self.session.on_rtcp_sent(data.len());
        Ok(())
    }

    /// SR or RR, then SDES, then BYE if one was requested
    fn assemble_report(&self, now: Instant) -> RtcpCompoundPacket {
        let session = &self.session;
        let reports = session.reception_reports(now);

        let mut compound = RtcpCompoundPacket::new();
        if session.should_send_sender_report() {
            let mut sr = session.sender_report();
            sr.report_blocks = reports;
            compound.push(RtcpPacket::SenderReport(sr));
        } else {
            let mut rr = RtcpReceiverReport::new(session.ssrc());
            rr.report_blocks = reports;
            compound.push(RtcpPacket::ReceiverReport(rr));
        }

        compound.push(RtcpPacket::SourceDescription(
            RtcpSourceDescription::for_cname(session.ssrc(), session.cname()),
        ));

        if session.is_bye_requested() {
            compound.push(RtcpPacket::Goodbye(RtcpGoodbye::new_for_source(
                session.ssrc(),
            )));
        }

        compound
    }
}

/// Sends periodic RTCP reports for a session.
///
/// The loop sends one SDES on start, then wakes every randomised report
/// interval and transmits only once `T` has elapsed since the last RTCP
/// packet. [`request_bye`](Self::request_bye) grants one extra interval
/// before the final report carrying BYE; if nothing was ever sent the
/// loop ends silently.
pub struct RtcpPacketTransmitter {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RtcpPacketTransmitter {
    /// Transmitter owning `connection`
    pub fn new(connection: Arc<dyn DatagramConnection>, session: Arc<RtcpSession>) -> Self {
        Self::build(connection, session, true)
    }

    /// Transmitter sending through a receiver's connection
    pub fn symmetric(connection: Arc<dyn DatagramConnection>, session: Arc<RtcpSession>) -> Self {
        Self::build(connection, session, false)
    }

    fn build(
        connection: Arc<dyn DatagramConnection>,
        session: Arc<RtcpSession>,
        owns_connection: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connection,
                owns_connection,
                session,
                stats: Mutex::new(TransmitterStats::default()),
                closed: AtomicBool::new(false),
                interrupt: Notify::new(),
                cancel: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() || self.shared.is_closed() {
            return;
        }

        let shared = self.shared.clone();
        *task = Some(tokio::spawn(async move {
            match Self::run(&shared).await {
                Ok(()) | Err(Error::Closed) => {}
                Err(Error::Network(e)) => debug!("RTCP transmitter stopped: {}", e),
                Err(e) => error!("Can't send the RTCP packet: {}", e),
            }
            debug!("RTCP transmitter terminated");
        }));
    }

    async fn run(shared: &Shared) -> Result<()> {
        if shared.is_closed() {
            return Ok(());
        }

        let session = &shared.session;
        shared
            .transmit(&RtcpCompoundPacket::with_packets(vec![
                RtcpPacket::SourceDescription(RtcpSourceDescription::for_cname(
                    session.ssrc(),
                    session.cname(),
                )),
            ]))
            .await?;

        let mut waiting_for_bye_backoff = false;
        loop {
            let interval = session.report_interval();
            let wake = tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => Wake::Closed,
                _ = shared.interrupt.notified() => Wake::Interrupted,
                _ = tokio::time::sleep(interval) => Wake::Elapsed,
            };

            match wake {
                Wake::Closed => return Ok(()),
                Wake::Interrupted => {
                    waiting_for_bye_backoff = true;
                    session.request_bye();
                    continue;
                }
                Wake::Elapsed => {}
            }

            let now = Instant::now();
            if session.is_time_to_send(now) {
                if session.is_bye_requested() && waiting_for_bye_backoff {
                    if session.has_sent_anything() {
                        session.set_active_sender(false);
                        session.mark_rtcp_sent(now);
                    } else {
                        debug!("Nothing was ever sent, leaving without BYE");
                        return Ok(());
                    }
                } else {
                    if shared.is_closed() {
                        return Ok(());
                    }

                    let compound = shared.assemble_report(now);
                    shared.transmit(&compound).await?;

                    if session.is_bye_requested() {
                        debug!("BYE sent for {:08x}", session.ssrc());
                        return Ok(());
                    }
                    session.mark_rtcp_sent(now);
                }
                waiting_for_bye_backoff = false;
            }
        }
    }

    /// Ask for a graceful end: one more interval, then a report with BYE
    pub fn request_bye(&self) {
        self.shared.interrupt.notify_one();
    }

    /// Request BYE and wait up to `timeout` for it to go out, then close
    pub async fn stop(&self, timeout: Duration) {
        self.request_bye();

        let task = self.task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                warn!("RTCP transmitter did not finish within {:?}", timeout);
                self.close();
                let _ = task.await;
            }
        }
        self.close();
    }

    /// Stop immediately without BYE. The owned connection is closed
    /// exactly once, whether or not the loop was started.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.session.request_bye();
        self.shared.cancel.cancel();
        if self.shared.owns_connection {
            self.shared.connection.close();
        }
        debug!("RTCP transmitter closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    pub fn stats(&self) -> TransmitterStats {
        *self.shared.stats.lock()
    }
}

impl Drop for RtcpPacketTransmitter {
    fn drop(&mut self) {
        self.close();
    }
}
