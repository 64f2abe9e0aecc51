//! RTCP session state
//!
//! One [`RtcpSession`] is shared by the RTP receiver and transmitter and
//! the RTCP receiver and transmitter of a media stream. All fields sit
//! behind one lock; every accessor holds it only for the duration of the
//! call.

mod interval;
mod source;

use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;
use tracing::debug;

use crate::packet::rtcp::{NtpTimestamp, RtcpReportBlock, RtcpSdesChunk, RtcpSenderReport};
use crate::packet::RtpPacket;
use crate::time::clock_rates;
use crate::{RtpSsrc, RtpTimestamp};

pub use interval::{deterministic_interval, randomize, IntervalParams};
pub use source::RtpSource;

/// Average compound size assumed before any RTCP has been seen
const INITIAL_AVG_RTCP_SIZE: f64 = 128.0;

/// Tunables of an RTCP session
#[derive(Debug, Clone)]
pub struct RtcpSessionConfig {
    /// Media session bandwidth in octets per second
    pub session_bandwidth: f64,
    /// Share of the session bandwidth given to RTCP
    pub rtcp_fraction: f64,
    /// Minimum interval between reports
    pub min_interval: Duration,
    /// Canonical name advertised in SDES
    pub cname: String,
    /// RTP clock rate of the media
    pub clock_rate: u32,
}

impl Default for RtcpSessionConfig {
    fn default() -> Self {
        Self {
            session_bandwidth: 8000.0,
            rtcp_fraction: 0.05,
            min_interval: Duration::from_secs(5),
            cname: "rcs@localhost".to_string(),
            clock_rate: clock_rates::AUDIO_8KHZ,
        }
    }
}

impl RtcpSessionConfig {
    /// Canonical name sent in SDES reports
    pub fn with_cname(mut self, cname: impl Into<String>) -> Self {
        self.cname = cname.into();
        self
    }

    /// Lower bound of the deterministic report interval
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// RTP clock rate used for sender report timestamps and jitter
    pub fn with_clock_rate(mut self, clock_rate: u32) -> Self {
        self.clock_rate = clock_rate;
        self
    }
}

#[derive(Debug)]
struct SessionState {
    packet_count: u64,
    octet_count: u64,
    last_rtp_timestamp: RtpTimestamp,
    last_rtp_sent: Option<Instant>,
    last_rtcp_sent: Option<Instant>,
    avg_rtcp_size: f64,
    bye_requested: bool,
    initial: bool,
    /// We sent RTP since the last report
    active_sender: bool,
    /// Deterministic interval of the last computation
    t: Duration,
    source: RtpSource,
}

/// State shared by the transports of one media stream
#[derive(Debug)]
pub struct RtcpSession {
    ssrc: RtpSsrc,
    config: RtcpSessionConfig,
    state: Mutex<SessionState>,
}

impl RtcpSession {
    /// Session for the local source `ssrc`
    pub fn new(ssrc: RtpSsrc, config: RtcpSessionConfig) -> Self {
        let source = RtpSource::new(config.clock_rate);
        let t = config.min_interval;
        Self {
            ssrc,
            config,
            state: Mutex::new(SessionState {
                packet_count: 0,
                octet_count: 0,
                last_rtp_timestamp: 0,
                last_rtp_sent: None,
                last_rtcp_sent: None,
                avg_rtcp_size: INITIAL_AVG_RTCP_SIZE,
                bye_requested: false,
                initial: true,
                active_sender: false,
                t,
                source,
            }),
        }
    }

    /// Session with a random SSRC
    pub fn with_random_ssrc(config: RtcpSessionConfig) -> Self {
        Self::new(rand::thread_rng().gen(), config)
    }

    /// Local synchronization source
    pub fn ssrc(&self) -> RtpSsrc {
        self.ssrc
    }

    /// Local canonical name
    pub fn cname(&self) -> &str {
        &self.config.cname
    }

    pub fn config(&self) -> &RtcpSessionConfig {
        &self.config
    }

    /// RTP packets sent by the local source
    pub fn packet_count(&self) -> u64 {
        self.state.lock().packet_count
    }

    /// Payload octets sent by the local source
    pub fn octet_count(&self) -> u64 {
        self.state.lock().octet_count
    }

    /// When the local source last sent RTP, if ever
    pub fn time_of_last_rtp_sent(&self) -> Option<Instant> {
        self.state.lock().last_rtp_sent
    }

    /// When the last RTCP compound packet went out, if ever
    pub fn time_of_last_rtcp_sent(&self) -> Option<Instant> {
        self.state.lock().last_rtcp_sent
    }

    /// Running average of compound RTCP packet sizes in bytes
    pub fn avg_rtcp_size(&self) -> f64 {
        self.state.lock().avg_rtcp_size
    }

    /// Fold a packet size into the running average with weight 1/16
    pub fn update_avg_rtcp_size(&self, size: usize) {
        let mut state = self.state.lock();
        state.avg_rtcp_size = size as f64 / 16.0 + state.avg_rtcp_size * 15.0 / 16.0;
    }

    /// Ask the transmitter to send BYE at its next opportunity
    pub fn request_bye(&self) {
        self.state.lock().bye_requested = true;
    }

    pub fn is_bye_requested(&self) -> bool {
        self.state.lock().bye_requested
    }

    /// Whether we count as an active sender in the next report
    pub fn is_active_sender(&self) -> bool {
        self.state.lock().active_sender
    }

    /// Mark the local source as sending or silent. Senders emit SR instead of RR.
    pub fn set_active_sender(&self, active: bool) {
        self.state.lock().active_sender = active;
    }

    /// Record an outgoing RTP packet
    pub fn on_rtp_sent(&self, payload_len: usize, timestamp: RtpTimestamp) {
        let mut state = self.state.lock();
        state.packet_count += 1;
        state.octet_count += payload_len as u64;
        state.last_rtp_timestamp = timestamp;
        state.last_rtp_sent = Some(Instant::now());
        state.active_sender = true;
    }

    /// Record an outgoing RTCP compound packet
    pub fn on_rtcp_sent(&self, size: usize) {
        self.update_avg_rtcp_size(size);
        let mut state = self.state.lock();
        state.initial = false;
        Self::advance_rtcp_time(&mut state, Instant::now());
    }

    /// Move the last-RTCP time forward to `at`; earlier values are ignored
    pub fn mark_rtcp_sent(&self, at: Instant) {
        Self::advance_rtcp_time(&mut self.state.lock(), at);
    }

    fn advance_rtcp_time(state: &mut SessionState, at: Instant) {
        if state.last_rtcp_sent.map_or(true, |last| at > last) {
            state.last_rtcp_sent = Some(at);
        }
    }

    /// Update the remote source with an incoming RTP packet and return its
    /// extended sequence number
    pub fn receive_rtp(&self, packet: &RtpPacket, arrival: Instant) -> u32 {
        self.state.lock().source.receive_packet(
            packet.ssrc,
            packet.sequence_number,
            packet.timestamp,
            arrival,
        )
    }

    /// Record an incoming SR for the sending source's LSR/DLSR fields
    pub fn on_sender_report(&self, report: &RtcpSenderReport, at: Instant) {
        let mut state = self.state.lock();
        if state.source.ssrc().map_or(true, |ssrc| ssrc == report.ssrc) {
            state.source.received_sender_report(report.ntp_timestamp, at);
        }
    }

    /// Attach the CNAME of an SDES chunk to its source
    pub fn on_source_description(&self, chunk: &RtcpSdesChunk) {
        let mut state = self.state.lock();
        if state.source.ssrc().map_or(true, |ssrc| ssrc == chunk.ssrc) {
            if let Some(cname) = chunk.cname() {
                state.source.set_cname(cname);
            }
        }
    }

    /// Stop counting a source that sent BYE as a sender
    pub fn on_goodbye(&self, ssrc: RtpSsrc) {
        let mut state = self.state.lock();
        if state.source.ssrc() == Some(ssrc) {
            debug!("Remote source {:08x} left the session", ssrc);
            state.source.set_active_sender(false);
        }
    }

    /// Snapshot of the remote source statistics
    pub fn source(&self) -> RtpSource {
        self.state.lock().source.clone()
    }

    /// Reception reports for the next SR or RR
    pub fn reception_reports(&self, now: Instant) -> Vec<RtcpReportBlock> {
        self.state
            .lock()
            .source
            .generate_reception_report(now)
            .into_iter()
            .collect()
    }

    /// Sender info for an SR. The RTP timestamp is offset by a random
    /// amount of at most 255.
    pub fn sender_report(&self) -> RtcpSenderReport {
        let state = self.state.lock();
        let offset: u32 = rand::thread_rng().gen_range(0..=255);

        let mut sr = RtcpSenderReport::new(self.ssrc);
        sr.ntp_timestamp = NtpTimestamp::now();
        sr.rtp_timestamp = state.last_rtp_timestamp.wrapping_add(offset);
        sr.sender_packet_count = state.packet_count as u32;
        sr.sender_octet_count = state.octet_count as u32;
        sr
    }

    /// Whether the next report should be a sender report: we are an active
    /// sender and sent RTP after the last RTCP
    pub fn should_send_sender_report(&self) -> bool {
        let state = self.state.lock();
        state.active_sender
            && match (state.last_rtcp_sent, state.last_rtp_sent) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(rtcp), Some(rtp)) => rtcp < rtp,
            }
    }

    /// Next randomised report interval. Also refreshes `T`.
    pub fn report_interval(&self) -> Duration {
        let t = {
            let mut state = self.state.lock();
            let remote_active = state.source.is_active_sender();
            let members = if state.source.ssrc().is_some() { 2 } else { 1 };
            let params = IntervalParams {
                members,
                senders: state.active_sender as u32 + remote_active as u32,
                rtcp_bandwidth: self.config.session_bandwidth * self.config.rtcp_fraction,
                we_sent: state.active_sender,
                avg_rtcp_size: state.avg_rtcp_size,
                initial: state.initial,
                min_interval: self.config.min_interval,
            };
            state.t = deterministic_interval(&params);
            state.t
        };
        randomize(t)
    }

    /// The deterministic interval `T` from the last computation
    pub fn deterministic_interval(&self) -> Duration {
        self.state.lock().t
    }

    /// Whether `T` has elapsed since the last RTCP packet
    pub fn is_time_to_send(&self, now: Instant) -> bool {
        let state = self.state.lock();
        state.last_rtcp_sent.map_or(true, |last| last + state.t <= now)
    }

    /// Whether both RTP and RTCP have ever been sent
    pub fn has_sent_anything(&self) -> bool {
        let state = self.state.lock();
        state.last_rtp_sent.is_some() && state.last_rtcp_sent.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn session() -> RtcpSession {
        RtcpSession::new(0x1234, RtcpSessionConfig::default().with_cname("me@test"))
    }

    #[test]
    fn test_avg_rtcp_size_ewma() {
        let session = session();
        assert_eq!(session.avg_rtcp_size(), 128.0);

        session.update_avg_rtcp_size(256);
        assert_eq!(session.avg_rtcp_size(), 256.0 / 16.0 + 128.0 * 15.0 / 16.0);
        assert!(session.avg_rtcp_size() > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_rtcp_only_moves_forward() {
        let session = session();
        let early = Instant::now();
        tokio::time::advance(Duration::from_secs(1)).await;
        let late = Instant::now();

        session.mark_rtcp_sent(late);
        session.mark_rtcp_sent(early);
        assert_eq!(session.time_of_last_rtcp_sent(), Some(late));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_report_selection() {
        let session = session();
        assert!(!session.should_send_sender_report());

        session.on_rtp_sent(160, 8000);
        assert!(session.should_send_sender_report());

        tokio::time::advance(Duration::from_millis(10)).await;
        session.on_rtcp_sent(60);
        assert!(!session.should_send_sender_report());

        tokio::time::advance(Duration::from_millis(10)).await;
        session.on_rtp_sent(160, 8160);
        assert!(session.should_send_sender_report());

        let sr = session.sender_report();
        assert_eq!(sr.ssrc, 0x1234);
        assert_eq!(sr.sender_packet_count, 2);
        assert_eq!(sr.sender_octet_count, 320);
        assert!(sr.rtp_timestamp >= 8160 && sr.rtp_timestamp <= 8160 + 255);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_to_send() {
        let session = RtcpSession::new(
            1,
            RtcpSessionConfig::default().with_min_interval(Duration::from_secs(4)),
        );
        assert!(session.is_time_to_send(Instant::now()));

        let _ = session.report_interval();
        // Initial interval is halved
        assert_eq!(session.deterministic_interval(), Duration::from_secs(2));

        session.on_rtcp_sent(40);
        let _ = session.report_interval();
        assert_eq!(session.deterministic_interval(), Duration::from_secs(4));
        assert!(!session.is_time_to_send(Instant::now()));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(session.is_time_to_send(Instant::now()));
    }

    #[test]
    fn test_remote_source_updates() {
        let session = session();
        let packet = RtpPacket::new(0, 7, 0, 0xBEEF, Bytes::from_static(&[0; 4]));
        assert_eq!(session.receive_rtp(&packet, Instant::now()), 7);
        assert!(session.source().is_active_sender());

        session.on_source_description(&RtcpSdesChunk::with_cname(0xBEEF, "peer@test"));
        assert_eq!(session.source().cname(), Some("peer@test"));

        // Goodbye from someone else is ignored
        session.on_goodbye(0x1111);
        assert!(session.source().is_active_sender());

        session.on_goodbye(0xBEEF);
        assert!(!session.source().is_active_sender());
    }

    #[test]
    fn test_bye_flag() {
        let session = session();
        assert!(!session.is_bye_requested());
        session.request_bye();
        assert!(session.is_bye_requested());
    }
}
