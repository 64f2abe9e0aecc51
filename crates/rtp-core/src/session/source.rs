use tokio::time::Instant;

use crate::packet::rtcp::{duration_to_dlsr, NtpTimestamp, RtcpReportBlock};
use crate::time::RtpClock;
use crate::{RtpSequenceNumber, RtpSsrc, RtpTimestamp};

const RTP_SEQ_MOD: u32 = 1 << 16;
const MAX_DROPOUT: u16 = 3000;
const MAX_MISORDER: u16 = 100;
const MIN_SEQUENTIAL: u32 = 2;

/// Reception statistics for the remote source of a session
/// (RFC 3550 A.1, A.3 and A.8)
#[derive(Debug, Clone)]
pub struct RtpSource {
    ssrc: Option<RtpSsrc>,
    cname: Option<String>,
    clock: RtpClock,

    /// Set once RTP has been received, cleared on BYE
    active_sender: bool,

    initialized: bool,
    max_seq: u16,
    cycles: u32,
    base_seq: u32,
    bad_seq: u32,
    probation: u32,
    received: u32,
    expected_prior: u32,
    received_prior: u32,

    transit: Option<i32>,
    jitter: f64,

    last_sr: Option<(u32, Instant)>,
}

impl RtpSource {
    /// Untracked source using `clock_rate` for jitter
    pub fn new(clock_rate: u32) -> Self {
        Self {
            ssrc: None,
            cname: None,
            clock: RtpClock::new(clock_rate),
            active_sender: false,
            initialized: false,
            max_seq: 0,
            cycles: 0,
            base_seq: 0,
            bad_seq: RTP_SEQ_MOD + 1,
            probation: 0,
            received: 0,
            expected_prior: 0,
            received_prior: 0,
            transit: None,
            jitter: 0.0,
            last_sr: None,
        }
    }

    /// SSRC of the first packet seen, if any
    pub fn ssrc(&self) -> Option<RtpSsrc> {
        self.ssrc
    }

    pub fn cname(&self) -> Option<&str> {
        self.cname.as_deref()
    }

    pub fn set_cname(&mut self, cname: impl Into<String>) {
        self.cname = Some(cname.into());
    }

    /// Whether this source counts as a sender for the report interval
    pub fn is_active_sender(&self) -> bool {
        self.active_sender
    }

    pub fn set_active_sender(&mut self, active: bool) {
        self.active_sender = active;
    }

    /// Packets counted as valid since the source was validated
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Interarrival jitter in timestamp units
    pub fn jitter(&self) -> u32 {
        self.jitter as u32
    }

    /// Highest sequence number seen, extended with the cycle count
    pub fn extended_highest_seq(&self) -> u32 {
        self.cycles + self.max_seq as u32
    }

    /// Account for an incoming RTP packet.
    ///
    /// Returns the extended sequence number of the packet. A change of
    /// SSRC restarts the statistics.
    pub fn receive_packet(
        &mut self,
        ssrc: RtpSsrc,
        seq: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        arrival: Instant,
    ) -> u32 {
        if self.ssrc != Some(ssrc) {
            let clock_rate = self.clock.clock_rate();
            let cname = self.cname.take();
            *self = Self::new(clock_rate);
            self.ssrc = Some(ssrc);
            self.cname = cname;
        }
        self.active_sender = true;

        if !self.initialized {
            self.init_seq(seq);
            self.max_seq = seq.wrapping_sub(1);
            self.probation = MIN_SEQUENTIAL;
            self.initialized = true;
        }
        self.update_seq(seq);
        self.update_jitter(timestamp, arrival);

        self.extended_seq(seq)
    }

    fn init_seq(&mut self, seq: u16) {
        self.base_seq = seq as u32;
        self.max_seq = seq;
        self.bad_seq = RTP_SEQ_MOD + 1;
        self.cycles = 0;
        self.received = 0;
        self.received_prior = 0;
        self.expected_prior = 0;
    }

    fn update_seq(&mut self, seq: u16) -> bool {
        let udelta = seq.wrapping_sub(self.max_seq);

        if self.probation > 0 {
            if seq == self.max_seq.wrapping_add(1) {
                self.probation -= 1;
                self.max_seq = seq;
                if self.probation == 0 {
                    self.init_seq(seq);
                    self.received += 1;
                    return true;
                }
            } else {
                self.probation = MIN_SEQUENTIAL - 1;
                self.max_seq = seq;
            }
            return false;
        }

        if udelta < MAX_DROPOUT {
            if seq < self.max_seq {
                self.cycles += RTP_SEQ_MOD;
            }
            self.max_seq = seq;
        } else if udelta as u32 <= RTP_SEQ_MOD - MAX_MISORDER as u32 {
            // Large jump: restart if the next packet follows on
            if seq as u32 == self.bad_seq {
                self.init_seq(seq);
            } else {
                self.bad_seq = (seq as u32 + 1) & (RTP_SEQ_MOD - 1);
                return false;
            }
        }
        // Otherwise a duplicate or reordered packet

        self.received += 1;
        true
    }

    fn extended_seq(&self, seq: u16) -> u32 {
        let ext = self.cycles + seq as u32;
        // A late packet from before the last wrap belongs to the previous cycle
        if seq > self.max_seq && seq - self.max_seq > 0x8000 && self.cycles >= RTP_SEQ_MOD {
            ext - RTP_SEQ_MOD
        } else {
            ext
        }
    }

    fn update_jitter(&mut self, timestamp: RtpTimestamp, arrival: Instant) {
        let transit = self.clock.units_at(arrival).wrapping_sub(timestamp) as i32;
        if let Some(previous) = self.transit {
            let d = transit.wrapping_sub(previous).unsigned_abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.transit = Some(transit);
    }

    /// Remember a sender report from this source for LSR/DLSR
    pub fn received_sender_report(&mut self, ntp: NtpTimestamp, at: Instant) {
        self.last_sr = Some((ntp.middle_32(), at));
    }

    /// Build a reception report, advancing the interval counters.
    ///
    /// Returns `None` until a packet has been received from a known SSRC.
    pub fn generate_reception_report(&mut self, now: Instant) -> Option<RtcpReportBlock> {
        let ssrc = self.ssrc?;
        if !self.initialized {
            return None;
        }

        let extended_max = self.extended_highest_seq();
        let expected = extended_max.wrapping_sub(self.base_seq).wrapping_add(1);
        let lost = expected as i64 - self.received as i64;

        let expected_interval = expected.wrapping_sub(self.expected_prior);
        self.expected_prior = expected;
        let received_interval = self.received.wrapping_sub(self.received_prior);
        self.received_prior = self.received;
        let lost_interval = expected_interval as i64 - received_interval as i64;

        let fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval as i64).min(255) as u8
        };

        let (last_sr, delay_since_last_sr) = match self.last_sr {
            Some((lsr, at)) => (lsr, duration_to_dlsr(now.saturating_duration_since(at))),
            None => (0, 0),
        };

        Some(RtcpReportBlock {
            ssrc,
            fraction_lost,
            cumulative_lost: RtcpReportBlock::encode_cumulative_lost(lost),
            highest_seq: extended_max,
            jitter: self.jitter(),
            last_sr,
            delay_since_last_sr,
        })
    }
}
