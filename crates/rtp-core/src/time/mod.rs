//! RTP media clock helpers

use std::time::Duration;
use tokio::time::Instant;

/// Common RTP clock rates
pub mod clock_rates {
    /// Narrowband audio (G.711, AMR-NB)
    pub const AUDIO_8KHZ: u32 = 8000;

    /// Wideband audio (AMR-WB, G.722)
    pub const AUDIO_16KHZ: u32 = 16000;

    /// Video payloads (H.263, H.264)
    pub const VIDEO_90KHZ: u32 = 90000;
}

/// Convert an RTP timestamp span into wallclock time
pub fn rtp_timestamp_to_duration(timestamp: u32, clock_rate: u32) -> Duration {
    if clock_rate == 0 {
        return Duration::ZERO;
    }

    let seconds = timestamp / clock_rate;
    let remainder = timestamp % clock_rate;
    let nanos = ((remainder as u64) * 1_000_000_000) / (clock_rate as u64);

    Duration::new(seconds as u64, nanos as u32)
}

/// Convert wallclock time into RTP timestamp units, wrapping at 2^32
pub fn duration_to_rtp_timestamp(duration: Duration, clock_rate: u32) -> u32 {
    let whole = duration.as_secs() * clock_rate as u64;
    let fraction = (duration.subsec_nanos() as u64 * clock_rate as u64) / 1_000_000_000;
    (whole + fraction) as u32
}

/// Signed distance from `b` to `a` in timestamp space
pub fn rtp_timestamp_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Maps local arrival instants onto an RTP clock, for jitter estimation
#[derive(Debug, Clone, Copy)]
pub struct RtpClock {
    origin: Instant,
    clock_rate: u32,
}

impl RtpClock {
    pub fn new(clock_rate: u32) -> Self {
        Self {
            origin: Instant::now(),
            clock_rate,
        }
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    /// RTP units elapsed between the clock origin and `at`
    pub fn units_at(&self, at: Instant) -> u32 {
        duration_to_rtp_timestamp(at.saturating_duration_since(self.origin), self.clock_rate)
    }

    pub fn now(&self) -> u32 {
        self.units_at(Instant::now())
    }
}
