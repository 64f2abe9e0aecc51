use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900) and the UNIX epoch (1970)
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// 64-bit NTP timestamp as carried in sender reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct NtpTimestamp {
    /// Seconds since January 1, 1900
    pub seconds: u32,

    /// Fraction of a second in 1/2^32 units
    pub fraction: u32,
}

impl NtpTimestamp {
    /// Current wallclock time
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Self::from_duration_since_unix_epoch(since_epoch)
    }

    pub fn to_u64(&self) -> u64 {
        (self.seconds as u64) << 32 | self.fraction as u64
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }

    /// Middle 32 bits, the form echoed back in the LSR field of report
    /// blocks (RFC 3550 §6.4.1)
    pub fn middle_32(&self) -> u32 {
        (self.seconds & 0x0000_FFFF) << 16 | self.fraction >> 16
    }

    pub fn from_duration_since_unix_epoch(duration: Duration) -> Self {
        let seconds = duration.as_secs() + NTP_UNIX_OFFSET;
        let fraction = ((duration.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Self {
            seconds: seconds as u32,
            fraction: fraction as u32,
        }
    }

    /// Time since the UNIX epoch, saturating at zero for earlier stamps
    pub fn to_duration_since_unix_epoch(&self) -> Duration {
        let seconds = (self.seconds as u64).saturating_sub(NTP_UNIX_OFFSET);
        let nanos = ((self.fraction as u64) * 1_000_000_000) >> 32;
        Duration::new(seconds, nanos as u32)
    }
}

/// Convert a duration into the 1/65536 second units used by the DLSR field
pub fn duration_to_dlsr(delay: Duration) -> u32 {
    let units = delay.as_secs() * 65536 + ((delay.subsec_nanos() as u64) << 16) / 1_000_000_000;
    units.min(u32::MAX as u64) as u32
}
