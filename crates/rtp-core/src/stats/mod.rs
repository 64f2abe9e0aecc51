//! Packet counters kept by the transports
//!
//! Counters are updated by a single background task and read through
//! snapshots, so plain structs behind a lock are sufficient.

/// Counters of an RTP receiver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpReceiverStats {
    /// Packets decoded and handed to the reader
    pub packets: u64,
    /// Bytes of decoded packets
    pub bytes: u64,
    /// Datagrams rejected as stale or undecodable
    pub bad_packets: u64,
}

/// Counters of an RTP or RTCP transmitter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitterStats {
    pub packets: u64,
    pub bytes: u64,
}

impl TransmitterStats {
    pub fn record(&mut self, bytes: usize) {
        self.packets += 1;
        self.bytes += bytes as u64;
    }
}

/// Counters of an RTCP receiver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcpReceiverStats {
    /// Compound datagrams received
    pub packets: u64,
    /// Bytes received
    pub bytes: u64,
    /// Datagrams with a wrong version
    pub bad_packets: u64,
    /// Valid sender reports
    pub sr_packets: u64,
    /// Datagrams rejected by validation
    pub malformed_packets: u64,
    /// Datagrams carrying a packet type outside 200..=204
    pub unknown_types: u64,
}

/// Whether sequence number `a` precedes `b`, accounting for wraparound
pub fn is_sequence_older(a: u16, b: u16) -> bool {
    a != b && b.wrapping_sub(a) < 0x8000
}

/// How far `seq` lies behind `last`, negative when it is ahead
pub fn sequence_lag(last: u16, seq: u16) -> i16 {
    last.wrapping_sub(seq) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(is_sequence_older(1, 2));
        assert!(!is_sequence_older(2, 1));
        assert!(!is_sequence_older(7, 7));

        // Wraparound
        assert!(is_sequence_older(65535, 0));
        assert!(!is_sequence_older(0, 65535));
    }

    #[test]
    fn test_sequence_lag() {
        assert_eq!(sequence_lag(100, 85), 15);
        assert_eq!(sequence_lag(100, 101), -1);
        assert_eq!(sequence_lag(3, 65533), 6);
    }

    #[test]
    fn test_transmitter_record() {
        let mut stats = TransmitterStats::default();
        stats.record(100);
        stats.record(20);
        assert_eq!(stats, TransmitterStats { packets: 2, bytes: 120 });
    }
}
