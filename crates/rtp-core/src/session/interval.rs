//! RTCP transmission interval (RFC 3550 §6.3.1 and A.7)

use std::time::Duration;

use rand::Rng;

/// Compensation for the randomisation, e - 3/2
const COMPENSATION: f64 = std::f64::consts::E - 1.5;

/// Share of the RTCP bandwidth reserved for senders
const SENDER_FRACTION: f64 = 0.25;

/// Inputs of the interval computation
#[derive(Debug, Clone, Copy)]
pub struct IntervalParams {
    /// Session members, including ourselves
    pub members: u32,
    /// Members that sent RTP recently
    pub senders: u32,
    /// Bandwidth available to RTCP, in octets per second
    pub rtcp_bandwidth: f64,
    /// Whether we sent RTP since the last report
    pub we_sent: bool,
    /// Average compound packet size, in octets
    pub avg_rtcp_size: f64,
    /// No report has been sent yet
    pub initial: bool,
    /// Lower bound on the interval
    pub min_interval: Duration,
}

/// The deterministic interval `T` before randomisation
pub fn deterministic_interval(params: &IntervalParams) -> Duration {
    let mut min = params.min_interval.as_secs_f64();
    if params.initial {
        min /= 2.0;
    }

    let mut n = params.members.max(1) as f64;
    let mut bandwidth = params.rtcp_bandwidth;
    if (params.senders as f64) <= params.members as f64 * SENDER_FRACTION {
        if params.we_sent {
            bandwidth *= SENDER_FRACTION;
            n = params.senders.max(1) as f64;
        } else {
            bandwidth *= 1.0 - SENDER_FRACTION;
            n -= params.senders as f64;
        }
    }

    let t = if bandwidth > 0.0 {
        params.avg_rtcp_size * n / bandwidth
    } else {
        min
    };

    Duration::from_secs_f64(t.max(min))
}

/// Spread `t` uniformly over `[0.5, 1.5] * t`, scaled by `1 / (e - 3/2)`
pub fn randomize(t: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(t.as_secs_f64() * factor / COMPENSATION)
}
