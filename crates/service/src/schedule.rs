use std::{
    sync::LazyLock,
    time::Instant,
};

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Per-server retransmission policy.
///
/// The defaults follow the recommendations of RFC 5080 Section 2.2.1
/// for RADIUS retransmission behavior: an initial interval of two
/// seconds doubling up to sixteen, bounded by a thirty second overall
/// budget and five tries per server.  `None` leaves the corresponding
/// bound open.
#[derive(Debug, Clone, Copy)]
pub struct RetransmitPolicy {
    /// Initial interval, milliseconds.
    pub time_init: u64,
    /// Per-try ceiling on the interval, milliseconds.
    pub time_max: Option<u64>,
    /// Aggregate budget across tries, milliseconds.
    pub duration_max: Option<u64>,
    /// Ceiling on the number of tries.
    pub count_max: Option<u32>,
}

impl Default for RetransmitPolicy {
    fn default() -> Self {
        Self {
            time_init: 2000,
            time_max: Some(16000),
            duration_max: Some(30000),
            count_max: Some(5),
        }
    }
}

/// Retransmission state of one query against one server.
///
/// RFC 2865 Section 9 asks for retransmission intervals that double
/// from an initial value, randomized to keep fleets of clients from
/// firing in lockstep, and bounded by per-try and aggregate budgets.
/// `advance` is called on every timer expiry and either yields the
/// next interval or gives up on the server, in which case the caller
/// fails over.
#[derive(Debug)]
pub struct Schedule {
    policy: RetransmitPolicy,
    count: u32,
    time: u64,
    duration: u64,
}

impl Schedule {
    pub fn new(policy: RetransmitPolicy) -> Self {
        Self {
            policy,
            count: 0,
            duration: 0,
            time: sub_jitter(policy.time_init),
        }
    }

    /// The interval to arm for the first transmission.
    pub fn first(&self) -> u64 {
        self.time
    }

    /// Tries burned against the current server so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Account for an expired interval and compute the next one.
    ///
    /// Returns `None` when this server's budget is exhausted: the try
    /// ceiling is reached, the aggregate budget is spent, or the
    /// remaining budget is smaller than the initial interval.
    pub fn advance(&mut self) -> Option<u64> {
        self.count += 1;
        self.duration += self.time;

        if let Some(max) = self.policy.count_max {
            if self.count >= max {
                return None;
            }
        }

        if let Some(max) = self.policy.duration_max {
            if self.duration >= max {
                return None;
            }
        }

        let nominal = match self.policy.time_max {
            Some(max) if self.time.saturating_mul(2) > max => max,
            _ => self.time.saturating_mul(2),
        };

        let mut next = sub_jitter(nominal);
        if let Some(max) = self.policy.duration_max {
            let remaining = max - self.duration;
            if next > remaining {
                next = remaining;
                if next < self.policy.time_init {
                    return None;
                }
            }
        }

        self.time = next;
        Some(next)
    }
}

/// Randomized offset for a retransmission interval.
///
/// Not a PRNG: a monotonic timestamp is folded with the input through
/// CRC-32 into a single octet, whose low seven bits pick a divisor for
/// the magnitude and whose high bit picks the sign.  The contract is
/// statistical only: the offset never exceeds the input in magnitude
/// and its sign is unbiased over many draws.
pub fn jitter(input: u64) -> i64 {
    let ts = EPOCH.elapsed().as_nanos() as u64;

    let folded = crc32fast::hash(&ts.to_be_bytes()) ^ crc32fast::hash(&input.to_be_bytes());
    let byte = folded.to_be_bytes().iter().fold(0u8, |acc, b| acc ^ b);

    let divisor = match byte & 0x7f {
        0 => 1,
        k => k,
    };

    let magnitude = (input / divisor as u64) as i64;
    if byte & 0x80 != 0 { -magnitude } else { magnitude }
}

/// Apply jitter below a nominal interval, clamped to stay positive.
fn sub_jitter(nominal: u64) -> u64 {
    let offset = jitter(nominal);
    let interval = if offset >= 0 {
        nominal - (offset as u64).min(nominal)
    } else {
        nominal.saturating_add(offset.unsigned_abs())
    };

    interval.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_magnitude_is_bounded_by_the_input() {
        for input in [1u64, 2, 100, 2000, 16000, 1 << 40] {
            for _ in 0..1000 {
                let offset = jitter(input);
                assert!(offset.unsigned_abs() <= input);
            }
        }
    }

    #[test]
    fn jitter_takes_both_signs() {
        let mut negative = 0usize;
        let mut positive = 0usize;

        for _ in 0..10000 {
            match jitter(2000) {
                offset if offset < 0 => negative += 1,
                _ => positive += 1,
            }
        }

        assert!(negative > 0);
        assert!(positive > 0);
    }

    #[test]
    fn zero_input_stays_zero() {
        assert_eq!(jitter(0), 0);
    }

    #[test]
    fn try_ceiling_gives_up() {
        let mut schedule = Schedule::new(RetransmitPolicy {
            time_init: 100,
            time_max: Some(1000),
            duration_max: None,
            count_max: Some(3),
        });

        assert!(schedule.advance().is_some());
        assert!(schedule.advance().is_some());
        assert!(schedule.advance().is_none());
        assert_eq!(schedule.count(), 3);
    }

    #[test]
    fn intervals_stay_under_twice_the_ceiling() {
        let mut schedule = Schedule::new(RetransmitPolicy {
            time_init: 100,
            time_max: Some(1000),
            duration_max: None,
            count_max: Some(64),
        });

        assert!(schedule.first() <= 200);
        while let Some(interval) = schedule.advance() {
            assert!(interval <= 2000);
        }
    }

    #[test]
    fn aggregate_budget_gives_up() {
        let mut schedule = Schedule::new(RetransmitPolicy {
            time_init: 100,
            time_max: None,
            duration_max: Some(500),
            count_max: None,
        });

        let mut spent = schedule.first();
        let mut tries = 1;
        while let Some(interval) = schedule.advance() {
            spent += interval;
            tries += 1;
            assert!(tries < 64, "schedule failed to converge");
        }

        assert!(spent <= 500 + 200, "spent {spent}ms against a 500ms budget");
    }
}
