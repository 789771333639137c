//! Rolling-window throughput estimator.
//!
//! Instantaneous rates are noisy: chunk arrival is bursty and stalls are
//! common. The estimator keeps a bounded ring of `(timestamp, rate)`
//! samples and averages only those inside a trailing wall-clock window,
//! so neither a burst of tiny chunks nor a long stall dominates the
//! displayed speed.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Ring capacity; roughly 10 seconds of samples at the worker's emit
/// cadence, evicted oldest-first.
const SAMPLE_CAPACITY: usize = 50;

/// Samples older than this are ignored when averaging.
const SMOOTHING_WINDOW: Duration = Duration::from_secs(5);

/// Intervals shorter than this produce no sample; guards the rate
/// division against near-zero elapsed time.
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct SpeedEstimator {
    samples: VecDeque<(Instant, f64)>,
    last_time: Instant,
    last_bytes: u64,
}

impl SpeedEstimator {
    pub fn new(now: Instant, start_bytes: u64) -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_CAPACITY),
            last_time: now,
            last_bytes: start_bytes,
        }
    }

    /// Records the byte count observed at `now` and returns the smoothed
    /// rate in bytes per second.
    pub fn sample(&mut self, now: Instant, downloaded: u64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_time);
        if elapsed < MIN_SAMPLE_INTERVAL {
            return self.average(now);
        }
        let delta = downloaded.saturating_sub(self.last_bytes) as f64;
        let rate = delta / elapsed.as_secs_f64();

        if self.samples.len() == SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back((now, rate));
        self.last_time = now;
        self.last_bytes = downloaded;
        self.average(now)
    }

    fn average(&self, now: Instant) -> f64 {
        let mut sum = 0.0;
        let mut count = 0u32;
        for (at, rate) in &self.samples {
            if now.saturating_duration_since(*at) <= SMOOTHING_WINDOW {
                sum += rate;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Seconds remaining at the given rate, or `None` when the total is
    /// unknown or nothing is flowing. Never negative, never a division
    /// by zero.
    pub fn eta(speed_bps: f64, total_size: Option<u64>, downloaded: u64) -> Option<f64> {
        let total = total_size?;
        if speed_bps <= 0.0 {
            return None;
        }
        Some(total.saturating_sub(downloaded) as f64 / speed_bps)
    }
}
