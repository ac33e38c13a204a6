use std::sync::atomic::{AtomicU64, Ordering};

// 2^64 / golden ratio, odd, so `n * GOLDEN` walks every residue mod 2^64 exactly once.
const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;

/// Counter-based sampling decision.
///
/// Each decision bumps a shared counter and scatters it with a multiplicative hash; the request
/// is sampled when the hash falls below a threshold proportional to the rate. Over any long run
/// the sampled fraction converges to the rate without a random number generator on the hot path.
///
/// The sequence is fully deterministic. Never use it where unpredictability matters.
#[derive(Debug)]
pub struct Sampler {
    rate: f64,
    threshold: u64,
    counter: AtomicU64,
}

impl Sampler {
    /// Create a sampler for `rate`, clamped into `[0.0, 1.0]`. NaN samples nothing.
    pub fn new(rate: f64) -> Self {
        let rate = if rate.is_nan() {
            0.0
        } else {
            rate.clamp(0.0, 1.0)
        };

        let threshold = if rate <= 0.0 {
            0
        } else if rate >= 1.0 {
            u64::MAX
        } else {
            // float to int casts saturate
            (rate * u64::MAX as f64) as u64
        };

        Self {
            rate,
            threshold,
            counter: AtomicU64::new(0),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn should_sample(&self) -> bool {
        if self.rate >= 1.0 {
            return true;
        }
        if self.rate <= 0.0 {
            return false;
        }

        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        n.wrapping_mul(GOLDEN) <= self.threshold
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new(1.0)
    }
}
