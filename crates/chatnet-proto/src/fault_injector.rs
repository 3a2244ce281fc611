//! Synthetic loss and delay applied on the server-side receive path.
//!
//! Mirrors the teacher's plain-data-plus-`Default` style (`RakNetServerConfig`),
//! but the fields are mutated at runtime from the admin surface, so they're held
//! behind atomics rather than copied into each session at construction.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

/// Outcome of evaluating the injector against one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FaultOutcome {
    Pass,
    Drop,
    Delay(Duration),
}

#[derive(Debug, Default)]
pub struct FaultCounters {
    pub dropped: AtomicU64,
    pub delayed: AtomicU64,
}

/// `packet_loss_rate` and `artificial_delay` stored as bit patterns so reads and
/// writes from the admin task never block the receive path.
pub struct FaultInjector {
    loss_rate_bits: AtomicU64,
    delay_millis: AtomicU64,
    counters: FaultCounters,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new(0.0, Duration::ZERO)
    }
}

impl FaultInjector {
    pub fn new(packet_loss_rate: f64, artificial_delay: Duration) -> Self {
        FaultInjector {
            loss_rate_bits: AtomicU64::new(packet_loss_rate.clamp(0.0, 1.0).to_bits()),
            delay_millis: AtomicU64::new(artificial_delay.as_millis() as u64),
            counters: FaultCounters::default(),
        }
    }

    pub fn packet_loss_rate(&self) -> f64 {
        f64::from_bits(self.loss_rate_bits.load(Ordering::Relaxed))
    }

    pub fn artificial_delay(&self) -> Duration {
        Duration::from_millis(self.delay_millis.load(Ordering::Relaxed))
    }

    pub fn set_packet_loss_rate(&self, rate: f64) {
        self.loss_rate_bits
            .store(rate.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_artificial_delay(&self, delay: Duration) {
        self.delay_millis
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn dropped_count(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn delayed_count(&self) -> u64 {
        self.counters.delayed.load(Ordering::Relaxed)
    }

    /// Evaluates the injector against a single frame. Both parameters are read
    /// as one atomic snapshot each, so a concurrent admin mutation can only ever
    /// land before or after this call, never in the middle of it.
    pub fn evaluate(&self) -> FaultOutcome {
        let loss_rate = self.packet_loss_rate();
        if loss_rate > 0.0 && rand::rng().random_bool(loss_rate) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return FaultOutcome::Drop;
        }
        let delay = self.artificial_delay();
        if delay > Duration::ZERO {
            self.counters.delayed.fetch_add(1, Ordering::Relaxed);
            return FaultOutcome::Delay(delay);
        }
        FaultOutcome::Pass
    }

    /// Applies this frame's outcome, returning `false` if the frame should be dropped.
    pub async fn apply(&self) -> bool {
        match self.evaluate() {
            FaultOutcome::Pass => true,
            FaultOutcome::Drop => false,
            FaultOutcome::Delay(d) => {
                sleep(d).await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_loss_and_zero_delay_always_passes() {
        let injector = FaultInjector::default();
        for _ in 0..50 {
            assert_eq!(injector.evaluate(), FaultOutcome::Pass);
        }
    }

    #[test]
    fn full_loss_always_drops() {
        let injector = FaultInjector::new(1.0, Duration::ZERO);
        assert_eq!(injector.evaluate(), FaultOutcome::Drop);
        assert_eq!(injector.dropped_count(), 1);
    }

    #[test]
    fn mutating_delay_is_visible_immediately() {
        let injector = FaultInjector::default();
        injector.set_artificial_delay(Duration::from_millis(25));
        assert_eq!(injector.artificial_delay(), Duration::from_millis(25));
    }
}
