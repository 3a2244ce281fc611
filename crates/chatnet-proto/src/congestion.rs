//! Reno-style congestion controller.
//!
//! One instance lives per destination, owned by that destination's send pipeline.
//! It is a pure state machine: ack and timeout events go in, an updated `cwnd`/`rto`
//! come out. RTT bookkeeping follows the Jacobson/Karels estimator, the same shape
//! as the teacher's `SendWindow` RTT fields, but the window itself is re-specified
//! as an exact discrete Reno machine rather than a byte-count approximation.

use std::collections::VecDeque;
use std::time::Duration;
use log::trace;

pub const CONGESTION_WINDOW_INITIAL: f64 = 1.0;
pub const SLOW_START_THRESHOLD: f64 = 64.0;
const MIN_RTO: Duration = Duration::from_secs(1);
const MAX_RTO: Duration = Duration::from_secs(60);
const INITIAL_RTO: Duration = Duration::from_secs(5);
const RTT_SAMPLE_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionState {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

/// A point-in-time read of one peer's flow state, published by the owning
/// send task for external readers (the admin surface) that must never touch
/// the controller directly.
#[derive(Debug, Clone, Default)]
pub struct ControllerSnapshot {
    pub cwnd: f64,
    pub ssthresh: f64,
    pub state: Option<CongestionState>,
    pub rto_secs: f64,
    pub pending_messages: usize,
}

#[derive(Debug)]
pub struct CongestionController {
    cwnd: f64,
    ssthresh: f64,
    state: CongestionState,
    dup_ack_count: u32,
    last_ack_sequence: Option<u64>,
    srtt: Option<Duration>,
    rttvar: Option<Duration>,
    rto: Duration,
    rtt_samples: VecDeque<Duration>,
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionController {
    pub fn new() -> Self {
        Self::with_initial_rto(INITIAL_RTO)
    }

    /// Same as [`Self::new`] but seeded with a caller-supplied starting RTO,
    /// e.g. from the configured ack timeout, instead of the built-in default.
    pub fn with_initial_rto(initial_rto: Duration) -> Self {
        Self {
            cwnd: CONGESTION_WINDOW_INITIAL,
            ssthresh: SLOW_START_THRESHOLD,
            state: CongestionState::SlowStart,
            dup_ack_count: 0,
            last_ack_sequence: None,
            srtt: None,
            rttvar: None,
            rto: initial_rto.clamp(MIN_RTO, MAX_RTO),
            rtt_samples: VecDeque::with_capacity(RTT_SAMPLE_CAP),
        }
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    pub fn state(&self) -> CongestionState {
        self.state
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Number of messages the send pipeline may currently have in flight.
    pub fn window_budget(&self, in_flight: usize) -> usize {
        (self.cwnd.floor() as i64 - in_flight as i64).max(0) as usize
    }

    /// Feeds an ack event `(ack_seq, measured_rtt)` into the state machine.
    ///
    /// `measured_rtt` is `None` for retransmitted messages (Karn's rule: their RTT
    /// samples must not perturb the estimator even though the ack itself still
    /// drives the window).
    pub fn on_ack(&mut self, ack_seq: u64, measured_rtt: Option<Duration>) {
        if let Some(rtt) = measured_rtt {
            self.update_rtt(rtt);
        }

        let is_new_ack = match self.last_ack_sequence {
            None => true,
            Some(last) => ack_seq > last,
        };

        if is_new_ack {
            self.dup_ack_count = 0;
            self.last_ack_sequence = Some(ack_seq);
            match self.state {
                CongestionState::SlowStart => {
                    self.cwnd += 1.0;
                    if self.cwnd >= self.ssthresh {
                        self.state = CongestionState::CongestionAvoidance;
                    }
                }
                CongestionState::CongestionAvoidance => {
                    self.cwnd += 1.0 / self.cwnd;
                }
                CongestionState::FastRecovery => {
                    self.cwnd = self.ssthresh;
                    self.state = CongestionState::CongestionAvoidance;
                }
            }
            trace!(
                "new ack seq={} state={:?} cwnd={:.3} ssthresh={:.3}",
                ack_seq, self.state, self.cwnd, self.ssthresh
            );
        } else {
            self.dup_ack_count += 1;
            if self.dup_ack_count == 3 {
                self.ssthresh = (self.cwnd / 2.0).max(2.0);
                self.cwnd = self.ssthresh + 3.0;
                self.state = CongestionState::FastRecovery;
                trace!(
                    "fast retransmit seq={} ssthresh={:.3} cwnd={:.3}",
                    ack_seq, self.ssthresh, self.cwnd
                );
            } else if self.dup_ack_count > 3 && self.state == CongestionState::FastRecovery {
                self.cwnd += 1.0;
            }
        }
    }

    /// Feeds a retransmission-timeout event into the state machine.
    pub fn on_timeout(&mut self) {
        self.ssthresh = (self.cwnd / 2.0).max(2.0);
        self.cwnd = 1.0;
        self.dup_ack_count = 0;
        self.state = CongestionState::SlowStart;
        self.rto = (self.rto * 2).min(MAX_RTO);
        trace!(
            "timeout ssthresh={:.3} cwnd={:.3} rto={:?}",
            self.ssthresh, self.cwnd, self.rto
        );
    }

    fn update_rtt(&mut self, rtt: Duration) {
        if self.rtt_samples.len() == RTT_SAMPLE_CAP {
            self.rtt_samples.pop_front();
        }
        self.rtt_samples.push_back(rtt);

        match (self.srtt, self.rttvar) {
            (None, _) | (_, None) => {
                self.srtt = Some(rtt);
                self.rttvar = Some(rtt / 2);
            }
            (Some(srtt), Some(rttvar)) => {
                let srtt_f = srtt.as_secs_f64();
                let rttvar_f = rttvar.as_secs_f64();
                let rtt_f = rtt.as_secs_f64();
                let new_rttvar = 0.75 * rttvar_f + 0.25 * (srtt_f - rtt_f).abs();
                let new_srtt = 0.875 * srtt_f + 0.125 * rtt_f;
                self.rttvar = Some(Duration::from_secs_f64(new_rttvar));
                self.srtt = Some(Duration::from_secs_f64(new_srtt));
            }
        }

        let srtt = self.srtt.unwrap();
        let rttvar = self.rttvar.unwrap();
        let candidate = srtt + rttvar * 4;
        self.rto = candidate.clamp(MIN_RTO, MAX_RTO);
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    pub fn rttvar(&self) -> Option<Duration> {
        self.rttvar
    }

    pub fn snapshot(&self, pending_messages: usize) -> ControllerSnapshot {
        ControllerSnapshot {
            cwnd: self.cwnd,
            ssthresh: self.ssthresh,
            state: Some(self.state),
            rto_secs: self.rto.as_secs_f64(),
            pending_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_start_grows_cwnd_by_one_per_new_ack() {
        let mut c = CongestionController::new();
        for seq in 1..=5u64 {
            c.on_ack(seq, Some(Duration::from_millis(50)));
        }
        assert_eq!(c.state(), CongestionState::SlowStart);
        assert_eq!(c.cwnd(), 1.0 + 5.0);
    }

    #[test]
    fn crossing_ssthresh_enters_congestion_avoidance() {
        let mut c = CongestionController::new();
        for seq in 1..=((SLOW_START_THRESHOLD as u64) + 2) {
            c.on_ack(seq, Some(Duration::from_millis(10)));
        }
        assert_eq!(c.state(), CongestionState::CongestionAvoidance);
    }

    #[test]
    fn exactly_three_dup_acks_trigger_fast_retransmit() {
        let mut c = CongestionController::new();
        c.on_ack(1, Some(Duration::from_millis(10)));
        c.on_ack(2, Some(Duration::from_millis(10)));
        // two dup acks: not yet
        c.on_ack(2, None);
        c.on_ack(2, None);
        assert_eq!(c.state(), CongestionState::SlowStart);
        // third dup ack: now
        c.on_ack(2, None);
        assert_eq!(c.state(), CongestionState::FastRecovery);
    }

    #[test]
    fn fast_recovery_inflates_cwnd_on_further_dup_acks() {
        let mut c = CongestionController::new();
        c.on_ack(1, Some(Duration::from_millis(10)));
        for _ in 0..3 {
            c.on_ack(1, None);
        }
        let cwnd_after_retransmit = c.cwnd();
        c.on_ack(1, None);
        assert_eq!(c.cwnd(), cwnd_after_retransmit + 1.0);
    }

    #[test]
    fn new_ack_after_fast_recovery_resets_to_ssthresh() {
        let mut c = CongestionController::new();
        c.on_ack(1, Some(Duration::from_millis(10)));
        for _ in 0..3 {
            c.on_ack(1, None);
        }
        let ssthresh = c.ssthresh();
        c.on_ack(2, Some(Duration::from_millis(10)));
        assert_eq!(c.cwnd(), ssthresh);
        assert_eq!(c.state(), CongestionState::CongestionAvoidance);
    }

    #[test]
    fn timeout_halves_ssthresh_and_resets_cwnd() {
        let mut c = CongestionController::new();
        for seq in 1..=10u64 {
            c.on_ack(seq, Some(Duration::from_millis(10)));
        }
        let cwnd_before = c.cwnd();
        c.on_timeout();
        assert_eq!(c.ssthresh(), (cwnd_before / 2.0).max(2.0));
        assert_eq!(c.cwnd(), 1.0);
        assert_eq!(c.state(), CongestionState::SlowStart);
    }

    #[test]
    fn timeout_doubles_rto_up_to_a_ceiling() {
        let mut c = CongestionController::new();
        let initial = c.rto();
        for _ in 0..20 {
            c.on_timeout();
        }
        assert_eq!(c.rto(), Duration::from_secs(60));
        assert!(c.rto() >= initial);
    }

    #[test]
    fn karns_rule_ignores_retransmitted_rtt_samples() {
        let mut c = CongestionController::new();
        c.on_ack(1, Some(Duration::from_millis(100)));
        let srtt_before = c.srtt().unwrap();
        // Retransmitted message's ack carries no RTT sample.
        c.on_ack(2, None);
        assert_eq!(c.srtt().unwrap(), srtt_before);
    }
}
