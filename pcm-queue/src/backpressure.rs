//! Admission control for submitted frames
//!
//! The controller only looks at the backlog the device reported for this
//! submission. It never adds the incoming frame length to that backlog, so a
//! frame is admitted whenever the queue is at or below the threshold, even if
//! admitting it lands above.

use serde::{Deserialize, Serialize};

/// What happens to new data once the backlog is over the threshold.
///
/// Fixed for the lifetime of a [`StreamManager`](crate::StreamManager).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Discard the incoming frame and let the queue drain at hardware rate.
    /// No pop, but the frame is lost.
    #[default]
    DropIncoming,
    /// Flush the backlog, then queue the frame. Latency drops immediately
    /// at the cost of an audible discontinuity.
    ClearThenEnqueue,
    /// No admission ceiling. Always queue; if the device rejects the frame,
    /// clear once and retry once.
    RetryAfterClearOnFailure,
}

/// Decision for one submitted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Admit,
    Drop,
    ClearThenAdmit,
}

/// Threshold + policy. No other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressureController {
    threshold: u32,
    policy: BackpressurePolicy,
}

impl BackpressureController {
    pub fn new(threshold: u32, policy: BackpressurePolicy) -> Self {
        Self { threshold, policy }
    }

    /// Admission ceiling in bytes
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Decide what to do with a frame of `frame_len` bytes given the
    /// device's current backlog.
    ///
    /// `frame_len` does not influence the outcome; it is accepted so the
    /// decision reads the same as the call site that has both at hand.
    pub fn decide(&self, queued: u32, _frame_len: u32) -> Action {
        if queued <= self.threshold {
            return Action::Admit;
        }

        match self.policy {
            BackpressurePolicy::DropIncoming => Action::Drop,
            BackpressurePolicy::ClearThenEnqueue => Action::ClearThenAdmit,
            // Recovery happens on enqueue failure, not on backlog size
            BackpressurePolicy::RetryAfterClearOnFailure => Action::Admit,
        }
    }

    /// Whether a failed enqueue under this policy earns one clear + retry
    pub fn retries_on_failure(&self) -> bool {
        self.policy == BackpressurePolicy::RetryAfterClearOnFailure
    }
}
