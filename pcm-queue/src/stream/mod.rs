//! Stream lifecycle and submission routing
//!
//! Architecture:
//! - The manager owns its device; there is no process-wide audio state, so
//!   any number of independent streams can coexist
//! - Each submit reads the live backlog from the device, asks the
//!   [`BackpressureController`] for an [`Action`] and carries it out
//! - A device that cannot be opened leaves the manager `Uninitialized`; the
//!   host keeps running silent and submits fail fast
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized ──initialize ok──► Ready ──shutdown──► Closed
//!       │                                                 ▲
//!       └───────────────────shutdown──────────────────────┘
//! ```

use tracing::{debug, info, trace, warn};

use crate::backpressure::{Action, BackpressureController, BackpressurePolicy};
use crate::config::StreamConfig;
use crate::device::{CpalDevice, PlaybackDevice};
use crate::error::{DeviceError, StreamError};
use crate::frame::AudioFrame;
use crate::metrics::StreamMetrics;


/// Manager-visible lifecycle.
///
/// The device's Open and Playing collapse into `Ready` because the device
/// starts consuming as soon as it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamState {
    #[default]
    Uninitialized,
    Ready,
    Closed,
}

/// Routes producer frames through backpressure to a [`PlaybackDevice`].
///
/// One producer per manager. Calls from more than one thread at a time need
/// external synchronization; the manager does not guard against it.
pub struct StreamManager<D: PlaybackDevice = CpalDevice> {
    device: D,
    state: StreamState,
    /// Set once by a successful initialize, never replaced
    controller: Option<BackpressureController>,
    metrics: StreamMetrics,
}

impl StreamManager<CpalDevice> {
    /// Manager for the host's default cpal output
    pub fn with_default_output() -> Self {
        Self::new(CpalDevice::new())
    }
}

impl<D: PlaybackDevice> StreamManager<D> {
    /// Wrap an unopened device
    pub fn new(device: D) -> Self {
        Self {
            device,
            state: StreamState::Uninitialized,
            controller: None,
            metrics: StreamMetrics::new(0),
        }
    }

    /// Open the device and fix threshold and policy for this stream's lifetime.
    ///
    /// On failure the manager stays `Uninitialized` and the error is returned
    /// as is. There is no internal retry; the caller may call again or run
    /// without audio.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::InvalidState`] if already initialized or shut down
    /// - [`DeviceError::InvalidConfig`] if `config` fails validation
    /// - whatever the device's `open` returns, typically [`DeviceError::Unavailable`]
    pub fn initialize(&mut self, config: &StreamConfig) -> Result<(), DeviceError> {
        if self.state != StreamState::Uninitialized {
            return Err(DeviceError::InvalidState(self.device.status()));
        }

        config
            .validate()
            .map_err(|e| DeviceError::InvalidConfig(e.to_string()))?;

        if let Err(e) = self.device.open(&config.device_spec()) {
            warn!("Failed to open audio device: {}. Audio disabled.", e);
            return Err(e);
        }

        let controller = BackpressureController::new(config.threshold_bytes, config.policy);
        self.controller = Some(controller);
        self.metrics = StreamMetrics::new(config.threshold_bytes);
        self.state = StreamState::Ready;

        info!(
            "Audio stream ready: {}Hz, {} channel(s), threshold={} bytes, policy={:?}",
            config.sample_rate, config.channels, config.threshold_bytes, config.policy
        );
        Ok(())
    }

    /// Hand one frame to the stream.
    ///
    /// A frame dropped because of backlog is `Ok(())`: sustained overrun is
    /// expected, not a fault. Errors leave the stream usable for the next
    /// frame.
    pub fn submit(&mut self, frame: impl Into<AudioFrame>) -> Result<(), StreamError> {
        let controller = match (self.state, self.controller) {
            (StreamState::Ready, Some(controller)) => controller,
            (state, _) => return Err(StreamError::NotReady(state)),
        };
        let frame = frame.into();
        self.metrics.record_submitted();

        let queued = match self.device.queued_bytes() {
            Ok(queued) => queued,
            Err(e) => {
                self.metrics.record_failure();
                warn!("Could not read audio backlog: {}", e);
                return Err(StreamError::QueryFailed(e));
            }
        };
        self.metrics.record_backlog(queued);

        let action = controller.decide(queued, frame.len());
        trace!(
            "Backpressure: queued={} frame={} threshold={} -> {:?}",
            queued,
            frame.len(),
            controller.threshold(),
            action
        );

        let result = match action {
            Action::Admit => self.admit(&frame, controller.retries_on_failure()),
            Action::Drop => {
                self.metrics.record_dropped();
                Ok(())
            }
            Action::ClearThenAdmit => {
                self.clear_device();
                self.enqueue_once(&frame)
            }
        };

        self.metrics.maybe_log();
        result
    }

    /// Enqueue, with one clear + retry when the policy allows it
    fn admit(&mut self, frame: &AudioFrame, retry: bool) -> Result<(), StreamError> {
        if !retry {
            return self.enqueue_once(frame);
        }

        match self.device.enqueue(frame.as_bytes()) {
            Ok(()) => {
                self.metrics.record_admitted(frame.len());
                Ok(())
            }
            Err(e) => {
                debug!("Enqueue failed ({}); clearing backlog and retrying once", e);
                self.clear_device();
                self.metrics.record_retry();
                self.enqueue_once(frame)
            }
        }
    }

    fn enqueue_once(&mut self, frame: &AudioFrame) -> Result<(), StreamError> {
        match self.device.enqueue(frame.as_bytes()) {
            Ok(()) => {
                self.metrics.record_admitted(frame.len());
                Ok(())
            }
            Err(e) => {
                self.metrics.record_failure();
                warn!("Dropping audio frame of {} bytes: {}", frame.len(), e);
                Err(StreamError::EnqueueFailed(e))
            }
        }
    }

    fn clear_device(&mut self) {
        self.device.clear();
        self.metrics.record_clear();
    }

    /// Close the device. Idempotent; never fails from the caller's view.
    pub fn shutdown(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }

        if let Err(e) = self.device.close() {
            // Nothing left to coordinate with
            warn!("Error while closing audio device: {}", e);
        }
        self.state = StreamState::Closed;
        debug!("Audio stream shut down");
    }

    /// Current device backlog in bytes, or 0 when not ready or unreadable
    pub fn queued_bytes(&self) -> u32 {
        if self.state != StreamState::Ready {
            return 0;
        }
        self.device.queued_bytes().unwrap_or_else(|e| {
            trace!("Backlog query failed: {}", e);
            0
        })
    }

    pub fn is_active(&self) -> bool {
        self.state == StreamState::Ready && self.device.is_active()
    }

    /// Most recent underlying device failure, for diagnostics
    pub fn last_error(&self) -> Option<String> {
        self.device.last_error()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Admission ceiling, once initialized
    pub fn threshold(&self) -> Option<u32> {
        self.controller.map(|c| c.threshold())
    }

    /// Overrun policy, once initialized
    pub fn policy(&self) -> Option<BackpressurePolicy> {
        self.controller.map(|c| c.policy())
    }

    pub fn metrics(&self) -> &StreamMetrics {
        &self.metrics
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    #[cfg(test)]
    pub(crate) fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

impl<D: PlaybackDevice> Drop for StreamManager<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
