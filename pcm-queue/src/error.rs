//! Error types for device access and stream submission

use crate::device::DeviceStatus;
use crate::stream::StreamState;

/// Failure reported by a [`PlaybackDevice`](crate::PlaybackDevice).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The audio subsystem or an output device could not be acquired.
    ///
    /// Fatal to audio, not to the host: callers keep running silent.
    #[error("audio device unavailable: {0}")]
    Unavailable(String),

    /// The device rejected a buffer (queue full or device not playing)
    #[error("enqueue failed: {0}")]
    EnqueueFailed(String),

    /// The backlog could not be read
    #[error("queue query failed: {0}")]
    QueryFailed(String),

    /// Operation not valid in the device's current status
    #[error("operation not valid while device is {0:?}")]
    InvalidState(DeviceStatus),

    /// Stream configuration rejected before the device was touched
    #[error("invalid stream configuration: {0}")]
    InvalidConfig(String),
}

/// Failure surfaced from [`StreamManager::submit`](crate::StreamManager::submit).
///
/// None of these tear the manager down; the next frame may be submitted as usual.
/// The wrapped device error is part of the message rather than a separate
/// source, so it prints once in an error chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Submit called before a successful initialize, or after shutdown
    #[error("stream not ready (state: {0:?})")]
    NotReady(StreamState),

    /// The frame could not be queued, including after the single clear-and-retry
    #[error("failed to queue frame: {0}")]
    EnqueueFailed(DeviceError),

    /// The device backlog could not be read for the admission decision
    #[error("failed to read device backlog: {0}")]
    QueryFailed(DeviceError),
}
