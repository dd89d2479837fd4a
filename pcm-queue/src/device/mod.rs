//! Output device abstraction
//!
//! A [`PlaybackDevice`] owns the driver handle and its internal playback
//! queue. The manager never tracks the backlog itself; it asks the device
//! every time.
//!
//! Implementations must make `enqueue`, `queued_bytes` and `clear`
//! individually atomic with respect to the device's own consumer. The
//! manager adds no locking on top.

mod output;

pub use output::{CpalDevice, list_output_devices};

use crate::error::DeviceError;

/// Lifecycle of a device handle.
///
/// Moves forward only. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceStatus {
    #[default]
    Uninitialized,
    /// Resource acquired, not yet consuming
    Open,
    /// Consuming queued audio at the hardware rate
    Playing,
    Closed,
}

/// Parameters the device is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSpec {
    /// Hardware sample rate in Hz
    pub sample_rate: u32,
    /// 1 (mono) or 2 (interleaved stereo)
    pub channels: u8,
    /// Driver chunk size in sample frames
    pub buffer_size: u32,
    /// Upper bound on the playback queue in bytes; enqueue fails past it
    pub queue_capacity: usize,
}

/// Trait for audio output drivers
pub trait PlaybackDevice {
    /// Acquire the output resource and start consuming.
    ///
    /// On success the status is `Playing`. Fails with
    /// [`DeviceError::Unavailable`] when no output can be opened.
    fn open(&mut self, spec: &DeviceSpec) -> Result<(), DeviceError>;

    /// Append `frame` to the playback queue, all or nothing
    fn enqueue(&mut self, frame: &[u8]) -> Result<(), DeviceError>;

    /// Bytes accepted but not yet played. O(1), never blocks.
    fn queued_bytes(&self) -> Result<u32, DeviceError>;

    /// Discard everything queued but not yet played
    fn clear(&mut self);

    fn status(&self) -> DeviceStatus;

    fn is_active(&self) -> bool {
        self.status() == DeviceStatus::Playing
    }

    /// Most recent underlying failure, for diagnostics only
    fn last_error(&self) -> Option<String>;

    /// Release the resource. Idempotent and safe before `open`.
    ///
    /// The device is `Closed` afterwards even when an error is returned.
    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Device for hosts without audio output.
///
/// Never opens. Lets a host keep the same manager plumbing when running
/// headless.
#[derive(Debug, Default)]
pub struct NullDevice {
    status: DeviceStatus,
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

const NULL_DEVICE_REASON: &str = "audio output disabled";

impl PlaybackDevice for NullDevice {
    fn open(&mut self, _spec: &DeviceSpec) -> Result<(), DeviceError> {
        Err(DeviceError::Unavailable(NULL_DEVICE_REASON.to_string()))
    }

    fn enqueue(&mut self, _frame: &[u8]) -> Result<(), DeviceError> {
        Err(DeviceError::EnqueueFailed(NULL_DEVICE_REASON.to_string()))
    }

    fn queued_bytes(&self) -> Result<u32, DeviceError> {
        Err(DeviceError::QueryFailed(NULL_DEVICE_REASON.to_string()))
    }

    fn clear(&mut self) {}

    fn status(&self) -> DeviceStatus {
        self.status
    }

    fn last_error(&self) -> Option<String> {
        Some(NULL_DEVICE_REASON.to_string())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.status = DeviceStatus::Closed;
        Ok(())
    }
}
