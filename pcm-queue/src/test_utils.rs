//! Shared test utilities for unit tests

use crate::device::{DeviceSpec, DeviceStatus, PlaybackDevice};
use crate::error::DeviceError;

// ============================================================================
// Scripted Device Implementation
// ============================================================================

/// One call observed by [`ScriptedDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Open,
    Enqueue(usize),
    Clear,
    Close,
}

/// In-memory device with a programmable backlog and failures.
///
/// The backlog never drains on its own, so every change in
/// `queued_bytes()` comes from a call the test made.
#[derive(Debug, Default)]
pub struct ScriptedDevice {
    pub status: DeviceStatus,
    /// Bytes currently queued
    pub backlog: u32,
    /// Frames accepted since the last clear, in order
    pub queued_frames: Vec<Vec<u8>>,
    /// Every call, in order
    pub calls: Vec<DeviceCall>,
    /// Fail open with this reason
    pub fail_open: Option<String>,
    /// Number of upcoming enqueue calls that fail
    pub failing_enqueues: u32,
    /// Fail queued_bytes
    pub fail_query: bool,
    /// Return an error from close (status still becomes Closed)
    pub fail_close: bool,
    /// Spec passed to the last successful open
    pub opened_with: Option<DeviceSpec>,
    pub last_error: Option<String>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device whose backlog already holds `bytes`
    pub fn with_backlog(bytes: u32) -> Self {
        Self {
            backlog: bytes,
            ..Self::default()
        }
    }

    /// Device that fails to open
    pub fn unavailable() -> Self {
        Self {
            fail_open: Some("no output device".to_string()),
            ..Self::default()
        }
    }

    pub fn enqueue_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, DeviceCall::Enqueue(_)))
            .count()
    }

    pub fn clear_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| **call == DeviceCall::Clear)
            .count()
    }
}

impl PlaybackDevice for ScriptedDevice {
    fn open(&mut self, spec: &DeviceSpec) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::Open);
        if self.status != DeviceStatus::Uninitialized {
            return Err(DeviceError::InvalidState(self.status));
        }
        if let Some(reason) = &self.fail_open {
            self.last_error = Some(reason.clone());
            return Err(DeviceError::Unavailable(reason.clone()));
        }
        self.opened_with = Some(*spec);
        self.status = DeviceStatus::Playing;
        Ok(())
    }

    fn enqueue(&mut self, frame: &[u8]) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::Enqueue(frame.len()));
        if self.failing_enqueues > 0 {
            self.failing_enqueues -= 1;
            let reason = "driver rejected buffer".to_string();
            self.last_error = Some(reason.clone());
            return Err(DeviceError::EnqueueFailed(reason));
        }
        if self.status != DeviceStatus::Playing {
            return Err(DeviceError::EnqueueFailed(format!(
                "device is {:?}",
                self.status
            )));
        }
        self.backlog += u32::try_from(frame.len()).unwrap();
        self.queued_frames.push(frame.to_vec());
        Ok(())
    }

    fn queued_bytes(&self) -> Result<u32, DeviceError> {
        if self.fail_query {
            return Err(DeviceError::QueryFailed("query refused".to_string()));
        }
        Ok(self.backlog)
    }

    fn clear(&mut self) {
        self.calls.push(DeviceCall::Clear);
        self.backlog = 0;
        self.queued_frames.clear();
    }

    fn status(&self) -> DeviceStatus {
        self.status
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::Close);
        self.status = DeviceStatus::Closed;
        if self.fail_close {
            let reason = "driver refused to close".to_string();
            self.last_error = Some(reason.clone());
            return Err(DeviceError::Unavailable(reason));
        }
        Ok(())
    }
}
