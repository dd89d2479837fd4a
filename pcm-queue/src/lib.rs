//! pcm-queue - Latency-bounded audio streaming
//!
//! Bridges a producer that generates PCM frames once per application tick
//! (a game or emulator main loop) to an output device that drains audio at
//! the hardware rate. The backlog the device reports is kept under a
//! configured ceiling by a backpressure policy chosen at startup.
//!
//! # Architecture
//!
//! - [`PlaybackDevice`] - Trait over the output driver (open, enqueue, query, clear, close)
//! - [`CpalDevice`] - cpal stream fed from a byte ring buffer
//! - [`BackpressureController`] - Pure admission decision per submitted frame
//! - [`StreamManager`] - Lifecycle and routing from producer to device
//!
//! ```text
//! Main Thread                                            cpal Thread
//!     │                                                       │
//! [submit(frame)]                                             │
//!     │──►[queued_bytes]──►[decide]──►[enqueue/clear]─(ring)─►[Consume]
//! ```
//!
//! # Threading
//!
//! A manager has exactly one producer. Every mutating call takes `&mut self`,
//! so sharing one across threads requires external synchronization chosen by
//! the caller. `enqueue` and `queued_bytes` never take a lock. A clear locks
//! the ring's consumer half, which the audio callback only holds for a single
//! bounded copy. The callback itself never waits: it `try_lock`s and plays
//! silence for any period in which a clear holds the consumer.

pub mod backpressure;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod stream;
#[cfg(test)]
pub mod test_utils;

pub use backpressure::{Action, BackpressureController, BackpressurePolicy};
pub use config::{ConfigError, StreamConfig};
pub use device::{CpalDevice, DeviceSpec, DeviceStatus, NullDevice, PlaybackDevice};
pub use error::{DeviceError, StreamError};
pub use frame::AudioFrame;
pub use metrics::StreamMetrics;
pub use stream::{StreamManager, StreamState};
