//! Audio output using cpal and a byte ring buffer
//!
//! The producer side of the ring stays on the caller's thread; the consumer
//! side is shared with the cpal callback behind a mutex so `clear()` can
//! flush it. The callback only ever `try_lock`s that mutex and plays silence
//! for a period in which a clear holds it. It decodes signed 16-bit
//! little-endian PCM into the hardware's native sample type and pads any
//! shortfall with silence.

use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use tracing::{debug, error, warn};

use super::{DeviceSpec, DeviceStatus, PlaybackDevice};
use crate::error::DeviceError;

/// Initial scratch size for the callback (grown on first oversized request)
const CALLBACK_SCRATCH_BYTES: usize = 8192;

type SharedConsumer = Arc<Mutex<HeapCons<u8>>>;
type ErrorSlot = Arc<Mutex<Option<String>>>;

/// Lock that survives a panicked holder; the guarded data stays consistent
/// because every critical section is a single ring operation.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        warn!("Audio mutex poisoned; continuing");
        e.into_inner()
    })
}

// ============================================================================
// Byte queue
// ============================================================================

/// Bounded S16LE byte queue between the producer thread and the audio callback
pub(crate) struct ByteQueue {
    /// Producer side of the ring buffer (main thread writes here)
    producer: HeapProd<u8>,
    /// Consumer side, shared with the cpal callback
    consumer: SharedConsumer,
    /// Ring size in bytes, always even
    capacity: usize,
}

impl ByteQueue {
    /// Queue holding at least `capacity` bytes, rounded up to whole samples
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = (capacity.max(2) + 1) & !1;
        let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
        Self {
            producer,
            consumer: Arc::new(Mutex::new(consumer)),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Handle for the reading side, given to the audio callback
    pub(crate) fn reader(&self) -> SharedConsumer {
        Arc::clone(&self.consumer)
    }

    /// Append all of `frame` or nothing
    pub(crate) fn push(&mut self, frame: &[u8]) -> Result<(), DeviceError> {
        let vacant = self.producer.vacant_len();
        if vacant < frame.len() {
            return Err(DeviceError::EnqueueFailed(format!(
                "ring buffer full: {} bytes requested, {} free",
                frame.len(),
                vacant
            )));
        }

        let pushed = self.producer.push_slice(frame);
        if pushed < frame.len() {
            // Only the producer grows the ring, so this means the free space
            // reading above was wrong; report what actually landed
            return Err(DeviceError::EnqueueFailed(format!(
                "short write: {} of {} bytes queued",
                pushed,
                frame.len()
            )));
        }
        Ok(())
    }

    /// Bytes written but not yet read by the callback
    pub(crate) fn queued(&self) -> usize {
        self.capacity - self.producer.vacant_len()
    }

    /// Discard everything queued; returns the number of bytes dropped
    pub(crate) fn clear(&self) -> usize {
        lock(&self.consumer).clear()
    }
}

/// Pop as many whole samples as fit in `scratch`; an odd trailing byte waits
/// for its pair
fn pop_whole_samples(consumer: &mut HeapCons<u8>, scratch: &mut [u8]) -> usize {
    let available = consumer.occupied_len() & !1;
    let take = scratch.len().min(available);
    consumer.pop_slice(&mut scratch[..take])
}

/// Fill one callback period from the queue.
///
/// Never blocks: if the producer holds the reader (a clear in progress) the
/// whole period is silence. Returns the number of samples taken from the queue.
fn fill_output<T>(consumer: &Mutex<HeapCons<u8>>, scratch: &mut Vec<u8>, data: &mut [T]) -> usize
where
    T: Sample + FromSample<i16>,
{
    let wanted = data.len() * 2;
    if scratch.len() < wanted {
        scratch.resize(wanted, 0);
    }

    let popped = match consumer.try_lock() {
        Ok(mut consumer) => pop_whole_samples(&mut consumer, &mut scratch[..wanted]),
        Err(TryLockError::Poisoned(e)) => {
            pop_whole_samples(&mut e.into_inner(), &mut scratch[..wanted])
        }
        Err(TryLockError::WouldBlock) => 0,
    };

    let samples = popped / 2;
    for (out, bytes) in data.iter_mut().zip(scratch[..samples * 2].chunks_exact(2)) {
        *out = T::from_sample(i16::from_le_bytes([bytes[0], bytes[1]]));
    }
    // Fill any remaining samples with silence
    data[samples..].fill(T::EQUILIBRIUM);
    samples
}

// ============================================================================
// Stream configuration
// ============================================================================

fn is_decodable(format: cpal::SampleFormat) -> bool {
    matches!(
        format,
        cpal::SampleFormat::F32 | cpal::SampleFormat::I16 | cpal::SampleFormat::U16
    )
}

/// Pick a sample format and buffer size from what the device supports.
///
/// Channels and sample rate must be supported exactly; the device's default
/// format wins when several fit. The error names the rejected parameter.
fn negotiate(
    ranges: &[cpal::SupportedStreamConfigRange],
    preferred: cpal::SampleFormat,
    spec: &DeviceSpec,
) -> Result<(cpal::SampleFormat, cpal::BufferSize), DeviceError> {
    let channels = u16::from(spec.channels);
    let rate = cpal::SampleRate(spec.sample_rate);

    let with_channels: Vec<_> = ranges.iter().filter(|r| r.channels() == channels).collect();
    if with_channels.is_empty() {
        return Err(DeviceError::Unavailable(format!(
            "{} channel(s) not supported by the output device",
            spec.channels
        )));
    }

    let with_rate: Vec<_> = with_channels
        .into_iter()
        .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .collect();
    if with_rate.is_empty() {
        return Err(DeviceError::Unavailable(format!(
            "sample rate {}Hz not supported by the output device",
            spec.sample_rate
        )));
    }

    let chosen = with_rate
        .iter()
        .find(|r| r.sample_format() == preferred && is_decodable(preferred))
        .or_else(|| with_rate.iter().find(|r| is_decodable(r.sample_format())))
        .ok_or_else(|| {
            DeviceError::Unavailable(format!(
                "sample format {:?} not supported (need f32, i16 or u16)",
                with_rate[0].sample_format()
            ))
        })?;

    let buffer_size = match chosen.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            if !(*min..=*max).contains(&spec.buffer_size) {
                return Err(DeviceError::Unavailable(format!(
                    "buffer size {} frames not supported (device allows {}..={})",
                    spec.buffer_size, min, max
                )));
            }
            cpal::BufferSize::Fixed(spec.buffer_size)
        }
        // Device won't say; let the driver pick
        cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Default,
    };

    Ok((chosen.sample_format(), buffer_size))
}

// ============================================================================
// cpal device
// ============================================================================

/// Live stream state, present only between open and close
struct OpenOutput {
    queue: ByteQueue,
    /// The cpal stream (kept alive for the duration)
    stream: cpal::Stream,
}

/// [`PlaybackDevice`] backed by the host's default cpal output
pub struct CpalDevice {
    status: DeviceStatus,
    output: Option<OpenOutput>,
    /// Written by the cpal error callback as well as by this handle
    last_error: ErrorSlot,
}

impl CpalDevice {
    /// Create an unopened device. Nothing touches the audio host until `open`.
    pub fn new() -> Self {
        Self {
            status: DeviceStatus::Uninitialized,
            output: None,
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    fn record(&self, err: DeviceError) -> DeviceError {
        *lock(&self.last_error) = Some(err.to_string());
        err
    }

    fn playing_output(&self) -> Option<&OpenOutput> {
        match self.status {
            DeviceStatus::Playing => self.output.as_ref(),
            _ => None,
        }
    }
}

impl Default for CpalDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackDevice for CpalDevice {
    fn open(&mut self, spec: &DeviceSpec) -> Result<(), DeviceError> {
        if self.status != DeviceStatus::Uninitialized {
            return Err(self.record(DeviceError::InvalidState(self.status)));
        }

        let host = cpal::default_host();

        let device = host.default_output_device().ok_or_else(|| {
            self.record(DeviceError::Unavailable(
                "No audio output device available".to_string(),
            ))
        })?;

        let ranges: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| {
                self.record(DeviceError::Unavailable(format!(
                    "Failed to query output configs: {}",
                    e
                )))
            })?
            .collect();
        let preferred = device
            .default_output_config()
            .map(|config| config.sample_format())
            .unwrap_or(cpal::SampleFormat::F32);

        let (sample_format, buffer_size) =
            negotiate(&ranges, preferred, spec).map_err(|e| self.record(e))?;

        let config = cpal::StreamConfig {
            channels: u16::from(spec.channels),
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size,
        };

        let queue = ByteQueue::new(spec.queue_capacity);
        let reader = queue.reader();

        let built = match sample_format {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config, reader, self.last_error.clone())
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, reader, self.last_error.clone())
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &config, reader, self.last_error.clone())
            }
            other => {
                return Err(self.record(DeviceError::Unavailable(format!(
                    "Unsupported sample format: {:?}",
                    other
                ))));
            }
        };

        let stream = built.map_err(|e| {
            self.record(DeviceError::Unavailable(format!(
                "Failed to build audio stream: {}",
                e
            )))
        })?;
        self.status = DeviceStatus::Open;

        if let Err(e) = stream.play() {
            // Nothing was handed out yet; dropping the stream releases it
            self.status = DeviceStatus::Uninitialized;
            return Err(self.record(DeviceError::Unavailable(format!(
                "Failed to play audio stream: {}",
                e
            ))));
        }

        debug!(
            "Audio stream started at {}Hz, {} channel(s), {:?}, ring={} bytes",
            spec.sample_rate,
            spec.channels,
            sample_format,
            queue.capacity()
        );

        self.output = Some(OpenOutput { queue, stream });
        self.status = DeviceStatus::Playing;
        Ok(())
    }

    fn enqueue(&mut self, frame: &[u8]) -> Result<(), DeviceError> {
        if self.status != DeviceStatus::Playing {
            return Err(self.record(DeviceError::EnqueueFailed(format!(
                "device is {:?}",
                self.status
            ))));
        }
        let result = match self.output.as_mut() {
            Some(output) => output.queue.push(frame),
            None => Err(DeviceError::EnqueueFailed("no output stream".to_string())),
        };
        result.map_err(|e| self.record(e))
    }

    fn queued_bytes(&self) -> Result<u32, DeviceError> {
        let output = self.playing_output().ok_or_else(|| {
            DeviceError::QueryFailed(format!("device is {:?}", self.status))
        })?;
        let queued = output.queue.queued();
        u32::try_from(queued)
            .map_err(|_| DeviceError::QueryFailed(format!("backlog {} overflows u32", queued)))
    }

    fn clear(&mut self) {
        if let Some(output) = self.playing_output() {
            let discarded = output.queue.clear();
            debug!("Cleared {} queued audio bytes", discarded);
        }
    }

    fn status(&self) -> DeviceStatus {
        self.status
    }

    fn last_error(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let was = self.status;
        self.status = DeviceStatus::Closed;

        let Some(output) = self.output.take() else {
            return Ok(());
        };

        // The stream is dropped either way; pausing first just stops the
        // callback before the ring goes away
        let paused = output.stream.pause();
        drop(output);
        debug!("Audio stream closed (was {:?})", was);

        paused.map_err(|e| {
            self.record(DeviceError::Unavailable(format!(
                "Failed to pause audio stream: {}",
                e
            )))
        })
    }
}

/// Build an output stream that drains the shared byte ring
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    consumer: SharedConsumer,
    errors: ErrorSlot,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<i16> + Send + 'static,
{
    // Pre-allocate buffer for batch reads
    let mut scratch: Vec<u8> = vec![0; CALLBACK_SCRATCH_BYTES];

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            fill_output(&consumer, &mut scratch, data);
        },
        move |err| {
            error!("Audio stream error: {}", err);
            *lock(&errors) = Some(err.to_string());
        },
        None,
    )
}

/// Names of the host's output devices
pub fn list_output_devices() -> Result<Vec<String>, DeviceError> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| DeviceError::QueryFailed(format!("Failed to enumerate devices: {}", e)))?
        .filter_map(|device| device.name().ok())
        .collect();

    debug!("Found {} output devices", devices.len());
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn drain<T: Sample + FromSample<i16>>(queue: &ByteQueue, len: usize) -> (Vec<T>, usize) {
        let mut data = vec![T::EQUILIBRIUM; len];
        let mut scratch = Vec::new();
        let samples = fill_output(&queue.reader(), &mut scratch, &mut data);
        (data, samples)
    }

    fn spec() -> DeviceSpec {
        DeviceSpec {
            sample_rate: 44_100,
            channels: 2,
            buffer_size: 1024,
            queue_capacity: 4096,
        }
    }

    fn range(
        channels: u16,
        rates: (u32, u32),
        buffer: cpal::SupportedBufferSize,
        format: cpal::SampleFormat,
    ) -> cpal::SupportedStreamConfigRange {
        cpal::SupportedStreamConfigRange::new(
            channels,
            cpal::SampleRate(rates.0),
            cpal::SampleRate(rates.1),
            buffer,
            format,
        )
    }

    const ANY_BUFFER: cpal::SupportedBufferSize =
        cpal::SupportedBufferSize::Range { min: 64, max: 8192 };

    // =============================================================
    // Queue tests
    // =============================================================

    #[test]
    fn test_queue_capacity_rounds_to_whole_samples() {
        assert_eq!(ByteQueue::new(100).capacity(), 100);
        assert_eq!(ByteQueue::new(101).capacity(), 102);
        assert_eq!(ByteQueue::new(0).capacity(), 2);
    }

    #[test]
    fn test_queue_backlog_tracks_pushes() {
        let mut queue = ByteQueue::new(100);
        assert_eq!(queue.queued(), 0);
        queue.push(&[0; 40]).unwrap();
        queue.push(&[0; 20]).unwrap();
        assert_eq!(queue.queued(), 60);
    }

    #[test]
    fn test_full_queue_rejects_without_partial_write() {
        let mut queue = ByteQueue::new(100);
        queue.push(&[0; 90]).unwrap();

        let result = queue.push(&[0; 20]);
        assert!(matches!(result, Err(DeviceError::EnqueueFailed(_))));
        assert_eq!(queue.queued(), 90);

        // Exactly the free space still fits
        queue.push(&[0; 10]).unwrap();
        assert_eq!(queue.queued(), 100);
    }

    #[test]
    fn test_clear_then_push_leaves_only_new_frame() {
        let mut queue = ByteQueue::new(100);
        queue.push(&le_bytes(&[1, 2, 3, 4])).unwrap();

        assert_eq!(queue.clear(), 8);
        assert_eq!(queue.queued(), 0);

        queue.push(&le_bytes(&[7, 8])).unwrap();
        assert_eq!(queue.queued(), 4);

        let (data, samples) = drain::<i16>(&queue, 4);
        assert_eq!(samples, 2);
        assert_eq!(data, vec![7, 8, 0, 0]);
    }

    // =============================================================
    // Callback tests
    // =============================================================

    #[test]
    fn test_fill_decodes_s16le_as_i16() {
        let mut queue = ByteQueue::new(64);
        queue.push(&le_bytes(&[1000, -1000, i16::MAX, i16::MIN])).unwrap();

        let (data, samples) = drain::<i16>(&queue, 4);
        assert_eq!(samples, 4);
        assert_eq!(data, vec![1000, -1000, i16::MAX, i16::MIN]);
        assert_eq!(queue.queued(), 0);
    }

    #[test]
    fn test_fill_converts_to_f32() {
        let mut queue = ByteQueue::new(64);
        queue.push(&le_bytes(&[0, 16384, i16::MIN])).unwrap();

        let (data, _) = drain::<f32>(&queue, 3);
        assert_eq!(data, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_fill_pads_underrun_with_silence() {
        let mut queue = ByteQueue::new(64);
        queue.push(&le_bytes(&[0, 100])).unwrap();

        let (data, samples) = drain::<u16>(&queue, 4);
        assert_eq!(samples, 2);
        assert_eq!(data, vec![0x8000, 0x8000 + 100, 0x8000, 0x8000]);
    }

    #[test]
    fn test_u16_silence_is_midpoint() {
        let queue = ByteQueue::new(64);
        let (data, samples) = drain::<u16>(&queue, 3);
        assert_eq!(samples, 0);
        assert_eq!(data, vec![0x8000; 3]);
    }

    #[test]
    fn test_odd_trailing_byte_is_held_back() {
        let mut queue = ByteQueue::new(64);
        queue.push(&[0x10, 0x00, 0x20]).unwrap();

        let (data, samples) = drain::<i16>(&queue, 4);
        assert_eq!(samples, 1);
        assert_eq!(data, vec![0x10, 0, 0, 0]);
        assert_eq!(queue.queued(), 1);

        // Its pair arrives and the sample plays whole
        queue.push(&[0x00]).unwrap();
        let (data, samples) = drain::<i16>(&queue, 1);
        assert_eq!(samples, 1);
        assert_eq!(data, vec![0x20]);
    }

    #[test]
    fn test_fill_never_waits_on_a_held_reader() {
        let mut queue = ByteQueue::new(64);
        queue.push(&le_bytes(&[5, 6])).unwrap();

        let reader = queue.reader();
        let held = reader.lock().unwrap();
        let mut data = vec![1.0f32; 2];
        let mut scratch = Vec::new();
        assert_eq!(fill_output(&reader, &mut scratch, &mut data), 0);
        assert_eq!(data, vec![0.0, 0.0]);
        drop(held);

        // Nothing was consumed during the contended period
        assert_eq!(queue.queued(), 4);
        let (data, _) = drain::<i16>(&queue, 2);
        assert_eq!(data, vec![5, 6]);
    }

    // =============================================================
    // Config negotiation tests
    // =============================================================

    #[test]
    fn test_negotiate_prefers_default_format() {
        let ranges = [
            range(2, (8_000, 96_000), ANY_BUFFER, cpal::SampleFormat::I16),
            range(2, (8_000, 96_000), ANY_BUFFER, cpal::SampleFormat::F32),
        ];
        let (format, buffer) = negotiate(&ranges, cpal::SampleFormat::F32, &spec()).unwrap();
        assert_eq!(format, cpal::SampleFormat::F32);
        assert_eq!(buffer, cpal::BufferSize::Fixed(1024));
    }

    #[test]
    fn test_negotiate_falls_back_to_decodable_format() {
        let ranges = [
            range(2, (44_100, 44_100), ANY_BUFFER, cpal::SampleFormat::I32),
            range(2, (44_100, 44_100), ANY_BUFFER, cpal::SampleFormat::I16),
        ];
        let (format, _) = negotiate(&ranges, cpal::SampleFormat::I32, &spec()).unwrap();
        assert_eq!(format, cpal::SampleFormat::I16);
    }

    #[test]
    fn test_negotiate_names_rejected_sample_rate() {
        let ranges = [range(2, (48_000, 48_000), ANY_BUFFER, cpal::SampleFormat::F32)];
        let err = negotiate(&ranges, cpal::SampleFormat::F32, &spec()).unwrap_err();
        assert!(err.to_string().contains("sample rate 44100Hz"));
    }

    #[test]
    fn test_negotiate_names_rejected_channels() {
        let ranges = [range(1, (8_000, 96_000), ANY_BUFFER, cpal::SampleFormat::F32)];
        let err = negotiate(&ranges, cpal::SampleFormat::F32, &spec()).unwrap_err();
        assert!(err.to_string().contains("2 channel(s)"));
    }

    #[test]
    fn test_negotiate_names_rejected_buffer_size() {
        let small = cpal::SupportedBufferSize::Range { min: 64, max: 512 };
        let ranges = [range(2, (8_000, 96_000), small, cpal::SampleFormat::F32)];
        let err = negotiate(&ranges, cpal::SampleFormat::F32, &spec()).unwrap_err();
        assert!(err.to_string().contains("buffer size 1024"));
    }

    #[test]
    fn test_negotiate_unknown_buffer_range_uses_driver_default() {
        let ranges = [range(
            2,
            (8_000, 96_000),
            cpal::SupportedBufferSize::Unknown,
            cpal::SampleFormat::F32,
        )];
        let (_, buffer) = negotiate(&ranges, cpal::SampleFormat::F32, &spec()).unwrap();
        assert_eq!(buffer, cpal::BufferSize::Default);
    }
}
