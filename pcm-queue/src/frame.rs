//! Opaque PCM frame handed from producer to manager

/// One application tick worth of PCM bytes.
///
/// The manager never inspects the contents. Bytes are copied into the
/// device queue on submission, so the frame is never aliased by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
}

impl AudioFrame {
    /// Wrap raw PCM bytes
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Lay out interleaved 16-bit samples as little-endian bytes
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Length in bytes, saturated to `u32` for the backlog arithmetic
    pub fn len(&self) -> u32 {
        u32::try_from(self.data.len()).unwrap_or(u32::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for AudioFrame {
    fn from(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for AudioFrame {
    fn from(data: [u8; N]) -> Self {
        Self::new(data.to_vec())
    }
}

impl AsRef<[u8]> for AudioFrame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_samples_is_little_endian() {
        let frame = AudioFrame::from_samples(&[1, -1, 0x1234]);
        assert_eq!(frame.as_bytes(), &[0x01, 0x00, 0xFF, 0xFF, 0x34, 0x12]);
        assert_eq!(frame.len(), 6);
    }

    #[test]
    fn test_empty_frame() {
        let frame = AudioFrame::default();
        assert!(frame.is_empty());
        assert_eq!(frame.len(), 0);
    }

    #[test]
    fn test_from_slice_copies() {
        let source = vec![1u8, 2, 3];
        let frame = AudioFrame::from(source.as_slice());
        drop(source);
        assert_eq!(frame.into_bytes(), vec![1, 2, 3]);
    }
}
