//! Audio data types shared by capture, accumulation and transmission.

use serde::{Deserialize, Serialize};

/// Sample encoding of captured audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleEncoding {
    /// 16-bit signed integer PCM
    I16,
    /// 32-bit float PCM in [-1.0, 1.0]
    #[default]
    F32,
}

impl std::fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleEncoding::I16 => write!(f, "i16"),
            SampleEncoding::F32 => write!(f, "f32"),
        }
    }
}

/// Raw samples in one of the supported encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    I16(Vec<i16>),
    F32(Vec<f32>),
}

impl Samples {
    /// Empty sample vector in the given encoding.
    pub fn empty(encoding: SampleEncoding) -> Self {
        match encoding {
            SampleEncoding::I16 => Samples::I16(Vec::new()),
            SampleEncoding::F32 => Samples::F32(Vec::new()),
        }
    }

    pub fn encoding(&self) -> SampleEncoding {
        match self {
            Samples::I16(_) => SampleEncoding::I16,
            Samples::F32(_) => SampleEncoding::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Samples::I16(s) => s.len(),
            Samples::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `other`, converting it to this vector's encoding if needed.
    pub fn extend_from(&mut self, other: &Samples) {
        match (self, other) {
            (Samples::I16(dst), Samples::I16(src)) => dst.extend_from_slice(src),
            (Samples::F32(dst), Samples::F32(src)) => dst.extend_from_slice(src),
            (Samples::I16(dst), Samples::F32(src)) => dst.extend(src.iter().map(|&s| f32_to_i16(s))),
            (Samples::F32(dst), Samples::I16(src)) => dst.extend(src.iter().map(|&s| i16_to_f32(s))),
        }
    }

    /// Copy out `count` samples starting at `start`, in the same encoding.
    pub fn slice(&self, start: usize, count: usize) -> Samples {
        let end = (start + count).min(self.len());
        let start = start.min(end);
        match self {
            Samples::I16(s) => Samples::I16(s[start..end].to_vec()),
            Samples::F32(s) => Samples::F32(s[start..end].to_vec()),
        }
    }

    /// Samples as 16-bit PCM.
    pub fn to_i16(&self) -> Vec<i16> {
        match self {
            Samples::I16(s) => s.clone(),
            Samples::F32(s) => s.iter().map(|&v| f32_to_i16(v)).collect(),
        }
    }
}

/// Convert one float sample to 16-bit PCM, clamping out-of-range input.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Convert one 16-bit PCM sample to float.
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode 16-bit samples as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode little-endian 16-bit PCM. A trailing odd byte is ignored.
pub fn bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// One hardware buffer of captured audio.
///
/// Frames are produced only by the capture callback and never mutated after.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Samples,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    pub fn new(samples: Samples, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.samples.encoding()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the duration of this frame in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        let per_channel = self.samples.len() as u64 / self.channels.max(1) as u64;
        (per_channel * 1000 / self.sample_rate.max(1) as u64) as u32
    }
}

/// Contiguous audio for one batch turn.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Samples,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Zero-length buffer; still a valid turn.
    pub fn empty(encoding: SampleEncoding, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Samples::empty(encoding),
            sample_rate,
            channels,
        }
    }

    /// Concatenate frames in order into one buffer of the given encoding.
    pub fn concat(
        frames: &[AudioFrame],
        encoding: SampleEncoding,
        sample_rate: u32,
        channels: u16,
    ) -> Self {
        let total: usize = frames.iter().map(AudioFrame::len).sum();
        let mut samples = match encoding {
            SampleEncoding::I16 => Samples::I16(Vec::with_capacity(total)),
            SampleEncoding::F32 => Samples::F32(Vec::with_capacity(total)),
        };
        for frame in frames {
            samples.extend_from(frame.samples());
        }
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u32 {
        let per_channel = self.samples.len() as u64 / self.channels.max(1) as u64;
        (per_channel * 1000 / self.sample_rate.max(1) as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_f32(values: &[f32]) -> AudioFrame {
        AudioFrame::new(Samples::F32(values.to_vec()), 24000, 1)
    }

    #[test]
    fn test_concat_preserves_arrival_order() {
        let frames = vec![
            frame_f32(&[0.1, 0.2]),
            frame_f32(&[0.3]),
            frame_f32(&[0.4, 0.5, 0.6]),
        ];

        let buffer = AudioBuffer::concat(&frames, SampleEncoding::F32, 24000, 1);

        assert_eq!(
            buffer.samples(),
            &Samples::F32(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6])
        );
    }

    #[test]
    fn test_concat_of_no_frames_is_empty_buffer() {
        let buffer = AudioBuffer::concat(&[], SampleEncoding::I16, 24000, 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.samples().encoding(), SampleEncoding::I16);
        assert_eq!(buffer, AudioBuffer::empty(SampleEncoding::I16, 24000, 1));
    }

    #[test]
    fn test_concat_converts_mixed_encodings() {
        let frames = vec![
            AudioFrame::new(Samples::I16(vec![i16::MAX]), 24000, 1),
            frame_f32(&[-1.0]),
        ];
        let buffer = AudioBuffer::concat(&frames, SampleEncoding::I16, 24000, 1);
        assert_eq!(buffer.samples(), &Samples::I16(vec![i16::MAX, -i16::MAX]));
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_pcm16_bytes_are_little_endian() {
        let bytes = pcm16_to_bytes(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
        assert_eq!(bytes_to_pcm16(&bytes), vec![1, -2, 0x1234]);
    }

    #[test]
    fn test_bytes_to_pcm16_ignores_trailing_odd_byte() {
        assert_eq!(bytes_to_pcm16(&[0x01, 0x00, 0x07]), vec![1]);
    }

    #[test]
    fn test_slice_clamps_to_length() {
        let samples = Samples::I16(vec![1, 2, 3]);
        assert_eq!(samples.slice(1, 10), Samples::I16(vec![2, 3]));
        assert_eq!(samples.slice(5, 1), Samples::I16(vec![]));
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(Samples::I16(vec![0; 480]), 24000, 1);
        assert_eq!(frame.duration_ms(), 20);
    }

    #[test]
    fn test_sample_encoding_deserializes_lowercase() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            encoding: SampleEncoding,
        }
        let parsed: Wrapper = toml::from_str("encoding = \"i16\"").unwrap();
        assert_eq!(parsed.encoding, SampleEncoding::I16);
    }
}
