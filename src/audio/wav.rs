//! WAV encoding of a finalized turn for upload.

use crate::audio::frame::{AudioBuffer, Samples};
use crate::error::{Result, TalkbackError};
use std::io::Cursor;

/// Encode a turn buffer as an in-memory WAV file.
///
/// i16 buffers become 16-bit integer WAV, f32 buffers 32-bit float WAV.
/// A zero-length buffer produces a valid header with an empty data chunk.
pub fn encode_wav(buffer: &AudioBuffer) -> Result<Vec<u8>> {
    let (bits_per_sample, sample_format) = match buffer.samples() {
        Samples::I16(_) => (16, hound::SampleFormat::Int),
        Samples::F32(_) => (32, hound::SampleFormat::Float),
    };
    let spec = hound::WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample,
        sample_format,
    };

    let wav_error = |e: hound::Error| TalkbackError::transmission(format!("Failed to encode WAV: {e}"));

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
    match buffer.samples() {
        Samples::I16(samples) => {
            for &s in samples {
                writer.write_sample(s).map_err(wav_error)?;
            }
        }
        Samples::F32(samples) => {
            for &s in samples {
                writer.write_sample(s).map_err(wav_error)?;
            }
        }
    }
    writer.finalize().map_err(wav_error)?;
    Ok(cursor.into_inner())
}
