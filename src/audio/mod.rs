//! Audio helpers: PCM16 conversion, WAV encoding, voice-activity detection

mod vad;

pub use vad::{VadAnalyzer, VadEvent, VadParams, VadState};

use crate::{Error, Result};

/// Sample rate of caller audio (16kHz for speech)
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesised speech
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Decode little-endian PCM16 bytes
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn pcm16_from_le_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode PCM16 samples as little-endian bytes
#[must_use]
pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// RMS energy of PCM16 samples, normalised to `[0.0, 1.0]`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let v = f32::from(s) / 32768.0;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Wrap mono PCM16 samples in a WAV container for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn pcm16_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Read mono PCM16 samples and the sample rate from WAV bytes
///
/// # Errors
///
/// Returns error if the data is not 16-bit integer WAV
pub fn wav_to_pcm16(wav: &[u8]) -> Result<(Vec<i16>, u32)> {
    let mut reader =
        hound::WavReader::new(std::io::Cursor::new(wav)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(Error::Audio(format!(
            "unsupported WAV format: {} bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Audio(e.to_string()))?;
    Ok((samples, spec.sample_rate))
}
