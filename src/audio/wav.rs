//! 16-bit PCM RIFF/WAVE serialisation via `hound`.
//!
//! Mono and stereo payloads carry the plain 44-byte header (no `LIST` or
//! `fact` chunks) so the assessment backend can read them with any WAV
//! reader.
//!
//! ```text
//! offset  size  field
//!  0      4     "RIFF"
//!  4      4     file length - 8
//!  8      4     "WAVE"
//! 12      4     "fmt "
//! 16      4     16 (PCM fmt chunk size)
//! 20      2     1 (PCM)
//! 22      2     channels
//! 24      4     sample rate
//! 28      4     byte rate
//! 32      2     block align
//! 34      2     16 (bits per sample)
//! 36      4     "data"
//! 40      4     data length
//! 44      …     little-endian i16 samples
//! ```

use std::io::Cursor;

/// Size of the header written by [`write_pcm16`] for mono and stereo.
pub const HEADER_LEN: usize = 44;

/// Layout of the samples handed to [`write_pcm16`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    pub channels: u16,
    pub sample_rate: u32,
}

impl WavSpec {
    /// 16 kHz mono, the format the assessment service expects.
    pub const CANONICAL: WavSpec = WavSpec {
        channels: 1,
        sample_rate: 16_000,
    };

    fn pcm16(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

/// Quantise one float sample to a signed 16-bit integer.
///
/// The input is clamped to `[-1.0, 1.0]`; negative values scale by 32768
/// and positive values by 32767 so `+1.0` does not overflow.  NaN maps to 0.
///
/// ```
/// use therapy_coach::audio::wav::quantize;
///
/// assert_eq!(quantize(1.0), i16::MAX);
/// assert_eq!(quantize(-1.0), i16::MIN);
/// assert_eq!(quantize(0.0), 0);
/// assert_eq!(quantize(3.5), i16::MAX);
/// ```
pub fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32_768.0) as i16
    } else {
        (s * 32_767.0) as i16
    }
}

/// Serialise interleaved float samples as a 16-bit PCM WAVE file.
///
/// `samples.len()` should be a multiple of `spec.channels`.  Mono and
/// stereo get the plain 44-byte header; more channels get hound's
/// `WAVE_FORMAT_EXTENSIBLE` header.
pub fn write_pcm16(samples: &[f32], spec: WavSpec) -> Result<Vec<u8>, hound::Error> {
    let mut cursor = Cursor::new(Vec::with_capacity(HEADER_LEN + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec.pcm16())?;
        for &sample in samples {
            writer.write_sample(quantize(sample))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Declared `data` chunk length of a buffer written by [`write_pcm16`].
///
/// Returns `None` when the buffer is shorter than the header or does not
/// start with the canonical layout.
pub fn declared_data_len(wav: &[u8]) -> Option<u32> {
    if wav.len() < HEADER_LEN || &wav[0..4] != b"RIFF" || &wav[36..40] != b"data" {
        return None;
    }
    Some(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }

    #[test]
    fn header_fields_for_canonical_mono() {
        let wav = write_pcm16(&[0.0; 100], WavSpec::CANONICAL).expect("wav");

        assert_eq!(wav.len(), HEADER_LEN + 200);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32_at(&wav, 4), (wav.len() - 8) as u32);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(u32_at(&wav, 16), 16);
        assert_eq!(u16_at(&wav, 20), 1);
        assert_eq!(u16_at(&wav, 22), 1);
        assert_eq!(u32_at(&wav, 24), 16_000);
        assert_eq!(u32_at(&wav, 28), 32_000);
        assert_eq!(u16_at(&wav, 32), 2);
        assert_eq!(u16_at(&wav, 34), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(declared_data_len(&wav), Some(200));
    }

    #[test]
    fn stereo_header_block_align() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 48_000,
        };
        let wav = write_pcm16(&[0.25; 8], spec).expect("wav");
        assert_eq!(u16_at(&wav, 22), 2);
        assert_eq!(u32_at(&wav, 28), 48_000 * 4);
        assert_eq!(u16_at(&wav, 32), 4);
        assert_eq!(declared_data_len(&wav), Some(16));
    }

    #[test]
    fn full_scale_positive_is_7fff() {
        let wav = write_pcm16(&[1.0; 16], WavSpec::CANONICAL).expect("wav");
        for pair in wav[HEADER_LEN..].chunks_exact(2) {
            assert_eq!(pair, &[0xFF, 0x7F]);
        }
    }

    #[test]
    fn full_scale_negative_is_8000() {
        let wav = write_pcm16(&[-1.0; 16], WavSpec::CANONICAL).expect("wav");
        for pair in wav[HEADER_LEN..].chunks_exact(2) {
            assert_eq!(pair, &[0x00, 0x80]);
        }
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        assert_eq!(quantize(1.7), i16::MAX);
        assert_eq!(quantize(-42.0), i16::MIN);
        assert_eq!(quantize(f32::NAN), 0);
        assert_eq!(quantize(0.5), 16_383);
        assert_eq!(quantize(-0.5), -16_384);
    }

    #[test]
    fn declared_len_rejects_short_buffers() {
        assert_eq!(declared_data_len(b"RIFF"), None);
        assert_eq!(declared_data_len(&[0u8; 44]), None);
    }

    #[test]
    fn samples_read_back_through_hound() {
        let wav = write_pcm16(&[0.5, -0.5, 1.0, -1.0], WavSpec::CANONICAL).expect("wav");
        let reader = hound::WavReader::new(Cursor::new(wav)).expect("reader");
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.expect("sample")).collect();
        assert_eq!(samples, vec![16_383, -16_384, i16::MAX, i16::MIN]);
    }

    #[test]
    fn empty_input_is_header_only() {
        let wav = write_pcm16(&[], WavSpec::CANONICAL).expect("wav");
        assert_eq!(wav.len(), HEADER_LEN);
        assert_eq!(declared_data_len(&wav), Some(0));
    }
}
