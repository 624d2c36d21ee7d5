//! Container decoding via `symphonia`.
//!
//! [`decode`] turns an in-memory recording (WAV, FLAC, OGG/Vorbis, MP3, …)
//! into raw float samples.  Only the first channel is kept: the assessment
//! service wants a single channel and mixing would change the level of
//! mono-in-stereo captures.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Reasons a recording could not be turned into canonical PCM.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeError {
    /// No demuxer or codec is available for the container.
    #[error("unsupported audio container: {0}")]
    Unsupported(String),

    /// The container was recognised but its contents are corrupt.
    #[error("malformed audio data: {0}")]
    Malformed(String),

    /// The container holds no audio track or zero samples.
    #[error("recording contains no audio samples")]
    Empty,

    /// The resampler rejected the input.
    #[error("resampling failed: {0}")]
    Resample(String),

    /// The WAVE writer failed.
    #[error("WAV encoding failed: {0}")]
    Encode(String),
}

impl From<hound::Error> for DecodeError {
    fn from(e: hound::Error) -> Self {
        DecodeError::Encode(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// DecodedAudio
// ---------------------------------------------------------------------------

/// First channel of a decoded recording.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Samples of channel 0 in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Source sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count of the source (only the first is kept).
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// File extension symphonia's format detection understands for a MIME tag.
fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let base = mime.split(';').next().unwrap_or(mime).trim();
    match base {
        "audio/wav" | "audio/wave" | "audio/x-wav" => Some("wav"),
        "audio/ogg" => Some("ogg"),
        "audio/webm" | "video/webm" => Some("webm"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/flac" => Some("flac"),
        "audio/mp4" | "audio/aac" => Some("m4a"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

/// Decode `bytes` and return the first channel as float samples.
///
/// `mime` is an optional hint (e.g. `"audio/wav"`); detection also sniffs
/// the container header so a wrong hint is not fatal.
///
/// # Errors
///
/// * [`DecodeError::Unsupported`] : unknown container or codec (e.g. Opus).
/// * [`DecodeError::Malformed`]   : the demuxer or decoder hit corrupt data.
/// * [`DecodeError::Empty`]       : nothing decodable was found.
pub fn decode(bytes: &[u8], mime: Option<&str>) -> Result<DecodedAudio, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(mime) = mime {
        hint.mime_type(mime);
        if let Some(ext) = extension_for_mime(mime) {
            hint.with_extension(ext);
        }
    }

    let detected = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
    let mut format = detected.format;

    let (track_id, codec_params) = {
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::Empty)?;
        (track.id, track.codec_params.clone())
    };

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

    let mut sample_rate = codec_params.sample_rate;
    let mut channels = codec_params.channels.map(|c| c.count() as u16);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => break,
            Err(SymphoniaError::IoError(ref err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => return Err(DecodeError::Malformed(err.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(msg)) => {
                // A single bad packet is skipped, as players do.
                log::warn!("decode: skipping corrupt packet: {msg}");
                continue;
            }
            Err(SymphoniaError::IoError(ref err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => return Err(DecodeError::Malformed(err.to_string())),
        };

        let spec = *decoded.spec();
        let frame_channels = spec.channels.count().max(1);
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(frame_channels as u16);

        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        samples.extend(buf.samples().iter().step_by(frame_channels).copied());
    }

    let sample_rate = sample_rate.ok_or(DecodeError::Empty)?;
    if samples.is_empty() || sample_rate == 0 {
        return Err(DecodeError::Empty);
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels: channels.unwrap_or(1),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
