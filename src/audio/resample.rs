//! Offline resampling to the assessment rate.
//!
//! [`resample_to`] converts one channel of float samples from any source
//! rate to a target rate with `rubato`'s windowed-sinc resampler and returns
//! **exactly** `floor(len × target / source)` frames, i.e. the source duration
//! times the target rate.  The filter delay is trimmed from the head and the
//! tail is flushed, so the output is time-aligned with the input.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::decode::DecodeError;

/// Sample rate expected by the assessment service.
pub const TARGET_RATE: u32 = 16_000;

const SINC_LEN: usize = 256;
const MAX_FLUSHES: usize = 8;

/// Number of output frames for `frames` input frames at `source_rate`.
///
/// ```
/// use therapy_coach::audio::resample::output_frames;
///
/// assert_eq!(output_frames(48_000, 48_000, 16_000), 16_000);
/// assert_eq!(output_frames(44_100, 44_100, 16_000), 16_000);
/// assert_eq!(output_frames(1_000, 44_100, 16_000), 362);
/// ```
pub fn output_frames(frames: usize, source_rate: u32, target_rate: u32) -> usize {
    if source_rate == 0 {
        return 0;
    }
    (frames as u64 * target_rate as u64 / source_rate as u64) as usize
}

/// Resample mono `samples` from `source_rate` to `target_rate`.
///
/// * Equal rates return the input unchanged.
/// * Empty input returns an empty vector.
///
/// # Errors
///
/// [`DecodeError::Resample`] when the rates are zero or rubato rejects the
/// configuration.
pub fn resample_to(
    samples: &[f32],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, DecodeError> {
    if source_rate == 0 || target_rate == 0 {
        return Err(DecodeError::Resample(format!(
            "invalid rates {source_rate} Hz -> {target_rate} Hz"
        )));
    }
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let target_len = output_frames(samples.len(), source_rate, target_rate);

    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    // Trailing silence one filter long, so even inputs shorter than the
    // filter delay come out of a single pass.
    let mut padded = Vec::with_capacity(samples.len() + SINC_LEN);
    padded.extend_from_slice(samples);
    padded.resize(samples.len() + SINC_LEN, 0.0);

    let mut resampler = SincFixedIn::<f32>::new(
        target_rate as f64 / source_rate as f64,
        2.0,
        params,
        padded.len(),
        1,
    )
    .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();

    let waves_in = vec![padded];
    let mut out = resampler
        .process(&waves_in[..], None)
        .map_err(|e| DecodeError::Resample(e.to_string()))?
        .remove(0);

    // Push zeros through the filter until the delayed tail has come out.
    let mut flushes = 0;
    while out.len() < delay + target_len && flushes < MAX_FLUSHES {
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        match tail.into_iter().next() {
            Some(channel) if !channel.is_empty() => out.extend(channel),
            _ => break,
        }
        flushes += 1;
    }

    let mut out: Vec<f32> = out.into_iter().skip(delay).take(target_len).collect();
    out.resize(target_len, 0.0);
    Ok(out)
}

/// [`resample_to`] with the assessment rate as target.
pub fn resample_to_16k(samples: &[f32], source_rate: u32) -> Result<Vec<f32>, DecodeError> {
    resample_to(samples, source_rate, TARGET_RATE)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn already_16k_is_noop() {
        let input: Vec<f32> = (0..160).map(|i| i as f32 / 160.0).collect();
        let out = resample_to_16k(&input, 16_000).expect("resample");
        assert_eq!(out, input);
    }

    #[test]
    fn empty_input() {
        assert!(resample_to_16k(&[], 48_000).expect("resample").is_empty());
    }

    #[test]
    fn zero_rate_is_an_error() {
        assert!(matches!(
            resample_to_16k(&[0.0; 10], 0),
            Err(DecodeError::Resample(_))
        ));
    }

    #[test]
    fn frame_count_matches_duration_for_common_rates() {
        for &(rate, secs) in &[(48_000u32, 1.0f64), (44_100, 2.5), (22_050, 0.3), (8_000, 1.7)] {
            let frames = (rate as f64 * secs) as usize;
            let input = sine(440.0, rate, frames);
            let out = resample_to_16k(&input, rate).expect("resample");

            let expected = (16_000.0 * secs) as usize;
            assert!(
                out.len().abs_diff(expected) <= 1,
                "{rate} Hz x {secs}s: expected ~{expected}, got {}",
                out.len()
            );
        }
    }

    #[test]
    fn dc_level_survives_downsampling() {
        let input = vec![0.5_f32; 48_000];
        let out = resample_to_16k(&input, 48_000).expect("resample");
        // Ignore the filter edges; the middle must stay at the DC level.
        let middle = &out[2_000..14_000];
        for &s in middle {
            assert!((s - 0.5).abs() < 0.01, "amplitude drift: {s}");
        }
    }

    #[test]
    fn inputs_shorter_than_the_filter_keep_their_signal() {
        for frames in [64, 100, 127] {
            let out = resample_to_16k(&vec![0.5_f32; frames], 48_000).expect("resample");
            assert_eq!(out.len(), frames / 3);
            let peak = out.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
            assert!(peak > 0.1, "{frames} frames came out silent");
        }
    }

    #[test]
    fn tail_is_not_zero_padded() {
        let out = resample_to_16k(&vec![0.5_f32; 200], 48_000).expect("resample");
        assert_eq!(out.len(), 66);
        let last = out[out.len() - 1];
        assert!(last.abs() > 0.1, "tail sample {last}");
        assert!(out[10..60].iter().all(|s| (s - 0.5).abs() < 0.05));
    }

    #[test]
    fn output_is_time_aligned() {
        // An impulse at 0.5 s must come out near 0.5 s.
        let mut input = vec![0.0_f32; 48_000];
        input[24_000] = 1.0;
        let out = resample_to_16k(&input, 48_000).expect("resample");

        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .expect("non-empty");
        assert!(peak.abs_diff(8_000) <= 4, "peak at {peak}");
    }
}
