//! Audio resampling and channel mixing utilities.
//!
//! Both directions of the pipeline need format conversion:
//!
//! * uplink: microphone frames (device rate, N channels) → mono at the rate
//!   advertised in `audio_metadata`;
//! * playback: decoded chunks (chunk rate, M channels) → the output device's
//!   rate and channel layout.
//!
//! The resampler uses linear interpolation.  Speech at 8–48 kHz survives it
//! well enough and it keeps per-chunk latency at zero (no filter history).

// ---------------------------------------------------------------------------
// stereo_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.
///
/// * If `channels == 1` the input slice is returned as an owned `Vec`.
/// * If `channels == 0` an empty vector is returned.
///
/// # Example
///
/// ```rust
/// use realtime_voice::audio::stereo_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, -0.2]; // L R L R
/// let mono = stereo_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// ```
pub fn stereo_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Duplicate a mono signal into `channels` interleaved channels.
pub fn mono_to_channels(mono: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => mono.to_vec(),
        n => mono
            .iter()
            .flat_map(|&s| std::iter::repeat(s).take(n as usize))
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// resample_linear
// ---------------------------------------------------------------------------

/// Resample mono `samples` from `source_rate` Hz to `target_rate` Hz using
/// linear interpolation.
///
/// * Equal rates return a copy of the input.
/// * Empty input, or a zero rate on either side, returns an empty vector.
///
/// The output length is `ceil(samples.len() * target_rate / source_rate)`.
///
/// # Example
///
/// ```rust
/// use realtime_voice::audio::resample_linear;
///
/// let hi = vec![0.5_f32; 480];
/// let lo = resample_linear(&hi, 48_000, 16_000);
/// assert_eq!(lo.len(), 160);
/// ```
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == 0 || target_rate == 0 || samples.is_empty() {
        return Vec::new();
    }
    if source_rate == target_rate {
        return samples.to_vec();
    }

    let src = source_rate as u64;
    let dst = target_rate as u64;
    let output_len = ((samples.len() as u64 * dst + src - 1) / src) as usize;
    let step = source_rate as f64 / target_rate as f64;

    let mut output = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src_pos = i as f64 * step;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };
        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// convert
// ---------------------------------------------------------------------------

/// Convert interleaved audio between sample rates and channel layouts.
///
/// Multi-channel input is averaged to mono first, so stereo images are not
/// preserved.  Both ends of this pipeline carry speech, where that does not
/// matter.
pub fn convert(
    samples: &[f32],
    source_rate: u32,
    source_channels: u16,
    target_rate: u32,
    target_channels: u16,
) -> Vec<f32> {
    if source_rate == target_rate && source_channels == target_channels {
        return samples.to_vec();
    }
    let mono = stereo_to_mono(samples, source_channels);
    let resampled = resample_linear(&mono, source_rate, target_rate);
    mono_to_channels(&resampled, target_channels)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
