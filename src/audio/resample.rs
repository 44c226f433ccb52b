//! # Sample Rate Conversion
//!
//! Polyphase resampling built on rubato's FFT resampler. Each call is stateless: the
//! resampler is reset before every block, so no filter history leaks from one frame into
//! the next and the same input always produces the same output.
//!
//! ## Behavior:
//! - Equal rates return the input untouched
//! - Output length is `floor(len * dst / src)`
//! - The resampler's group delay is trimmed so output sample 0 lines up with input sample 0

use rubato::{FftFixedIn, Resampler};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::trace;

use super::frame::AudioError;

/// Internal rate for speech detection and recognition.
pub const SPEECH_SAMPLE_RATE: u32 = 16_000;

/// Input block size handed to the FFT resampler.
const CHUNK_SIZE: usize = 1024;

/// Keeps one FFT resampler per `(src, dst)` pair so the FFT plans are built once.
#[derive(Default)]
pub struct RateConverter {
    resamplers: HashMap<(u32, u32), FftFixedIn<f32>>,
}

impl RateConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert `samples` from `src_rate` to `dst_rate`.
    ///
    /// ## Parameters:
    /// - **samples**: Mono float PCM in [-1.0, 1.0]
    /// - **src_rate**: Rate of `samples` in Hz
    /// - **dst_rate**: Desired rate in Hz
    ///
    /// ## Returns:
    /// - **Ok(Vec<f32>)**: Converted audio, or an exact copy when the rates match
    /// - **Err(AudioError)**: Zero rates or a resampler construction failure
    pub fn convert(&mut self, samples: &[f32], src_rate: u32, dst_rate: u32) -> Result<Vec<f32>, AudioError> {
        if src_rate == 0 || dst_rate == 0 {
            return Err(AudioError::InvalidFormat(format!(
                "cannot resample from {} Hz to {} Hz",
                src_rate, dst_rate
            )));
        }
        if src_rate == dst_rate {
            return Ok(samples.to_vec());
        }

        let expected = (samples.len() as u64 * dst_rate as u64 / src_rate as u64) as usize;
        if expected == 0 {
            return Ok(Vec::new());
        }

        let resampler = match self.resamplers.entry((src_rate, dst_rate)) {
            Entry::Occupied(entry) => {
                let resampler = entry.into_mut();
                resampler.reset();
                resampler
            }
            Entry::Vacant(entry) => {
                trace!(src_rate, dst_rate, "building resampler");
                entry.insert(
                    FftFixedIn::<f32>::new(src_rate as usize, dst_rate as usize, CHUNK_SIZE, 1, 1)
                        .map_err(|e| AudioError::Resample(e.to_string()))?,
                )
            }
        };

        let output = run_block(resampler, samples, expected)?;
        trace!(
            src_rate,
            dst_rate,
            input = samples.len(),
            output = output.len(),
            "resampled block"
        );
        Ok(output)
    }
}

/// One-off conversion with a fresh resampler.
pub fn resample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Result<Vec<f32>, AudioError> {
    RateConverter::new().convert(samples, src_rate, dst_rate)
}

fn run_block(
    resampler: &mut FftFixedIn<f32>,
    samples: &[f32],
    expected: usize,
) -> Result<Vec<f32>, AudioError> {
    let delay = resampler.output_delay();
    let wanted = delay + expected;
    let mut output: Vec<f32> = Vec::with_capacity(wanted + CHUNK_SIZE);

    let mut position = 0;
    while position < samples.len() {
        let needed = resampler.input_frames_next();
        let end = (position + needed).min(samples.len());
        let block = [&samples[position..end]];
        let result = if end - position == needed {
            resampler.process(&block[..], None)
        } else {
            resampler.process_partial(Some(&block[..]), None)
        };
        let produced = result.map_err(|e| AudioError::Resample(e.to_string()))?;
        output.extend_from_slice(&produced[0]);
        position = end;
    }

    // Drain the filter tail with silence until the delayed signal has fully emerged.
    while output.len() < wanted {
        let produced = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if produced[0].is_empty() {
            break;
        }
        output.extend_from_slice(&produced[0]);
    }

    let start = delay.min(output.len());
    let end = (start + expected).min(output.len());
    Ok(output[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, rate: u32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_identity_is_bit_exact() {
        let input = vec![0.1, -0.25, 0.999, -1.0, f32::MIN_POSITIVE, 0.0];
        let output = resample(&input, 16000, 16000).unwrap();
        assert_eq!(input.len(), output.len());
        for (a, b) in input.iter().zip(output.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_rejects_zero_rates() {
        assert!(resample(&[0.0; 10], 0, 16000).is_err());
        assert!(resample(&[0.0; 10], 16000, 0).is_err());
    }

    #[test]
    fn test_output_length_follows_ratio() {
        assert_eq!(resample(&vec![0.0; 960], 48000, 16000).unwrap().len(), 320);
        assert_eq!(resample(&vec![0.0; 320], 16000, 48000).unwrap().len(), 960);
        assert_eq!(resample(&vec![0.0; 441], 44100, 16000).unwrap().len(), 160);
        assert_eq!(resample(&vec![0.0; 4800], 48000, 16000).unwrap().len(), 1600);
    }

    #[test]
    fn test_empty_input() {
        assert!(resample(&[], 48000, 16000).unwrap().is_empty());
    }

    #[test]
    fn test_downsampling_preserves_in_band_tone() {
        let input = sine(440.0, 48000, 9600, 0.5);
        let output = resample(&input, 48000, 16000).unwrap();
        assert_eq!(output.len(), 3200);
        // Skip the edges where the filter sees zero padding.
        let body = &output[400..2800];
        let ratio = rms(body) / rms(&input);
        assert!((ratio - 1.0).abs() < 0.05, "in-band energy changed: ratio {}", ratio);
    }

    #[test]
    fn test_downsampling_is_deterministic() {
        let input = sine(300.0, 44100, 2000, 0.3);
        let first = resample(&input, 44100, 16000).unwrap();
        let second = resample(&input, 44100, 16000).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_converter_reuse_matches_fresh_resampler() {
        let mut converter = RateConverter::new();
        let loud = sine(1000.0, 48000, 960, 0.9);
        let quiet = sine(250.0, 48000, 960, 0.2);

        converter.convert(&loud, 48000, 16000).unwrap();
        let reused = converter.convert(&quiet, 48000, 16000).unwrap();
        assert_eq!(reused, resample(&quiet, 48000, 16000).unwrap());

        converter.convert(&quiet, 44100, 16000).unwrap();
        assert_eq!(converter.resamplers.len(), 2);
    }
}
