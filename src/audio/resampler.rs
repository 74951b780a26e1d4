//! Streaming sample-rate conversion using rubato
//!
//! The decode cache feeds fixed-size interleaved buffers through a
//! `FastFixedIn` resampler kept alive across pushes, so conversion state
//! (filter history) carries over between chunks. The final push may be
//! shorter than the chunk size and is delivered through the partial-input
//! path.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Stateful interleaved-buffer resampler.
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    channels: usize,
    chunk_size: usize,
    ratio: f64,
}

impl StreamResampler {
    /// `ratio` is target rate over source rate.
    pub fn new(channels: usize, chunk_size: usize, ratio: f64) -> Result<Self> {
        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0,
            PolynomialDegree::Septic,
            chunk_size,
            channels,
        )
        .map_err(|e| Error::ResamplerInitFailed {
            source_rate: 1.0,
            target_rate: ratio,
            message: e.to_string(),
        })?;

        debug!(channels, chunk_size, ratio, "stream resampler created");

        Ok(StreamResampler {
            inner,
            channels,
            chunk_size,
            ratio,
        })
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Resample one interleaved buffer, returning interleaved output.
    ///
    /// Input longer than the configured chunk size is processed in chunk
    /// slices. Short (partial) slices are legal anywhere but only expected
    /// on the last push of a stream.
    pub fn resample_interleaved(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let frames = input.len() / self.channels;
        let mut out = Vec::new();

        let mut offset = 0;
        while offset < frames {
            let take = (frames - offset).min(self.chunk_size);
            let planar = deinterleave(
                &input[offset * self.channels..(offset + take) * self.channels],
                self.channels,
            );

            let produced = if take == self.chunk_size {
                self.inner.process(&planar, None)
            } else {
                self.inner.process_partial(Some(&planar), None)
            }
            .map_err(|e| Error::Resample(e.to_string()))?;

            interleave_into(&produced, &mut out);
            offset += take;
        }

        Ok(out)
    }
}

/// Convert interleaved samples to planar.
///
/// [L, R, L, R, ...] -> [[L, L, ...], [R, R, ...]]
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in 0..frames {
        for ch in 0..channels {
            planar[ch].push(samples[frame * channels + ch]);
        }
    }
    planar
}

/// Append planar samples to an interleaved buffer.
fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    if planar.is_empty() {
        return;
    }
    let channels = planar.len();
    let frames = planar[0].len();
    out.reserve(frames * channels);
    for frame in 0..frames {
        for ch in 0..channels {
            out.push(planar[ch][frame]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deinterleave_interleave() {
        let interleaved = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let planar = deinterleave(&interleaved, 2);
        assert_eq!(planar[0], vec![1.0, 3.0, 5.0]);
        assert_eq!(planar[1], vec![2.0, 4.0, 6.0]);

        let mut back = Vec::new();
        interleave_into(&planar, &mut back);
        assert_eq!(back, interleaved);
    }

    #[test]
    fn test_output_length_tracks_ratio() {
        let ratio = 48000.0 / 44100.0;
        let mut rs = StreamResampler::new(1, 1024, ratio).unwrap();
        let mut total_out = 0usize;
        let total_in = 1024 * 8;
        for _ in 0..8 {
            let chunk = vec![0.25f32; 1024];
            total_out += rs.resample_interleaved(&chunk).unwrap().len();
        }
        let expected = (total_in as f64 * ratio) as usize;
        // filter latency keeps us a little short, never wildly off
        assert!(
            total_out <= expected + 64 && total_out + 4096 > expected,
            "got {} expected about {}",
            total_out,
            expected
        );
    }

    #[test]
    fn test_partial_chunk_accepted() {
        let mut rs = StreamResampler::new(2, 512, 0.5).unwrap();
        let out = rs.resample_interleaved(&vec![0.0f32; 2 * 100]).unwrap();
        // 100 frames in at ratio 0.5 yields on the order of 50 frames out
        assert!(out.len() / 2 <= 100);
    }
}
