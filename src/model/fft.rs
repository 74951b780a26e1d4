//! Short-time FFT over a dense model
//!
//! Frequency-domain transformers read their input through one of these per
//! channel: a windowed FFT column at the configured block and step sizes,
//! computed on demand from the backing dense model. Columns are centred on
//! their nominal frame; reads off either end of the source are zero-padded.

use crate::error::{Error, Result};
use crate::model::dense::{padded_data, DenseTimeValueModel};
use crate::time::Frame;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

pub struct FftModel {
    source: Arc<dyn DenseTimeValueModel>,
    channel: Option<usize>,
    window: Vec<f32>,
    window_size: usize,
    increment: usize,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl FftModel {
    /// `window` must have `window_size` entries. `channel` of `None` means
    /// the mean of all source channels.
    pub fn new(
        source: Arc<dyn DenseTimeValueModel>,
        channel: Option<usize>,
        window: Vec<f32>,
        window_size: usize,
        increment: usize,
    ) -> Result<Self> {
        if window.len() != window_size || window_size == 0 || increment == 0 {
            return Err(Error::AllocationFailed(format!(
                "bad FFT geometry: window {} size {} increment {}",
                window.len(),
                window_size,
                increment
            )));
        }
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(window_size);
        Ok(FftModel {
            source,
            channel,
            window,
            window_size,
            increment,
            fft,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn increment(&self) -> usize {
        self.increment
    }

    /// Bins per column: window/2 + 1.
    pub fn bin_count(&self) -> usize {
        self.window_size / 2 + 1
    }

    /// Real and imaginary spectra for the given column. Column n is
    /// centred on source start + n * increment.
    pub fn values_at(&self, column: usize) -> Result<(Vec<f32>, Vec<f32>)> {
        let centre =
            self.source.start_frame() + (column * self.increment) as Frame;
        let start = centre - (self.window_size / 2) as Frame;

        let mut input = padded_data(
            self.source.as_ref(),
            self.channel,
            start,
            self.window_size,
        );

        if self.channel.is_none() {
            let channels = self.source.channel_count().max(1) as f32;
            for v in input.iter_mut() {
                *v /= channels;
            }
        }

        for (v, w) in input.iter_mut().zip(self.window.iter()) {
            *v *= w;
        }

        let mut spectrum = self.fft.make_output_vec();
        self.fft
            .process(&mut input, &mut spectrum)
            .map_err(|e| Error::AllocationFailed(format!("FFT failed: {}", e)))?;

        let reals = spectrum.iter().map(|c| c.re).collect();
        let imaginaries = spectrum.iter().map(|c| c.im).collect();
        Ok((reals, imaginaries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Model, ModelBase, NotifyMode};

    struct Sine {
        base: ModelBase,
        frames: Frame,
        period: usize,
    }

    impl Model for Sine {
        fn base(&self) -> &ModelBase {
            &self.base
        }
        fn start_frame(&self) -> Frame {
            0
        }
        fn end_frame(&self) -> Frame {
            self.frames
        }
        fn completion(&self) -> i32 {
            100
        }
        fn type_name(&self) -> &'static str {
            "Sine"
        }
        fn to_xml(&self, _out: &mut String, _indent: &str, _extra: &str) {}
    }

    impl DenseTimeValueModel for Sine {
        fn channel_count(&self) -> usize {
            1
        }
        fn data(&self, _channel: Option<usize>, start: Frame, count: usize) -> Vec<f32> {
            (start..(start + count as Frame).min(self.frames))
                .map(|f| {
                    (f as f32 * std::f32::consts::TAU / self.period as f32).sin()
                })
                .collect()
        }
    }

    fn rectangular(n: usize) -> Vec<f32> {
        vec![1.0; n]
    }

    #[test]
    fn test_peak_bin_matches_input_period() {
        // 64-frame period in a 512-point window: energy in bin 8
        let source = Arc::new(Sine {
            base: ModelBase::new(8000.0, NotifyMode::OnAdd),
            frames: 8192,
            period: 64,
        });
        let fft = FftModel::new(source, Some(0), rectangular(512), 512, 256).unwrap();
        assert_eq!(fft.bin_count(), 257);

        let (reals, imaginaries) = fft.values_at(4).unwrap();
        assert_eq!(reals.len(), 257);

        let magnitudes: Vec<f32> = reals
            .iter()
            .zip(imaginaries.iter())
            .map(|(r, i)| (r * r + i * i).sqrt())
            .collect();
        let peak = magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap()
            .0;
        assert_eq!(peak, 8);
    }

    #[test]
    fn test_column_zero_reads_before_start() {
        // centred window at frame 0 reaches back before the source; the
        // left half is zero-padded and this must not panic or error
        let source = Arc::new(Sine {
            base: ModelBase::new(8000.0, NotifyMode::OnAdd),
            frames: 1024,
            period: 64,
        });
        let fft = FftModel::new(source, Some(0), rectangular(256), 256, 128).unwrap();
        let (reals, _) = fft.values_at(0).unwrap();
        assert_eq!(reals.len(), 129);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let source = Arc::new(Sine {
            base: ModelBase::new(8000.0, NotifyMode::OnAdd),
            frames: 16,
            period: 4,
        });
        assert!(FftModel::new(source, Some(0), vec![1.0; 8], 16, 4).is_err());
    }
}
