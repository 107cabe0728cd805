//! PCM helpers used by the signal analyzers.

use realfft::{RealFftPlanner, RealToComplex};
use std::{f32::consts::PI, fmt, sync::Arc};
use tracing::debug;

/// Normalizes PCM16 samples to f32 in `[-1.0, 1.0)`.
pub fn i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Root-mean-square amplitude of normalized samples. Silence (or no samples) is 0.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt().min(1.0)
}

/// Hann-windowed magnitude spectrum of a sample window.
///
/// The FFT is planned for one window length and replanned only when the length
/// changes. The `n / 2 + 1` FFT bins are reduced to `bins` evenly spaced bins
/// between DC and Nyquist by keeping each group's peak, so a tone of `k`
/// cycles per window lands in bin `floor(k * 2 * bins / n)`. Magnitudes are
/// scaled so a full-scale sine reads close to 1.0.
#[derive(Default)]
pub struct Spectrum {
    plan: Option<Plan>,
}

struct Plan {
    fft: Arc<dyn RealToComplex<f32>>,
    hann: Vec<f32>,
}

impl Plan {
    fn new(n: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let hann = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
            .collect();
        Self {
            fft: planner.plan_fft_forward(n),
            hann,
        }
    }
}

impl Spectrum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Window length the current plan was built for.
    pub fn planned_len(&self) -> Option<usize> {
        self.plan.as_ref().map(|plan| plan.hann.len())
    }

    fn plan(&mut self, n: usize) -> &Plan {
        if self.planned_len() != Some(n) {
            self.plan = None;
        }
        self.plan.get_or_insert_with(|| Plan::new(n))
    }

    pub fn magnitudes(&mut self, samples: &[f32], bins: usize) -> Vec<f32> {
        let n = samples.len();
        if n == 0 || bins == 0 {
            return vec![0.0; bins];
        }
        let plan = self.plan(n);
        let mut windowed: Vec<f32> = samples
            .iter()
            .zip(&plan.hann)
            .map(|(s, w)| s * w)
            .collect();
        let mut spectrum = plan.fft.make_output_vec();
        if let Err(e) = plan.fft.process(&mut windowed, &mut spectrum) {
            debug!("Spectrum FFT failed: {}", e);
            return vec![0.0; bins];
        }

        // The Hann window halves the coherent gain.
        let scale = 4.0 / n as f32;
        let half = n / 2;
        (0..bins)
            .map(|b| {
                let lo = b * half / bins;
                let hi = ((b + 1) * half / bins).max(lo + 1).min(spectrum.len());
                let peak = spectrum[lo..hi]
                    .iter()
                    .map(|c| c.norm())
                    .fold(0.0f32, f32::max);
                (peak * scale).min(1.0)
            })
            .collect()
    }
}

impl fmt::Debug for Spectrum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spectrum")
            .field("planned_len", &self.planned_len())
            .finish()
    }
}
