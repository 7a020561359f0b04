//! Biquad filter with WebAudio BiquadFilterNode coefficients.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Filter response used by the drone bus, accent voices and page-turn bursts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
}

/// A biquad IIR filter (2nd order).
///
/// Direct Form II Transposed, coefficients from the Audio EQ Cookbook.
/// The cutoff is clamped just below Nyquist so a cricket accent at 4.5 kHz
/// stays stable on a low-rate context.
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    filter_type: FilterType,
    frequency: f64,
    q: f64,

    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    z1: f64,
    z2: f64,

    sample_rate: f64,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, frequency: f64, q: f64, sample_rate: f64) -> Self {
        let mut f = BiquadFilter {
            filter_type,
            frequency,
            q,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
            sample_rate,
        };
        f.update_coefficients();
        f
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    fn update_coefficients(&mut self) {
        let nyquist = self.sample_rate / 2.0;
        let freq = self.frequency.clamp(10.0_f64.min(nyquist * 0.5), nyquist * 0.98);
        let q = self.q.max(1e-4);

        let w0 = 2.0 * PI * freq / self.sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let (b0, b1, b2) = match self.filter_type {
            FilterType::Lowpass => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            FilterType::Highpass => {
                let b0 = (1.0 + cos_w0) / 2.0;
                (b0, -(1.0 + cos_w0), b0)
            }
            FilterType::Bandpass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;

        // Normalize by a0
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos_w0 / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    /// Process a single sample through the filter.
    pub fn process(&mut self, input: f64) -> f64 {
        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }
}
