//! Anti-aliased oscillators using PolyBLEP.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Supported waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

/// A band-limited oscillator with anti-aliasing (PolyBLEP).
///
/// The frequency can be modulated per sample through
/// [`Oscillator::next_sample_offset`], which is how the drone LFO reaches
/// every drone voice.
#[derive(Debug, Clone)]
pub struct Oscillator {
    pub waveform: Waveform,
    pub frequency: f64,
    detune: f64, // in cents
    detune_ratio: f64,
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f64, sample_rate: f64) -> Self {
        Oscillator {
            waveform,
            frequency,
            detune: 0.0,
            detune_ratio: 1.0,
            phase: 0.0,
            sample_rate,
        }
    }

    /// Set the detune in cents.
    pub fn set_detune(&mut self, cents: f64) {
        self.detune = cents;
        self.detune_ratio = 2.0_f64.powf(cents / 1200.0);
    }

    pub fn detune(&self) -> f64 {
        self.detune
    }

    /// Effective frequency with a modulation offset (Hz) and detune applied.
    fn effective_freq(&self, offset_hz: f64) -> f64 {
        (self.frequency + offset_hz) * self.detune_ratio
    }

    /// Generate the next sample at the base frequency.
    pub fn next_sample(&mut self) -> f64 {
        self.next_sample_offset(0.0)
    }

    /// Generate the next sample with `offset_hz` added to the base frequency.
    pub fn next_sample_offset(&mut self, offset_hz: f64) -> f64 {
        let inc = self.effective_freq(offset_hz) / self.sample_rate;
        let dt = inc.abs().min(0.5);
        let sample = match self.waveform {
            Waveform::Sine => (2.0 * PI * self.phase).sin(),
            Waveform::Sawtooth => self.sawtooth(dt),
            Waveform::Square => self.square(dt),
            Waveform::Triangle => self.triangle(),
        };

        self.phase = (self.phase + inc).rem_euclid(1.0);
        sample
    }

    /// Naive sawtooth: rises from -1 to +1, then drops.
    /// PolyBLEP corrects the discontinuity at the wrap.
    fn sawtooth(&self, dt: f64) -> f64 {
        let naive = 2.0 * self.phase - 1.0;
        naive - poly_blep(self.phase, dt)
    }

    fn square(&self, dt: f64) -> f64 {
        let mut value = if self.phase < 0.5 { 1.0 } else { -1.0 };
        value += poly_blep(self.phase, dt);
        value -= poly_blep((self.phase + 0.5) % 1.0, dt);
        value
    }

    /// Piecewise linear: -1 -> +1 over the first half, back down over the second.
    fn triangle(&self) -> f64 {
        if self.phase < 0.5 {
            4.0 * self.phase - 1.0
        } else {
            3.0 - 4.0 * self.phase
        }
    }
}

/// PolyBLEP (Polynomial Band-Limited Step) anti-aliasing correction.
///
/// `t` is the phase [0, 1), `dt` is the phase increment per sample.
fn poly_blep(t: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        0.0
    } else if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}
