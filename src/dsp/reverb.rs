//! Convolution reverb driven by a procedurally generated impulse.
//!
//! The impulse is decaying stereo noise, so no recorded room response is
//! needed. Convolution is uniformly partitioned overlap-add: the impulse is
//! cut into block-sized partitions whose spectra are multiplied against a
//! frequency-domain delay line of past input blocks.

use std::sync::Arc;

use rand::Rng;
use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::error::{AudioError, AudioResult};

/// Samples per convolution block. Output is delayed by one block.
pub const BLOCK_SIZE: usize = 128;

/// Decay exponent of the impulse envelope `(1 - t/T)^2.5`.
const DECAY_POWER: f64 = 2.5;

// Level calibration of the browser convolver's `normalize` mode.
const GAIN_CALIBRATION: f64 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f64 = 44100.0;
const MIN_POWER: f64 = 0.000125;

/// A stereo impulse response.
#[derive(Debug, Clone)]
pub struct ImpulseResponse {
    pub channels: [Vec<f32>; 2],
    pub sample_rate: f64,
}

impl ImpulseResponse {
    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels[0].is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }

    /// Scale that brings the impulse to a sample-rate independent loudness.
    fn normalization_scale(&self) -> f64 {
        let count = (self.len() * self.channels.len()).max(1) as f64;
        let sum_sq: f64 = self
            .channels
            .iter()
            .flat_map(|c| c.iter())
            .map(|&s| (s as f64) * (s as f64))
            .sum();
        let power = (sum_sq / count).sqrt().max(MIN_POWER);
        GAIN_CALIBRATION / power * (GAIN_CALIBRATION_SAMPLE_RATE / self.sample_rate)
    }
}

/// Fill a fresh stereo noise impulse of `duration` seconds whose amplitude
/// decays as `(1 - t/T)^2.5`. Every call draws new noise.
pub fn make_reverb_impulse(
    duration: f64,
    sample_rate: f64,
    rng: &mut impl Rng,
) -> AudioResult<ImpulseResponse> {
    let length = (sample_rate * duration).max(0.0) as usize;
    if !duration.is_finite() || length == 0 {
        return Err(AudioError::invalid_profile(
            "reverb.decay_s",
            format!("{duration} s is too short at {sample_rate} Hz"),
        ));
    }

    let mut channel = || -> Vec<f32> {
        (0..length)
            .map(|i| {
                let envelope = (1.0 - i as f64 / length as f64).powf(DECAY_POWER);
                (rng.gen_range(-1.0..1.0) * envelope) as f32
            })
            .collect()
    };
    let left = channel();
    let right = channel();

    Ok(ImpulseResponse {
        channels: [left, right],
        sample_rate,
    })
}

/// Mono-in, stereo-out partitioned FFT convolver.
pub struct Convolver {
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    fft_size: usize,

    /// `[channel][partition]` impulse spectra.
    ir_spectra: [Vec<Vec<Complex<f32>>>; 2],
    /// Spectra of past input blocks, newest at `head`.
    history: Vec<Vec<Complex<f32>>>,
    head: usize,

    input: Vec<f32>,
    fill: usize,
    output: [Vec<f32>; 2],
    overlap: [Vec<f32>; 2],

    time_scratch: Vec<f32>,
    spectrum_scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for Convolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Convolver")
            .field("fft_size", &self.fft_size)
            .field("partitions", &self.history.len())
            .finish()
    }
}

impl Convolver {
    pub fn new(impulse: &ImpulseResponse) -> AudioResult<Self> {
        if impulse.is_empty() {
            return Err(AudioError::invalid_profile("reverb", "empty impulse response"));
        }

        let fft_size = BLOCK_SIZE * 2;
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let scale = impulse.normalization_scale() as f32;
        let partitions = impulse.len().div_ceil(BLOCK_SIZE);
        let mut time_scratch = forward.make_input_vec();

        let mut spectra_for = |samples: &[f32]| -> AudioResult<Vec<Vec<Complex<f32>>>> {
            samples
                .chunks(BLOCK_SIZE)
                .map(|chunk| {
                    time_scratch.fill(0.0);
                    for (dst, &src) in time_scratch.iter_mut().zip(chunk) {
                        *dst = src * scale;
                    }
                    let mut spectrum = forward.make_output_vec();
                    forward
                        .process(&mut time_scratch, &mut spectrum)
                        .map_err(|e| AudioError::Fft(e.to_string()))?;
                    Ok(spectrum)
                })
                .collect()
        };
        let left = spectra_for(&impulse.channels[0])?;
        let right = spectra_for(&impulse.channels[1])?;

        let bins = fft_size / 2 + 1;
        Ok(Convolver {
            time_scratch: forward.make_input_vec(),
            spectrum_scratch: forward.make_output_vec(),
            forward,
            inverse,
            fft_size,
            ir_spectra: [left, right],
            history: vec![vec![Complex::new(0.0, 0.0); bins]; partitions],
            head: 0,
            input: vec![0.0; BLOCK_SIZE],
            fill: 0,
            output: [vec![0.0; BLOCK_SIZE], vec![0.0; BLOCK_SIZE]],
            overlap: [vec![0.0; BLOCK_SIZE], vec![0.0; BLOCK_SIZE]],
        })
    }

    /// Push one input sample and pull one stereo output sample.
    #[inline]
    pub fn process(&mut self, input: f32) -> (f32, f32) {
        let out = (self.output[0][self.fill], self.output[1][self.fill]);
        self.input[self.fill] = input;
        self.fill += 1;
        if self.fill == BLOCK_SIZE {
            self.fill = 0;
            if self.convolve_block().is_err() {
                self.output[0].fill(0.0);
                self.output[1].fill(0.0);
            }
        }
        out
    }

    fn convolve_block(&mut self) -> Result<(), realfft::FftError> {
        self.time_scratch[..BLOCK_SIZE].copy_from_slice(&self.input);
        self.time_scratch[BLOCK_SIZE..].fill(0.0);
        self.forward
            .process(&mut self.time_scratch, &mut self.spectrum_scratch)?;

        let partitions = self.history.len();
        self.head = (self.head + partitions - 1) % partitions;
        self.history[self.head].copy_from_slice(&self.spectrum_scratch);

        let norm = 1.0 / self.fft_size as f32;
        for ch in 0..2 {
            let acc = &mut self.spectrum_scratch;
            acc.fill(Complex::new(0.0, 0.0));
            for (k, ir) in self.ir_spectra[ch].iter().enumerate() {
                let x = &self.history[(self.head + k) % partitions];
                for ((a, &xv), &hv) in acc.iter_mut().zip(x).zip(ir) {
                    *a += xv * hv;
                }
            }
            // DC and Nyquist bins of a real signal have no imaginary part.
            let last = acc.len() - 1;
            acc[0].im = 0.0;
            acc[last].im = 0.0;

            self.inverse.process(acc, &mut self.time_scratch)?;
            for i in 0..BLOCK_SIZE {
                self.output[ch][i] = self.time_scratch[i] * norm + self.overlap[ch][i];
                self.overlap[ch][i] = self.time_scratch[BLOCK_SIZE + i] * norm;
            }
        }
        Ok(())
    }
}
