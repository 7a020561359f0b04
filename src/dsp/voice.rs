//! Voices: continuous drone tones and self-disposing one-shots.

use rand::Rng;

use crate::profile::AccentDescriptor;

use super::envelope::PercussiveEnvelope;
use super::filter::{BiquadFilter, FilterType};
use super::oscillator::{Oscillator, Waveform};
use super::param::Param;

/// A continuously running drone tone, detuned against its siblings.
/// It has no envelope of its own; the shared drone gain fades it.
pub fn make_drone_voice(
    frequency: f64,
    waveform: Waveform,
    detune_cents: f64,
    sample_rate: f64,
) -> Oscillator {
    let mut osc = Oscillator::new(waveform, frequency, sample_rate);
    osc.set_detune(detune_cents);
    osc
}

/// A short-lived voice: oscillator, optional filter, gain envelope.
///
/// Silent before `start`; finished at `stop`, after which the owning pool
/// drops it.
#[derive(Debug, Clone)]
pub struct OneShotVoice {
    oscillator: Oscillator,
    filter: Option<BiquadFilter>,
    gain: Param,
    start: f64,
    stop: f64,
    finished: bool,
}

impl OneShotVoice {
    pub fn new(
        oscillator: Oscillator,
        filter: Option<BiquadFilter>,
        gain: Param,
        start: f64,
        stop: f64,
    ) -> Self {
        OneShotVoice {
            oscillator,
            filter,
            gain,
            start,
            stop,
            finished: false,
        }
    }

    /// Generate the sample at `time`.
    pub fn next_sample(&mut self, time: f64) -> f64 {
        if self.finished || time < self.start {
            return 0.0;
        }
        if time >= self.stop {
            self.finished = true;
            return 0.0;
        }

        let mut s = self.oscillator.next_sample();
        if let Some(filter) = self.filter.as_mut() {
            s = filter.process(s);
        }
        s * self.gain.value_at(time)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn stop_time(&self) -> f64 {
        self.stop
    }
}

/// Build the voice for one firing of an accent, starting at `now`.
///
/// Pitch is randomized by up to half the descriptor's detune spread either
/// way; the peak is the descriptor volume times `ambient_scale`.
pub fn make_accent_voice(
    accent: &AccentDescriptor,
    ambient_scale: f64,
    now: f64,
    sample_rate: f64,
    rng: &mut impl Rng,
) -> OneShotVoice {
    let mut osc = Oscillator::new(accent.waveform, accent.frequency, sample_rate);
    if let Some(spread) = accent.detune.filter(|d| *d > 0.0) {
        osc.set_detune(rng.gen_range(-0.5..0.5) * spread);
    }

    let filter = accent.filter_freq.map(|cutoff| {
        BiquadFilter::new(
            FilterType::Lowpass,
            cutoff,
            accent.filter_q.unwrap_or(1.0),
            sample_rate,
        )
    });

    let mut gain = Param::new(0.0);
    let stop = PercussiveEnvelope::default().schedule(
        &mut gain,
        now,
        accent.volume * ambient_scale,
        accent.duration,
    );

    OneShotVoice::new(osc, filter, gain, now, stop)
}
