//! One-shot effects triggered by the host, outside the accent scheduler.

use rand::Rng;

use crate::dsp::envelope::PercussiveEnvelope;
use crate::dsp::filter::{BiquadFilter, FilterType};
use crate::dsp::oscillator::{Oscillator, Waveform};
use crate::dsp::param::Param;
use crate::dsp::voice::OneShotVoice;

/// Bursts per page turn.
pub const PAGE_TURN_BURSTS: usize = 3;
/// Seconds between burst onsets.
const BURST_STAGGER: f64 = 0.05;
/// Peak gain of a burst at full volume.
const BURST_PEAK: f64 = 0.02;

/// Voices for one page-turn rustle: a few short band-passed sawtooth
/// bursts, each with its own pitch and length so turns never sound alike.
pub fn page_turn_voices(
    volume: f64,
    now: f64,
    sample_rate: f64,
    rng: &mut impl Rng,
) -> Vec<OneShotVoice> {
    let envelope = PercussiveEnvelope::default();
    (0..PAGE_TURN_BURSTS)
        .map(|i| {
            let osc = Oscillator::new(
                Waveform::Sawtooth,
                2000.0 + rng.gen_range(0.0..1000.0),
                sample_rate,
            );
            let filter = BiquadFilter::new(
                FilterType::Bandpass,
                3000.0 + rng.gen_range(0.0..1000.0),
                2.0,
                sample_rate,
            );

            let start = now + i as f64 * BURST_STAGGER;
            let duration = 0.08 + rng.gen_range(0.0..0.05);
            let mut gain = Param::new(0.0);
            let stop = envelope.schedule(&mut gain, start, BURST_PEAK * volume, duration);

            OneShotVoice::new(osc, Some(filter), gain, start, stop)
        })
        .collect()
}
