//! The live drone graph for one soundscape.
//!
//! ```text
//! lfo ──► drone oscillators ──► drone gain ──► filter ──┬──────────────► dry
//!                                                       └─► convolver ─► send gain ─► wet
//! ```
//!
//! Both paths are summed into the master bus by the engine.

use rand::Rng;
use tracing::debug;

use crate::config::EngineConfig;
use crate::dsp::filter::BiquadFilter;
use crate::dsp::oscillator::{Oscillator, Waveform};
use crate::dsp::param::Param;
use crate::dsp::reverb::{Convolver, make_reverb_impulse};
use crate::dsp::voice::make_drone_voice;
use crate::error::AudioResult;
use crate::profile::{SoundscapeProfile, TimeOfDay};

/// Cents between neighbouring drone voices.
const DRONE_DETUNE_STEP: f64 = 3.0;

struct ReverbSend {
    convolver: Convolver,
    gain: f64,
}

struct Lfo {
    oscillator: Oscillator,
    depth: f64,
}

/// Handle to every running node of one soundscape.
///
/// Only the engine owns it. Once [`DroneGraph::stop`] runs, every oscillator
/// is gone and the graph renders silence.
pub struct DroneGraph {
    epoch: u64,
    time_of_day: TimeOfDay,
    oscillators: Vec<Oscillator>,
    lfo: Option<Lfo>,
    drone_gain: Param,
    filter: Option<BiquadFilter>,
    reverb: Option<ReverbSend>,
}

impl std::fmt::Debug for DroneGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DroneGraph")
            .field("epoch", &self.epoch)
            .field("time_of_day", &self.time_of_day)
            .field("oscillators", &self.oscillators.len())
            .field("reverb", &self.reverb.is_some())
            .finish()
    }
}

impl DroneGraph {
    /// Build the graph for `profile`, fading in from silence at `now`.
    ///
    /// Nothing is returned unless every node was built; on error the
    /// partially built nodes are simply dropped.
    pub fn build(
        profile: &SoundscapeProfile,
        time_of_day: TimeOfDay,
        epoch: u64,
        now: f64,
        sample_rate: f64,
        config: &EngineConfig,
        rng: &mut impl Rng,
    ) -> AudioResult<Self> {
        profile.validate()?;

        let reverb = match &profile.reverb {
            Some(settings) => {
                let impulse = make_reverb_impulse(settings.decay_s, sample_rate, rng)?;
                Some(ReverbSend {
                    convolver: Convolver::new(&impulse)?,
                    gain: config.reverb_send,
                })
            }
            None => None,
        };

        let oscillators = profile
            .drone_freqs
            .iter()
            .enumerate()
            .map(|(i, &freq)| {
                let detune = (i as f64 - 1.0) * DRONE_DETUNE_STEP;
                make_drone_voice(freq, profile.drone_waveform, detune, sample_rate)
            })
            .collect();

        let lfo = profile.lfo.map(|settings| Lfo {
            oscillator: Oscillator::new(Waveform::Sine, settings.rate, sample_rate),
            depth: settings.depth,
        });

        let filter = profile
            .filter
            .map(|f| BiquadFilter::new(f.filter_type, f.frequency, f.q, sample_rate));

        let mut drone_gain = Param::new(0.0);
        drone_gain.set_value_at(0.0, now);
        drone_gain.linear_ramp_to(profile.drone_volume, now + config.fade_in_s);

        debug!(
            epoch,
            %time_of_day,
            drones = profile.drone_freqs.len(),
            reverb = reverb.is_some(),
            "drone graph built"
        );

        Ok(DroneGraph {
            epoch,
            time_of_day,
            oscillators,
            lfo,
            drone_gain,
            filter,
            reverb,
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn time_of_day(&self) -> TimeOfDay {
        self.time_of_day
    }

    /// Render one stereo frame at `time`.
    #[inline]
    pub fn next_frame(&mut self, time: f64) -> (f64, f64) {
        if self.oscillators.is_empty() {
            return (0.0, 0.0);
        }

        let wobble = self
            .lfo
            .as_mut()
            .map_or(0.0, |lfo| lfo.oscillator.next_sample() * lfo.depth);
        let sum: f64 = self
            .oscillators
            .iter_mut()
            .map(|osc| osc.next_sample_offset(wobble))
            .sum();

        let mut dry = sum * self.drone_gain.value_at(time);
        if let Some(filter) = self.filter.as_mut() {
            dry = filter.process(dry);
        }

        match self.reverb.as_mut() {
            Some(send) => {
                let (l, r) = send.convolver.process(dry as f32);
                (dry + l as f64 * send.gain, dry + r as f64 * send.gain)
            }
            None => (dry, dry),
        }
    }

    /// Ramp the drone gain to silence from wherever it is now.
    pub fn fade_out(&mut self, now: f64, duration: f64) {
        self.drone_gain.ramp_from_current(0.0, now, duration);
    }

    /// Stop and disconnect every node.
    pub fn stop(&mut self) {
        self.oscillators.clear();
        self.lfo = None;
        self.filter = None;
        self.reverb = None;
        debug!(epoch = self.epoch, "drone graph stopped");
    }

    pub fn live_oscillators(&self) -> usize {
        self.oscillators.len()
    }

    /// Drone gain at `time`; zero once stopped.
    pub fn drone_level(&self, time: f64) -> f64 {
        if self.oscillators.is_empty() {
            0.0
        } else {
            self.drone_gain.value_at(time)
        }
    }

    pub fn prune(&mut self, time: f64) {
        self.drone_gain.prune(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;
    use crate::profile::profile_for;
    use rand::SeedableRng;
    use rand_pcg::Pcg32;

    const SR: f64 = 8000.0;

    fn build(profile: &SoundscapeProfile) -> AudioResult<DroneGraph> {
        let mut rng = Pcg32::seed_from_u64(11);
        DroneGraph::build(
            profile,
            TimeOfDay::Evening,
            1,
            0.0,
            SR,
            &EngineConfig::default(),
            &mut rng,
        )
    }

    fn render(graph: &mut DroneGraph, from: f64, seconds: f64) -> Vec<(f64, f64)> {
        let n = (seconds * SR) as usize;
        (0..n).map(|i| graph.next_frame(from + i as f64 / SR)).collect()
    }

    #[test]
    fn one_oscillator_per_drone_frequency() {
        let profile = profile_for(TimeOfDay::Evening);
        let graph = build(&profile).unwrap();
        assert_eq!(graph.live_oscillators(), 3);
        let detunes: Vec<f64> = graph.oscillators.iter().map(|o| o.detune()).collect();
        assert_eq!(detunes, vec![-3.0, 0.0, 3.0]);
        assert!(graph.lfo.is_some() && graph.filter.is_some() && graph.reverb.is_some());
    }

    #[test]
    fn fades_in_over_two_seconds() {
        let profile = profile_for(TimeOfDay::Evening);
        let graph = build(&profile).unwrap();
        assert_eq!(graph.drone_level(0.0), 0.0);
        assert!((graph.drone_level(1.0) - 0.01).abs() < 1e-12);
        assert!((graph.drone_level(2.0) - 0.02).abs() < 1e-12);
        assert!((graph.drone_level(30.0) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn produces_sound_then_silence_after_stop() {
        let profile = profile_for(TimeOfDay::Evening);
        let mut graph = build(&profile).unwrap();
        let frames = render(&mut graph, 0.0, 3.0);
        let peak = frames[16000..].iter().fold(0.0_f64, |m, (l, _)| m.max(l.abs()));
        assert!(peak > 0.005, "drone should be audible, got {peak}");

        graph.stop();
        assert_eq!(graph.live_oscillators(), 0);
        assert_eq!(graph.drone_level(3.0), 0.0);
        assert!(render(&mut graph, 3.0, 0.1).iter().all(|&f| f == (0.0, 0.0)));
    }

    #[test]
    fn fade_out_starts_from_current_level() {
        let profile = profile_for(TimeOfDay::Evening);
        let mut graph = build(&profile).unwrap();
        // Interrupt the fade-in half way.
        graph.fade_out(1.0, 0.5);
        assert!((graph.drone_level(1.0) - 0.01).abs() < 1e-12);
        assert!((graph.drone_level(1.25) - 0.005).abs() < 1e-12);
        assert_eq!(graph.drone_level(1.5), 0.0);
        assert_eq!(graph.drone_level(2.5), 0.0);
    }

    #[test]
    fn dry_only_without_reverb() {
        let mut profile = profile_for(TimeOfDay::Morning);
        profile.reverb = None;
        let mut graph = build(&profile).unwrap();
        for (l, r) in render(&mut graph, 0.0, 0.5) {
            assert_eq!(l, r, "dry path is mono");
        }
    }

    #[test]
    fn invalid_profile_builds_nothing() {
        let mut profile = profile_for(TimeOfDay::Night);
        profile.drone_freqs.clear();
        assert!(matches!(build(&profile), Err(AudioError::InvalidProfile { .. })));

        let mut profile = profile_for(TimeOfDay::Night);
        profile.reverb = Some(crate::profile::ReverbSettings { decay_s: 0.00001 });
        assert!(build(&profile).is_err(), "impulse shorter than one sample");
    }
}
