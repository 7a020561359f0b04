//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{AudioError, AudioResult};

/// Timing and level settings for [`crate::engine::AmbientEngine`].
///
/// All times are in seconds on the audio clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: f64,
    /// Drone gain ramp from silence to the profile volume.
    pub fade_in_s: f64,
    /// Drone gain ramp to silence when a soundscape stops.
    pub fade_out_s: f64,
    /// Delay between the start of a fade-out and releasing the graph.
    pub release_delay_s: f64,
    /// Master bus ramp on volume or mute changes.
    pub volume_ramp_s: f64,
    /// Delay before a new soundscape builds after a time-of-day or unmute.
    pub start_delay_s: f64,
    /// Master bus gain at full volume.
    pub master_scale: f64,
    /// Level of the reverb send relative to the dry drone.
    pub reverb_send: f64,
    /// Seed for jitter and noise; entropy when absent.
    pub seed: Option<u64>,
    /// Open the context suspended until `resume` or `restart`.
    pub start_suspended: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            fade_in_s: 2.0,
            fade_out_s: 0.5,
            release_delay_s: 0.6,
            volume_ramp_s: 0.1,
            start_delay_s: 0.1,
            master_scale: 0.5,
            reverb_send: 0.35,
            seed: None,
            start_suspended: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> AudioResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn validate(&self) -> AudioResult<()> {
        let timings = [
            ("fade_in_s", self.fade_in_s),
            ("fade_out_s", self.fade_out_s),
            ("release_delay_s", self.release_delay_s),
            ("volume_ramp_s", self.volume_ramp_s),
            ("start_delay_s", self.start_delay_s),
        ];
        for (field, value) in timings {
            if !value.is_finite() || value < 0.0 {
                return Err(AudioError::invalid_config(field, format!("{value} is not a duration")));
            }
        }
        if self.release_delay_s < self.fade_out_s {
            return Err(AudioError::invalid_config(
                "release_delay_s",
                "graphs must outlive their fade-out",
            ));
        }
        let levels = [
            ("master_scale", self.master_scale),
            ("reverb_send", self.reverb_send),
        ];
        for (field, value) in levels {
            if !(0.0..=1.0).contains(&value) {
                return Err(AudioError::invalid_config(field, format!("{value} is outside [0, 1]")));
            }
        }
        Ok(())
    }
}
