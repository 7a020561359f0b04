//! Soundscape profiles: the drone bed and accent tables for each time of day.
//!
//! The base profile is the reading room itself (drone, fire, clock, creaking
//! wood); each time of day adds what drifts in through the windows. Merging
//! is plain concatenation of accent lists.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dsp::filter::FilterType;
use crate::dsp::oscillator::Waveform;
use crate::error::{AudioError, AudioResult};

/// Time of day as chosen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 4] = [
        TimeOfDay::Morning,
        TimeOfDay::Afternoon,
        TimeOfDay::Evening,
        TimeOfDay::Night,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeOfDay {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeOfDay::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                AudioError::invalid_profile("time_of_day", format!("unknown value '{s}'"))
            })
    }
}

/// Template for a repeating sound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccentDescriptor {
    /// Stable name, unique within a merged profile.
    pub label: String,
    /// Base frequency in Hz.
    pub frequency: f64,
    /// Decay length in seconds.
    pub duration: f64,
    pub waveform: Waveform,
    /// Replay interval bounds `[min, max]` in milliseconds.
    pub interval_ms: (u32, u32),
    /// Peak gain before volume scaling.
    pub volume: f64,
    /// Pitch randomization spread in cents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detune: Option<f64>,
    /// Low-pass cutoff in Hz.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_freq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_q: Option<f64>,
}

impl AccentDescriptor {
    pub fn new(
        label: &str,
        frequency: f64,
        duration: f64,
        waveform: Waveform,
        interval_ms: (u32, u32),
        volume: f64,
    ) -> Self {
        AccentDescriptor {
            label: label.to_string(),
            frequency,
            duration,
            waveform,
            interval_ms,
            volume,
            detune: None,
            filter_freq: None,
            filter_q: None,
        }
    }

    pub fn with_detune(mut self, cents: f64) -> Self {
        self.detune = Some(cents);
        self
    }

    pub fn with_lowpass(mut self, cutoff: f64) -> Self {
        self.filter_freq = Some(cutoff);
        self
    }

    /// Interval bounds in seconds.
    pub fn interval_secs(&self) -> (f64, f64) {
        (
            self.interval_ms.0 as f64 / 1000.0,
            self.interval_ms.1 as f64 / 1000.0,
        )
    }

    pub fn validate(&self, field: &str) -> AudioResult<()> {
        let (min, max) = self.interval_ms;
        if min == 0 || max == 0 {
            return Err(AudioError::invalid_profile(
                format!("{field}.interval_ms"),
                "bounds must be positive",
            ));
        }
        if min > max {
            return Err(AudioError::invalid_profile(
                format!("{field}.interval_ms"),
                format!("min {min} exceeds max {max}"),
            ));
        }
        check_positive(&format!("{field}.frequency"), self.frequency)?;
        check_positive(&format!("{field}.duration"), self.duration)?;
        check_unit(&format!("{field}.volume"), self.volume)?;
        if let Some(detune) = self.detune {
            if !detune.is_finite() || detune < 0.0 {
                return Err(AudioError::invalid_profile(
                    format!("{field}.detune"),
                    format!("{detune} is not a spread in cents"),
                ));
            }
        }
        if let Some(cutoff) = self.filter_freq {
            check_positive(&format!("{field}.filter_freq"), cutoff)?;
        }
        if let Some(q) = self.filter_q {
            check_positive(&format!("{field}.filter_q"), q)?;
        }
        Ok(())
    }
}

/// Slow pitch wobble applied to every drone voice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LfoSettings {
    /// Rate in Hz.
    pub rate: f64,
    /// Frequency deviation in Hz.
    #[serde(default = "default_lfo_depth")]
    pub depth: f64,
}

fn default_lfo_depth() -> f64 {
    5.0
}

/// Filter shared by all drone voices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DroneFilter {
    pub frequency: f64,
    #[serde(default = "default_q")]
    pub q: f64,
    #[serde(default)]
    pub filter_type: FilterType,
}

fn default_q() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReverbSettings {
    /// Impulse length in seconds.
    pub decay_s: f64,
}

/// Everything needed to build one soundscape. Never mutated once active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundscapeProfile {
    pub drone_freqs: Vec<f64>,
    pub drone_volume: f64,
    pub drone_waveform: Waveform,
    #[serde(default)]
    pub accents: Vec<AccentDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lfo: Option<LfoSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<DroneFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverb: Option<ReverbSettings>,
}

impl SoundscapeProfile {
    pub fn validate(&self) -> AudioResult<()> {
        if self.drone_freqs.is_empty() {
            return Err(AudioError::invalid_profile(
                "drone_freqs",
                "at least one drone is required",
            ));
        }
        for (i, &freq) in self.drone_freqs.iter().enumerate() {
            check_positive(&format!("drone_freqs[{i}]"), freq)?;
        }
        check_unit("drone_volume", self.drone_volume)?;
        if let Some(lfo) = &self.lfo {
            check_positive("lfo.rate", lfo.rate)?;
            if !lfo.depth.is_finite() || lfo.depth < 0.0 {
                return Err(AudioError::invalid_profile(
                    "lfo.depth",
                    "must be a non-negative Hz deviation",
                ));
            }
        }
        if let Some(filter) = &self.filter {
            check_positive("filter.frequency", filter.frequency)?;
            check_positive("filter.q", filter.q)?;
        }
        if let Some(reverb) = &self.reverb {
            check_positive("reverb.decay_s", reverb.decay_s)?;
        }

        let mut seen = std::collections::HashSet::new();
        for (i, accent) in self.accents.iter().enumerate() {
            accent.validate(&format!("accents[{i}]"))?;
            if !seen.insert(accent.label.as_str()) {
                return Err(AudioError::invalid_profile(
                    format!("accents[{i}].label"),
                    format!("duplicate accent '{}'", accent.label),
                ));
            }
        }
        Ok(())
    }
}

/// Base profile plus the accents each time of day contributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileTable {
    pub base: SoundscapeProfile,
    #[serde(default)]
    pub morning: Vec<AccentDescriptor>,
    #[serde(default)]
    pub afternoon: Vec<AccentDescriptor>,
    #[serde(default)]
    pub evening: Vec<AccentDescriptor>,
    #[serde(default)]
    pub night: Vec<AccentDescriptor>,
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileTable {
    /// The reading room's own tables.
    pub fn builtin() -> Self {
        use Waveform::*;

        let base = SoundscapeProfile {
            // Warm, low drone
            drone_freqs: vec![82.0, 123.0, 165.0],
            drone_volume: 0.02,
            drone_waveform: Sine,
            accents: vec![
                AccentDescriptor::new("clock_tick", 800.0, 0.04, Square, (2000, 2000), 0.015),
                AccentDescriptor::new("fire_low", 200.0, 0.08, Sawtooth, (300, 800), 0.015),
                AccentDescriptor::new("fire_snap", 2500.0, 0.03, Sawtooth, (400, 1200), 0.008),
                AccentDescriptor::new("fire_mid", 600.0, 0.05, Triangle, (600, 1500), 0.01),
                AccentDescriptor::new("wood_creak", 150.0, 0.3, Triangle, (8000, 20000), 0.012),
            ],
            lfo: Some(LfoSettings { rate: 0.08, depth: 4.0 }),
            filter: Some(DroneFilter {
                frequency: 400.0,
                q: 0.8,
                filter_type: FilterType::Lowpass,
            }),
            reverb: Some(ReverbSettings { decay_s: 2.5 }),
        };

        ProfileTable {
            base,
            morning: vec![
                AccentDescriptor::new("bird_chirp", 2200.0, 0.12, Sine, (2000, 4000), 0.008)
                    .with_detune(200.0),
                AccentDescriptor::new("bird_high", 2800.0, 0.08, Sine, (3000, 6000), 0.006)
                    .with_detune(300.0),
                AccentDescriptor::new("bird_low", 1800.0, 0.15, Sine, (2500, 5000), 0.005),
                AccentDescriptor::new("morning_breeze", 400.0, 0.8, Sawtooth, (5000, 10000), 0.004)
                    .with_lowpass(300.0),
            ],
            afternoon: vec![
                AccentDescriptor::new("afternoon_bird", 2400.0, 0.1, Sine, (4000, 8000), 0.005)
                    .with_detune(150.0),
                AccentDescriptor::new("distant_hum", 120.0, 1.5, Sine, (6000, 12000), 0.006),
                AccentDescriptor::new("wind_gust", 500.0, 0.6, Sawtooth, (8000, 15000), 0.004),
            ],
            evening: vec![
                AccentDescriptor::new("cricket_early", 4200.0, 0.04, Sine, (600, 1200), 0.005),
                AccentDescriptor::new("last_bird", 2000.0, 0.15, Sine, (5000, 10000), 0.004)
                    .with_detune(100.0),
                AccentDescriptor::new("evening_breeze", 350.0, 0.5, Sawtooth, (6000, 12000), 0.004),
            ],
            night: vec![
                AccentDescriptor::new("cricket_high", 4500.0, 0.03, Sine, (400, 900), 0.006),
                AccentDescriptor::new("cricket_low", 4000.0, 0.04, Sine, (500, 1100), 0.005),
                AccentDescriptor::new("owl_hoot", 280.0, 0.7, Sine, (15000, 30000), 0.008),
                AccentDescriptor::new("night_wind", 250.0, 1.2, Sawtooth, (10000, 20000), 0.003),
            ],
        }
    }

    /// Load a table from JSON and check every profile it can produce.
    pub fn from_json(json: &str) -> AudioResult<Self> {
        let table: ProfileTable = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    pub fn accents_for(&self, time: TimeOfDay) -> &[AccentDescriptor] {
        match time {
            TimeOfDay::Morning => &self.morning,
            TimeOfDay::Afternoon => &self.afternoon,
            TimeOfDay::Evening => &self.evening,
            TimeOfDay::Night => &self.night,
        }
    }

    /// Base profile with the time-of-day accents appended.
    pub fn profile_for(&self, time: TimeOfDay) -> SoundscapeProfile {
        let mut profile = self.base.clone();
        profile.accents.extend_from_slice(self.accents_for(time));
        profile
    }

    pub fn validate(&self) -> AudioResult<()> {
        TimeOfDay::ALL
            .into_iter()
            .try_for_each(|time| self.profile_for(time).validate())
    }
}

/// Merged built-in profile for `time`.
pub fn profile_for(time: TimeOfDay) -> SoundscapeProfile {
    ProfileTable::builtin().profile_for(time)
}

fn check_positive(field: &str, value: f64) -> AudioResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AudioError::invalid_profile(field, format!("{value} must be positive")))
    }
}

fn check_unit(field: &str, value: f64) -> AudioResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AudioError::invalid_profile(field, format!("{value} is outside [0, 1]")))
    }
}
