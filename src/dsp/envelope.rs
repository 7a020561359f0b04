//! Attack/decay envelope for short one-shot voices.

use super::param::Param;

/// Linear attack to a peak, exponential decay to a near-silent floor.
///
/// Exponential ramps cannot reach zero, so the voice is stopped a short
/// `tail` after the decay ends instead.
#[derive(Debug, Clone, Copy)]
pub struct PercussiveEnvelope {
    /// Attack time in seconds.
    pub attack: f64,
    /// Level the decay ramps down to.
    pub floor: f64,
    /// Seconds between the end of the decay and the voice stop.
    pub tail: f64,
}

impl Default for PercussiveEnvelope {
    fn default() -> Self {
        Self {
            attack: 0.01,
            floor: 0.001,
            tail: 0.05,
        }
    }
}

impl PercussiveEnvelope {
    /// Schedule the envelope on `gain` and return the time the voice stops.
    pub fn schedule(&self, gain: &mut Param, start: f64, peak: f64, duration: f64) -> f64 {
        let attack_end = start + self.attack.min(duration * 0.5);
        gain.set_value_at(0.0, start);
        gain.linear_ramp_to(peak, attack_end);
        if peak > self.floor {
            gain.exponential_ramp_to(self.floor, start + duration);
        } else {
            gain.linear_ramp_to(0.0, start + duration);
        }
        start + duration + self.tail
    }
}
