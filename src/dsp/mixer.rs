//! Master bus: the single summing point before the output device.

use super::param::Param;

/// Gain stage every drone path and one-shot voice is summed into.
///
/// Its gain is driven only by the volume/mute path, independent of any
/// drone fade.
#[derive(Debug, Clone)]
pub struct MasterBus {
    gain: Param,
}

impl MasterBus {
    pub fn new(initial_gain: f64) -> Self {
        MasterBus {
            gain: Param::new(initial_gain),
        }
    }

    /// Ramp the bus gain to `target` starting at `now`.
    pub fn ramp_to(&mut self, target: f64, now: f64, duration: f64) {
        self.gain.ramp_from_current(target, now, duration);
    }

    /// Gain at `time`.
    pub fn gain_at(&self, time: f64) -> f64 {
        self.gain.value_at(time)
    }

    /// Gain the bus settles at once pending ramps finish.
    pub fn target_gain(&self) -> f64 {
        self.gain.final_value()
    }

    /// Apply the bus gain and soft clipping to one stereo frame.
    #[inline]
    pub fn process(&self, time: f64, left: f64, right: f64) -> (f64, f64) {
        let g = self.gain.value_at(time);
        (soft_clip(left * g), soft_clip(right * g))
    }

    pub fn prune(&mut self, time: f64) {
        self.gain.prune(time);
    }
}

/// Soft clipper using tanh to prevent harsh digital clipping.
fn soft_clip(x: f64) -> f64 {
    x.tanh()
}
