//! Parameter automation on the audio clock.
//!
//! A [`Param`] is a value that follows a timeline of scheduled events, the
//! same model as a WebAudio `AudioParam`: a ramp runs from the previous
//! event's time and value to its own end time and value.

/// How the value approaches an event's target.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Set,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    time: f64,
    value: f64,
    shape: Shape,
}

#[derive(Debug, Clone)]
pub struct Param {
    initial: f64,
    events: Vec<Event>,
}

impl Param {
    pub fn new(initial: f64) -> Self {
        Param {
            initial,
            events: Vec::new(),
        }
    }

    /// Jump to `value` at `time`.
    pub fn set_value_at(&mut self, value: f64, time: f64) {
        self.insert(Event {
            time,
            value,
            shape: Shape::Set,
        });
    }

    /// Ramp linearly from the previous event to `value`, arriving at `end_time`.
    pub fn linear_ramp_to(&mut self, value: f64, end_time: f64) {
        self.insert(Event {
            time: end_time,
            value,
            shape: Shape::Linear,
        });
    }

    /// Ramp exponentially from the previous event to `value`, arriving at
    /// `end_time`. Both endpoints must be non-zero and share a sign;
    /// otherwise the previous value holds until `end_time`.
    pub fn exponential_ramp_to(&mut self, value: f64, end_time: f64) {
        self.insert(Event {
            time: end_time,
            value,
            shape: Shape::Exponential,
        });
    }

    /// Drop every event after `time`, pin the value it had at `time`, then
    /// ramp linearly to `value` over `duration`. Fades always start from
    /// what is audible now, never from a stale anchor.
    pub fn ramp_from_current(&mut self, value: f64, time: f64, duration: f64) {
        let current = self.value_at(time);
        self.events.retain(|e| e.time <= time);
        self.set_value_at(current, time);
        self.linear_ramp_to(value, time + duration.max(0.0));
    }

    /// Value of the parameter at `time`.
    pub fn value_at(&self, time: f64) -> f64 {
        let mut prev_time = f64::NEG_INFINITY;
        let mut prev_value = self.initial;

        for event in &self.events {
            if event.time <= time {
                prev_time = event.time;
                prev_value = event.value;
                continue;
            }
            return match event.shape {
                Shape::Set => prev_value,
                // A ramp scheduled with no earlier anchor starts from the
                // initial value at time zero.
                Shape::Linear => {
                    let start = prev_time.max(0.0);
                    if event.time <= start {
                        return event.value;
                    }
                    let t = ((time - start) / (event.time - start)).clamp(0.0, 1.0);
                    prev_value + (event.value - prev_value) * t
                }
                Shape::Exponential => {
                    let start = prev_time.max(0.0);
                    if prev_value == 0.0
                        || event.value == 0.0
                        || prev_value.signum() != event.value.signum()
                        || event.time <= start
                    {
                        return prev_value;
                    }
                    let t = ((time - start) / (event.time - start)).clamp(0.0, 1.0);
                    prev_value * (event.value / prev_value).powf(t)
                }
            };
        }
        prev_value
    }

    /// Value the parameter settles at once every event has run.
    pub fn final_value(&self) -> f64 {
        self.events.last().map_or(self.initial, |e| e.value)
    }

    /// Forget events that can no longer influence values at or after `time`.
    pub fn prune(&mut self, time: f64) {
        let settled = self.events.iter().take_while(|e| e.time <= time).count();
        if settled > 1 {
            self.events.drain(..settled - 1);
        }
    }

    fn insert(&mut self, event: Event) {
        // Events at the same time keep insertion order.
        let idx = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(idx, event);
    }
}
