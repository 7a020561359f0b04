//! Cooperative timers on the audio clock, and the accent scheduler built on
//! them.
//!
//! Nothing here reads a clock. Callers pass `now` in, so time only moves when
//! the engine renders and tests can step it deterministically.

use rand::Rng;

use crate::profile::AccentDescriptor;

/// Handle to an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone)]
struct Armed<T> {
    id: TimerId,
    due: f64,
    payload: T,
}

/// A set of one-shot timers that fire in due order.
#[derive(Debug, Clone)]
pub struct TimerSet<T> {
    armed: Vec<Armed<T>>,
    next_id: u64,
}

impl<T> Default for TimerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerSet<T> {
    pub fn new() -> Self {
        TimerSet {
            armed: Vec::new(),
            next_id: 0,
        }
    }

    /// Arm a timer that becomes due at `due` (seconds on the audio clock).
    pub fn arm(&mut self, due: f64, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.armed.push(Armed { id, due, payload });
        id
    }

    /// Disarm one timer, returning its payload if it was still pending.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let idx = self.armed.iter().position(|a| a.id == id)?;
        Some(self.armed.swap_remove(idx).payload)
    }

    /// Disarm every pending timer.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.armed.len();
        self.armed.clear();
        n
    }

    /// Remove and return the earliest timer due at or before `now`.
    /// Timers due at the same instant fire in the order they were armed.
    pub fn pop_due(&mut self, now: f64) -> Option<(f64, T)> {
        let idx = self
            .armed
            .iter()
            .enumerate()
            .filter(|(_, a)| a.due <= now)
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.id.cmp(&b.id)))
            .map(|(i, _)| i)?;
        let armed = self.armed.swap_remove(idx);
        Some((armed.due, armed.payload))
    }

    pub fn next_due(&self) -> Option<f64> {
        self.armed.iter().map(|a| a.due).min_by(f64::total_cmp)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

/// One accent due to sound, tagged with the graph epoch it was armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccentFiring {
    pub epoch: u64,
    pub index: usize,
}

/// Runs one independent jittered loop per accent descriptor.
///
/// Each lineage holds exactly one pending timer; firing re-arms it with a
/// fresh delay drawn from the descriptor's interval. Arming a new profile
/// cancels the previous lineages first, so timers never stack.
#[derive(Debug, Default)]
pub struct AccentScheduler {
    timers: TimerSet<usize>,
    accents: Vec<AccentDescriptor>,
    epoch: Option<u64>,
}

impl AccentScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start one lineage per accent for the graph identified by `epoch`.
    /// First firings are spread uniformly over `[0, interval.min]` so
    /// accents of the same kind do not start in lockstep.
    pub fn arm(&mut self, epoch: u64, accents: &[AccentDescriptor], now: f64, rng: &mut impl Rng) {
        self.cancel_all();
        self.epoch = Some(epoch);
        self.accents = accents.to_vec();
        for (index, accent) in self.accents.iter().enumerate() {
            let (min, _) = accent.interval_secs();
            let delay = rng.gen_range(0.0..=min);
            self.timers.arm(now + delay, index);
        }
    }

    /// Cancel every lineage at once.
    pub fn cancel_all(&mut self) {
        self.timers.cancel_all();
        self.accents.clear();
        self.epoch = None;
    }

    /// Collect every firing due by `now`, re-arming each lineage from its
    /// own due time so a late poll does not drift the loop.
    pub fn poll(&mut self, now: f64, rng: &mut impl Rng) -> Vec<AccentFiring> {
        let Some(epoch) = self.epoch else {
            return Vec::new();
        };
        let mut fired = Vec::new();
        while let Some((due, index)) = self.timers.pop_due(now) {
            let (min, max) = self.accents[index].interval_secs();
            let delay = rng.gen_range(min..=max);
            self.timers.arm(due + delay, index);
            fired.push(AccentFiring { epoch, index });
        }
        fired
    }

    pub fn descriptor(&self, index: usize) -> Option<&AccentDescriptor> {
        self.accents.get(index)
    }

    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    pub fn next_due(&self) -> Option<f64> {
        self.timers.next_due()
    }
}
