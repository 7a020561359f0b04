//! The audio context: the engine's explicitly owned output resource.
//!
//! It owns the sample clock, the master bus and the pool of one-shot voices.
//! Drone graphs are owned by the engine and summed in alongside.

use crate::dsp::mixer::MasterBus;
use crate::dsp::voice::OneShotVoice;
use crate::error::{AudioError, AudioResult};

/// Lowest and highest rates a browser audio context accepts.
const MIN_SAMPLE_RATE: f64 = 3000.0;
const MAX_SAMPLE_RATE: f64 = 768000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    /// Output is silent until resumed, typically until a user gesture.
    Suspended,
    Closed,
}

#[derive(Debug)]
pub struct AudioContext {
    sample_rate: f64,
    frames: u64,
    state: ContextState,
    master: MasterBus,
    voices: Vec<OneShotVoice>,
}

impl AudioContext {
    /// Open a context whose master bus starts at `master_gain`.
    pub fn open(sample_rate: f64, master_gain: f64) -> AudioResult<Self> {
        if !sample_rate.is_finite() || !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
            return Err(AudioError::InvalidSampleRate { rate: sample_rate });
        }
        Ok(AudioContext {
            sample_rate,
            frames: 0,
            state: ContextState::Running,
            master: MasterBus::new(master_gain),
            voices: Vec::new(),
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Seconds of audio rendered so far.
    pub fn current_time(&self) -> f64 {
        self.frames as f64 / self.sample_rate
    }

    /// Time of the frame `offset` frames after the clock.
    #[inline]
    pub fn time_at(&self, offset: usize) -> f64 {
        (self.frames + offset as u64) as f64 / self.sample_rate
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ContextState::Running
    }

    pub fn resume(&mut self) {
        if self.state == ContextState::Suspended {
            self.state = ContextState::Running;
        }
    }

    pub fn suspend(&mut self) {
        if self.state == ContextState::Running {
            self.state = ContextState::Suspended;
        }
    }

    /// Release the context. Voices are dropped and the clock stops.
    pub fn close(&mut self) {
        self.state = ContextState::Closed;
        self.voices.clear();
    }

    pub fn master(&self) -> &MasterBus {
        &self.master
    }

    pub fn master_mut(&mut self) -> &mut MasterBus {
        &mut self.master
    }

    /// Connect a one-shot voice to the master bus.
    pub fn add_voice(&mut self, voice: OneShotVoice) -> AudioResult<()> {
        if self.state == ContextState::Closed {
            return Err(AudioError::ContextClosed);
        }
        self.voices.push(voice);
        Ok(())
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Sum of every one-shot voice at `time`.
    #[inline]
    pub fn voices_sample(&mut self, time: f64) -> f64 {
        self.voices.iter_mut().map(|v| v.next_sample(time)).sum()
    }

    /// Move the clock forward after rendering `frames` frames, dropping
    /// voices that reached their stop time.
    pub fn advance(&mut self, frames: usize) {
        if self.state == ContextState::Closed {
            return;
        }
        self.frames += frames as u64;
        let now = self.current_time();
        self.voices.retain(|v| !v.is_finished() && v.stop_time() > now);
        self.master.prune(now);
    }
}
