//! Ambient Engine: owns the audio context and the soundscape lifecycle.
//!
//! The host feeds three controls (time of day, mute, volume) and pulls audio
//! with `render*`. Every control is fire-and-forget: transitions, fades and
//! accent firings happen later on the audio clock, pumped at the start of
//! each render block.
//!
//! Lifecycle: `Idle -> Starting -> Active -> Stopping -> Idle`. A time-of-day
//! change stops the active graph and arms a start a moment later, so the old
//! drone's fade-out overlaps the new one's fade-in. Nothing here returns an
//! error to the host; failures leave the room silent.

use std::collections::VecDeque;

use rand::SeedableRng;
use rand_pcg::Pcg32;
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::context::AudioContext;
use crate::dsp::voice::make_accent_voice;
use crate::effects::page_turn_voices;
use crate::graph::DroneGraph;
use crate::profile::{ProfileTable, TimeOfDay};
use crate::scheduler::{AccentFiring, AccentScheduler, TimerId, TimerSet};

/// Frames rendered between timer pumps.
pub const RENDER_BLOCK: usize = 128;
/// Oldest events are dropped beyond this many undrained events.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Where the soundscape is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing playing, nothing pending.
    Idle,
    /// A build is armed and will run on the next due pump.
    Starting,
    /// A drone graph is live and its accents are scheduled.
    Active,
    /// The last graph is fading out; nothing new is pending.
    Stopping,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Active => "active",
            LifecycleState::Stopping => "stopping",
        }
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        self == next
            || matches!(
                (self, next),
                (Idle, Starting)
                    | (Starting, Active)
                    | (Starting, Idle)
                    | (Starting, Stopping)
                    | (Active, Stopping)
                    | (Stopping, Starting)
                    | (Stopping, Idle)
            )
    }
}

/// The host-facing inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Controls {
    pub time_of_day: TimeOfDay,
    pub muted: bool,
    /// Output volume in [0, 1].
    pub volume: f64,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            time_of_day: TimeOfDay::Evening,
            muted: false,
            volume: 0.5,
        }
    }
}

/// Something observable that happened on the audio clock.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    GraphBuilt { epoch: u64, time_of_day: TimeOfDay, at: f64 },
    GraphReleased { epoch: u64, time_of_day: TimeOfDay, at: f64 },
    AccentFired { epoch: u64, label: String, at: f64 },
    PageTurn { bursts: usize, at: f64 },
    BuildFailed { time_of_day: TimeOfDay, reason: String, at: f64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub graphs_built: u64,
    pub graphs_released: u64,
    pub build_failures: u64,
    pub accents_fired: u64,
    /// Firings that came due while the context was suspended.
    pub accents_skipped: u64,
    /// Firings whose graph was already gone.
    pub stale_firings: u64,
    pub page_turn_bursts: u64,
}

#[derive(Debug, Clone, Copy)]
enum LifecycleTask {
    Start,
    Release { epoch: u64 },
}

/// The previous graph, fading out under the active one.
struct Retiring {
    graph: DroneGraph,
    release: TimerId,
}

pub struct AmbientEngine {
    ctx: Option<AudioContext>,
    config: EngineConfig,
    table: ProfileTable,
    controls: Controls,
    state: LifecycleState,
    active: Option<DroneGraph>,
    /// At most one graph tails the active one; an older tail is released
    /// as soon as a newer graph starts fading.
    retiring: Option<Retiring>,
    lifecycle: TimerSet<LifecycleTask>,
    pending_start: Option<TimerId>,
    accents: AccentScheduler,
    rng: Pcg32,
    next_epoch: u64,
    events: VecDeque<EngineEvent>,
    stats: EngineStats,
}

impl AmbientEngine {
    /// Create an engine with the built-in profiles.
    ///
    /// If the audio context cannot be opened the engine is still returned,
    /// and every call on it does nothing.
    pub fn new(config: EngineConfig, controls: Controls) -> Self {
        Self::with_table(config, ProfileTable::builtin(), controls)
    }

    pub fn with_table(config: EngineConfig, table: ProfileTable, controls: Controls) -> Self {
        let rng = match config.seed {
            Some(seed) => Pcg32::seed_from_u64(seed),
            None => Pcg32::from_entropy(),
        };

        let table = match table.validate() {
            Ok(()) => table,
            Err(err) => {
                warn!(%err, "invalid profile table, using built-in profiles");
                ProfileTable::builtin()
            }
        };

        let controls = Controls {
            volume: sanitize_volume(controls.volume),
            ..controls
        };

        let ctx = config
            .validate()
            .and_then(|()| {
                AudioContext::open(config.sample_rate, master_target(&config, &controls))
            });
        let ctx = match ctx {
            Ok(mut ctx) => {
                if config.start_suspended {
                    ctx.suspend();
                }
                Some(ctx)
            }
            Err(err) => {
                warn!(%err, "ambient audio unavailable, soundscape disabled");
                None
            }
        };

        let mut engine = AmbientEngine {
            ctx,
            config,
            table,
            controls,
            state: LifecycleState::Idle,
            active: None,
            retiring: None,
            lifecycle: TimerSet::new(),
            pending_start: None,
            accents: AccentScheduler::new(),
            rng,
            next_epoch: 0,
            events: VecDeque::new(),
            stats: EngineStats::default(),
        };
        if !engine.controls.muted {
            engine.schedule_start();
        }
        engine
    }

    // ── Host controls ──

    pub fn set_time_of_day(&mut self, time_of_day: TimeOfDay) {
        if self.controls.time_of_day == time_of_day {
            return;
        }
        self.controls.time_of_day = time_of_day;
        if self.ctx.is_none() || self.controls.muted {
            return;
        }
        self.begin_stop();
        self.schedule_start();
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.controls.muted == muted {
            return;
        }
        self.controls.muted = muted;
        if self.ctx.is_none() {
            return;
        }
        self.ramp_master();
        if muted {
            self.disarm_start();
            self.begin_stop();
            self.settle_after_stop();
        } else {
            self.schedule_start();
        }
    }

    /// Ramp the master bus to the new volume. The soundscape is not rebuilt.
    pub fn set_volume(&mut self, volume: f64) {
        let volume = sanitize_volume(volume);
        if self.controls.volume == volume {
            return;
        }
        self.controls.volume = volume;
        self.ramp_master();
    }

    /// Apply all three controls at once.
    pub fn update(&mut self, controls: Controls) {
        self.set_volume(controls.volume);
        self.set_muted(controls.muted);
        self.set_time_of_day(controls.time_of_day);
    }

    /// Resume output and rebuild the current soundscape right away, e.g.
    /// after a user gesture unlocks audio.
    pub fn restart(&mut self) {
        let Some(ctx) = self.ctx.as_mut() else {
            return;
        };
        ctx.resume();
        if self.controls.muted {
            return;
        }
        self.disarm_start();
        self.begin_stop();
        self.transition(LifecycleState::Starting);
        self.start_now();
    }

    /// Fade out and release the soundscape. The context stays open.
    pub fn stop(&mut self) {
        if self.ctx.is_none() {
            return;
        }
        self.disarm_start();
        self.begin_stop();
        self.settle_after_stop();
    }

    /// Resume a suspended context without rebuilding.
    pub fn resume(&mut self) {
        if let Some(ctx) = self.ctx.as_mut() {
            ctx.resume();
        }
    }

    /// Play the page-turn rustle into the master bus.
    ///
    /// Independent of the lifecycle: it sounds during fades and while no
    /// soundscape is built. Muted engines ignore it.
    pub fn play_page_turn(&mut self) {
        if self.controls.muted {
            return;
        }
        let Some(ctx) = self.ctx.as_mut() else {
            return;
        };
        // A page turn is a user gesture.
        ctx.resume();

        let now = ctx.current_time();
        let voices = page_turn_voices(self.controls.volume, now, ctx.sample_rate(), &mut self.rng);
        let bursts = voices.len();
        for voice in voices {
            if ctx.add_voice(voice).is_err() {
                return;
            }
        }
        self.stats.page_turn_bursts += bursts as u64;
        self.push_event(EngineEvent::PageTurn { bursts, at: now });
    }

    /// Stop everything, release every graph and close the context.
    /// The engine is inert afterwards.
    pub fn shutdown(&mut self) {
        if self.ctx.is_none() {
            return;
        }
        self.stop();
        let now = self.current_time();
        self.release_retiring(now);
        self.lifecycle.cancel_all();
        self.transition(LifecycleState::Idle);
        if let Some(mut ctx) = self.ctx.take() {
            ctx.close();
        }
        debug!("ambient engine shut down");
    }

    // ── Rendering ──

    /// Render stereo output. Lengths beyond the shorter slice are ignored.
    pub fn render_stereo(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        left[..frames].fill(0.0);
        right[..frames].fill(0.0);

        let mut offset = 0;
        while offset < frames {
            self.pump();
            let Some(ctx) = self.ctx.as_mut() else {
                return;
            };
            let n = RENDER_BLOCK.min(frames - offset);
            let audible = ctx.is_running();

            for i in 0..n {
                let t = ctx.time_at(i);
                let (mut l, mut r) = (0.0, 0.0);
                for graph in self
                    .active
                    .iter_mut()
                    .chain(self.retiring.iter_mut().map(|r| &mut r.graph))
                {
                    let (gl, gr) = graph.next_frame(t);
                    l += gl;
                    r += gr;
                }
                let voices = ctx.voices_sample(t);
                let (out_l, out_r) = ctx.master().process(t, l + voices, r + voices);
                if audible {
                    left[offset + i] = out_l as f32;
                    right[offset + i] = out_r as f32;
                }
            }

            ctx.advance(n);
            let now = ctx.current_time();
            for graph in self
                .active
                .iter_mut()
                .chain(self.retiring.iter_mut().map(|r| &mut r.graph))
            {
                graph.prune(now);
            }
            offset += n;
        }
    }

    /// Render interleaved stereo (`L R L R ...`).
    pub fn render_interleaved(&mut self, out: &mut [f32]) {
        let mut left = [0.0f32; RENDER_BLOCK];
        let mut right = [0.0f32; RENDER_BLOCK];
        for chunk in out.chunks_mut(RENDER_BLOCK * 2) {
            let frames = chunk.len() / 2;
            self.render_stereo(&mut left[..frames], &mut right[..frames]);
            for (i, frame) in chunk.chunks_exact_mut(2).enumerate() {
                frame[0] = left[i];
                frame[1] = right[i];
            }
            if chunk.len() % 2 == 1 {
                if let Some(last) = chunk.last_mut() {
                    *last = 0.0;
                }
            }
        }
    }

    /// Render a mono downmix.
    pub fn render(&mut self, out: &mut [f32]) {
        let mut left = [0.0f32; RENDER_BLOCK];
        let mut right = [0.0f32; RENDER_BLOCK];
        for chunk in out.chunks_mut(RENDER_BLOCK) {
            let frames = chunk.len();
            self.render_stereo(&mut left[..frames], &mut right[..frames]);
            for (i, s) in chunk.iter_mut().enumerate() {
                *s = 0.5 * (left[i] + right[i]);
            }
        }
    }

    /// Render and discard `seconds` of audio. Non-finite durations are
    /// ignored.
    pub fn advance(&mut self, seconds: f64) {
        if !seconds.is_finite() {
            return;
        }
        let Some(ctx) = self.ctx.as_ref() else {
            return;
        };
        let mut remaining = (seconds.max(0.0) * ctx.sample_rate()).round() as usize;
        let mut left = [0.0f32; RENDER_BLOCK];
        let mut right = [0.0f32; RENDER_BLOCK];
        while remaining > 0 {
            let n = remaining.min(RENDER_BLOCK);
            self.render_stereo(&mut left[..n], &mut right[..n]);
            remaining -= n;
        }
    }

    // ── Inspection ──

    pub fn is_available(&self) -> bool {
        self.ctx.is_some()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn controls(&self) -> Controls {
        self.controls
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.table
    }

    pub fn current_time(&self) -> f64 {
        self.ctx.as_ref().map_or(0.0, AudioContext::current_time)
    }

    /// Master bus gain right now.
    pub fn master_gain(&self) -> f64 {
        self.ctx
            .as_ref()
            .map_or(0.0, |ctx| ctx.master().gain_at(ctx.current_time()))
    }

    /// Summed drone gain of every live graph right now.
    pub fn drone_level(&self) -> f64 {
        let now = self.current_time();
        self.graphs().map(|g| g.drone_level(now)).sum()
    }

    pub fn live_drone_oscillators(&self) -> usize {
        self.graphs().map(DroneGraph::live_oscillators).sum()
    }

    /// Active graph plus graphs still fading out.
    pub fn live_graphs(&self) -> usize {
        self.graphs().count()
    }

    pub fn active_time_of_day(&self) -> Option<TimeOfDay> {
        self.active.as_ref().map(DroneGraph::time_of_day)
    }

    pub fn active_voices(&self) -> usize {
        self.ctx.as_ref().map_or(0, AudioContext::active_voices)
    }

    pub fn pending_accents(&self) -> usize {
        self.accents.pending()
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.events.drain(..).collect()
    }

    // ── Internals ──

    fn graphs(&self) -> impl Iterator<Item = &DroneGraph> {
        self.active
            .iter()
            .chain(self.retiring.iter().map(|r| &r.graph))
    }

    fn transition(&mut self, next: LifecycleState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = ?self.state, to = ?next, "refused lifecycle transition");
            return false;
        }
        debug!(from = ?self.state, to = ?next, "lifecycle transition");
        self.state = next;
        true
    }

    fn ramp_master(&mut self) {
        let target = master_target(&self.config, &self.controls);
        if let Some(ctx) = self.ctx.as_mut() {
            let now = ctx.current_time();
            ctx.master_mut().ramp_to(target, now, self.config.volume_ramp_s);
        }
    }

    /// Arm (or re-arm) the deferred build.
    fn schedule_start(&mut self) {
        let Some(ctx) = self.ctx.as_ref() else {
            return;
        };
        let due = ctx.current_time() + self.config.start_delay_s;
        self.disarm_start();
        self.pending_start = Some(self.lifecycle.arm(due, LifecycleTask::Start));
        self.transition(LifecycleState::Starting);
    }

    fn disarm_start(&mut self) -> bool {
        match self.pending_start.take() {
            Some(id) => self.lifecycle.cancel(id).is_some(),
            None => false,
        }
    }

    /// After a stop with no start pending: Stopping while graphs still fade,
    /// otherwise Idle.
    fn settle_after_stop(&mut self) {
        if matches!(self.state, LifecycleState::Starting | LifecycleState::Stopping) {
            let next = if self.retiring.is_none() {
                LifecycleState::Idle
            } else {
                LifecycleState::Stopping
            };
            self.transition(next);
        }
    }

    /// Cancel the accents and fade the active graph out. It is released by
    /// a timer once the fade has run.
    fn begin_stop(&mut self) {
        self.accents.cancel_all();
        let Some(mut graph) = self.active.take() else {
            return;
        };
        let now = self.current_time();
        self.release_retiring(now);
        graph.fade_out(now, self.config.fade_out_s);
        let release = self.lifecycle.arm(
            now + self.config.release_delay_s,
            LifecycleTask::Release { epoch: graph.epoch() },
        );
        self.retiring = Some(Retiring { graph, release });
        self.transition(LifecycleState::Stopping);
    }

    /// Release the fading graph now, disarming its release timer.
    fn release_retiring(&mut self, now: f64) {
        if let Some(mut old) = self.retiring.take() {
            self.lifecycle.cancel(old.release);
            self.release_graph(&mut old.graph, now);
        }
    }

    /// Build the soundscape for the current time of day and arm its accents.
    fn start_now(&mut self) {
        self.pending_start = None;
        if self.controls.muted || self.ctx.is_none() {
            self.settle_after_stop();
            return;
        }
        if self.active.is_some() {
            self.begin_stop();
            self.transition(LifecycleState::Starting);
        }

        let Some(ctx) = self.ctx.as_ref() else {
            return;
        };
        let now = ctx.current_time();
        let sample_rate = ctx.sample_rate();
        let time_of_day = self.controls.time_of_day;
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let profile = self.table.profile_for(time_of_day);
        match DroneGraph::build(
            &profile,
            time_of_day,
            epoch,
            now,
            sample_rate,
            &self.config,
            &mut self.rng,
        ) {
            Ok(graph) => {
                self.accents.arm(epoch, &profile.accents, now, &mut self.rng);
                self.active = Some(graph);
                self.stats.graphs_built += 1;
                self.push_event(EngineEvent::GraphBuilt {
                    epoch,
                    time_of_day,
                    at: now,
                });
                self.transition(LifecycleState::Active);
            }
            Err(err) => {
                warn!(%err, %time_of_day, "soundscape build failed");
                self.stats.build_failures += 1;
                self.push_event(EngineEvent::BuildFailed {
                    time_of_day,
                    reason: err.to_string(),
                    at: now,
                });
                self.settle_after_stop();
            }
        }
    }

    fn release_graph(&mut self, graph: &mut DroneGraph, now: f64) {
        graph.stop();
        self.stats.graphs_released += 1;
        self.push_event(EngineEvent::GraphReleased {
            epoch: graph.epoch(),
            time_of_day: graph.time_of_day(),
            at: now,
        });
    }

    /// Run everything due on the audio clock.
    fn pump(&mut self) {
        let Some(now) = self.ctx.as_ref().map(AudioContext::current_time) else {
            return;
        };

        while let Some((_, task)) = self.lifecycle.pop_due(now) {
            match task {
                LifecycleTask::Start => self.start_now(),
                LifecycleTask::Release { epoch } => {
                    if self.retiring.as_ref().is_some_and(|r| r.graph.epoch() == epoch) {
                        self.release_retiring(now);
                    }
                    if self.state == LifecycleState::Stopping && self.retiring.is_none() {
                        self.transition(LifecycleState::Idle);
                    }
                }
            }
        }

        for firing in self.accents.poll(now, &mut self.rng) {
            self.fire_accent(firing, now);
        }
    }

    fn fire_accent(&mut self, firing: AccentFiring, now: f64) {
        let live = self
            .active
            .as_ref()
            .is_some_and(|g| g.epoch() == firing.epoch);
        if !live {
            self.stats.stale_firings += 1;
            trace!(epoch = firing.epoch, "discarding accent for a released graph");
            return;
        }
        let Some(ctx) = self.ctx.as_mut() else {
            return;
        };
        if !ctx.is_running() {
            self.stats.accents_skipped += 1;
            return;
        }
        let Some(accent) = self.accents.descriptor(firing.index) else {
            return;
        };

        let voice = make_accent_voice(
            accent,
            self.controls.volume,
            now,
            ctx.sample_rate(),
            &mut self.rng,
        );
        let label = accent.label.clone();
        if ctx.add_voice(voice).is_ok() {
            trace!(%label, at = now, "accent");
            self.stats.accents_fired += 1;
            self.push_event(EngineEvent::AccentFired {
                epoch: firing.epoch,
                label,
                at: now,
            });
        }
    }

    fn push_event(&mut self, event: EngineEvent) {
        if self.events.len() == EVENT_QUEUE_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

impl Drop for AmbientEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn master_target(config: &EngineConfig, controls: &Controls) -> f64 {
    if controls.muted {
        0.0
    } else {
        controls.volume * config.master_scale
    }
}

fn sanitize_volume(volume: f64) -> f64 {
    if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ReverbSettings;

    const SR: f64 = 8000.0;

    fn config() -> EngineConfig {
        EngineConfig::default().with_sample_rate(SR).with_seed(7)
    }

    fn engine_at(time_of_day: TimeOfDay) -> AmbientEngine {
        AmbientEngine::new(
            config(),
            Controls {
                time_of_day,
                muted: false,
                volume: 0.5,
            },
        )
    }

    fn fired_labels(events: &[EngineEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::AccentFired { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn state_machine_edges() {
        use LifecycleState::*;
        assert!(Idle.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Active));
        assert!(Active.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Starting));
        assert!(Stopping.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Active), "must build through Starting");
        assert!(!Active.can_transition_to(Idle), "must fade through Stopping");
        assert!(!Stopping.can_transition_to(Active));
    }

    #[test]
    fn starts_after_short_delay() {
        let mut engine = engine_at(TimeOfDay::Evening);
        assert_eq!(engine.state(), LifecycleState::Starting);
        assert_eq!(engine.live_graphs(), 0);

        engine.advance(0.2);
        assert_eq!(engine.state(), LifecycleState::Active);
        assert_eq!(engine.live_drone_oscillators(), 3);
        assert_eq!(engine.active_time_of_day(), Some(TimeOfDay::Evening));
        assert_eq!(engine.pending_accents(), 8);
        assert!(matches!(
            engine.drain_events().first(),
            Some(EngineEvent::GraphBuilt { time_of_day: TimeOfDay::Evening, .. })
        ));
    }

    #[test]
    fn muted_engine_stays_idle() {
        let mut engine = AmbientEngine::new(
            config(),
            Controls {
                muted: true,
                ..Controls::default()
            },
        );
        engine.advance(3.0);
        assert_eq!(engine.state(), LifecycleState::Idle);
        assert_eq!(engine.live_graphs(), 0);
        assert_eq!(engine.master_gain(), 0.0);
    }

    #[test]
    fn no_duplicate_graphs_after_rapid_changes() {
        let mut engine = engine_at(TimeOfDay::Morning);
        engine.advance(0.5);
        let sequence = [
            TimeOfDay::Night,
            TimeOfDay::Evening,
            TimeOfDay::Afternoon,
            TimeOfDay::Night,
            TimeOfDay::Morning,
            TimeOfDay::Evening,
        ];
        for (i, time) in sequence.into_iter().enumerate() {
            engine.set_time_of_day(time);
            engine.advance(0.03 + 0.07 * i as f64);
            assert!(engine.live_graphs() <= 2, "at most one graph tails the active one");
        }
        engine.advance(1.0);
        assert_eq!(engine.live_graphs(), 1);
        assert_eq!(engine.live_drone_oscillators(), 3);
        assert_eq!(engine.active_time_of_day(), Some(TimeOfDay::Evening));
        assert_eq!(engine.state(), LifecycleState::Active);
        assert_eq!(engine.pending_accents(), 8, "exactly one set of lineages");
    }

    #[test]
    fn restart_burst_keeps_a_single_tail() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.advance(1.0);
        for _ in 0..20 {
            engine.restart();
            assert!(engine.live_graphs() <= 2, "{} graphs live", engine.live_graphs());
            assert!(engine.live_drone_oscillators() <= 6);
        }
        assert_eq!(engine.stats().graphs_built, 21);
        assert_eq!(engine.stats().graphs_released, 19);
        assert_eq!(engine.lifecycle.len(), 1, "only the newest tail keeps a release timer");

        engine.advance(1.0);
        assert_eq!(engine.live_graphs(), 1);
        assert_eq!(engine.stats().graphs_released, 20);
        assert_eq!(engine.state(), LifecycleState::Active);
    }

    #[test]
    fn alternating_time_changes_keep_a_single_tail() {
        let mut engine = engine_at(TimeOfDay::Morning);
        engine.advance(0.5);
        let mut most = 0;
        for i in 0..30 {
            let time = if i % 2 == 0 { TimeOfDay::Night } else { TimeOfDay::Morning };
            engine.set_time_of_day(time);
            engine.advance(0.12);
            most = most.max(engine.live_graphs());
        }
        assert_eq!(most, 2, "old and new drones overlap, nothing older");
        engine.advance(1.0);
        assert_eq!(engine.live_graphs(), 1);
        assert_eq!(engine.active_time_of_day(), Some(TimeOfDay::Morning));
    }

    #[test]
    fn update_applies_every_control() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.advance(0.5);

        let night = Controls {
            time_of_day: TimeOfDay::Night,
            muted: false,
            volume: 0.8,
        };
        engine.update(night);
        assert_eq!(engine.controls(), night);
        engine.advance(0.3);
        assert_eq!(engine.active_time_of_day(), Some(TimeOfDay::Night));
        assert!((engine.master_gain() - 0.4).abs() < 1e-12);

        engine.update(Controls {
            muted: true,
            time_of_day: TimeOfDay::Morning,
            ..night
        });
        assert!(engine.controls().muted);
        assert_eq!(engine.state(), LifecycleState::Stopping);
        engine.advance(1.0);
        assert_eq!(engine.state(), LifecycleState::Idle);
        assert_eq!(engine.master_gain(), 0.0);
        assert_eq!(engine.live_graphs(), 0);
    }

    #[test]
    fn non_finite_advance_is_ignored() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.advance(0.25);
        let before = engine.current_time();
        engine.advance(f64::INFINITY);
        engine.advance(f64::NAN);
        engine.advance(-3.0);
        assert_eq!(engine.current_time(), before);
    }

    #[test]
    fn stop_cancels_every_accent_timer() {
        let mut engine = engine_at(TimeOfDay::Night);
        engine.advance(5.0);
        assert!(engine.stats().accents_fired > 0);

        engine.stop();
        assert_eq!(engine.state(), LifecycleState::Stopping);
        assert_eq!(engine.pending_accents(), 0);
        let fired = engine.stats().accents_fired;
        engine.drain_events();

        // Longest night interval is 30 s.
        engine.advance(35.0);
        assert_eq!(engine.stats().accents_fired, fired);
        assert!(fired_labels(&engine.drain_events()).is_empty());
        assert_eq!(engine.state(), LifecycleState::Idle);
        assert_eq!(engine.live_graphs(), 0);
        assert_eq!(engine.live_drone_oscillators(), 0);
    }

    #[test]
    fn stop_releases_graph_after_fade() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.advance(3.0);
        engine.stop();
        engine.advance(0.25);
        assert_eq!(engine.live_graphs(), 1, "still fading");
        assert!(engine.drone_level() > 0.0);
        engine.advance(0.5);
        assert_eq!(engine.live_graphs(), 0);
        let released = engine
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::GraphReleased { .. }))
            .count();
        assert_eq!(released, 1);
        assert_eq!(engine.stats().graphs_released, 1);
    }

    #[test]
    fn mute_is_idempotent() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.advance(3.0);

        engine.set_muted(true);
        engine.advance(0.2);
        let state = engine.state();
        let gain = engine.master_gain();
        let stats = engine.stats();

        engine.set_muted(true);
        engine.advance(0.0);
        assert_eq!(engine.state(), state);
        assert_eq!(engine.master_gain(), gain);
        assert_eq!(engine.stats(), stats);
        assert_eq!(gain, 0.0);

        engine.advance(1.0);
        assert_eq!(engine.state(), LifecycleState::Idle);
        assert_eq!(engine.master_gain(), 0.0);
    }

    #[test]
    fn unmute_rebuilds() {
        let mut engine = engine_at(TimeOfDay::Afternoon);
        engine.advance(1.0);
        engine.set_muted(true);
        engine.advance(1.0);
        engine.set_muted(false);
        assert_eq!(engine.state(), LifecycleState::Starting);
        engine.advance(0.3);
        assert_eq!(engine.state(), LifecycleState::Active);
        assert!((engine.master_gain() - 0.25).abs() < 1e-12);
        assert_eq!(engine.stats().graphs_built, 2);
    }

    #[test]
    fn volume_is_monotonic_and_zero_matches_mute() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.advance(0.5);
        let built = engine.stats().graphs_built;

        let mut last = -1.0;
        for volume in [0.0, 0.1, 0.4, 0.7, 1.0] {
            engine.set_volume(volume);
            engine.advance(0.2);
            let gain = engine.master_gain();
            assert!(gain > last || (volume == 0.0 && gain == 0.0), "{volume} -> {gain}");
            last = gain;
        }
        assert!((last - 0.5).abs() < 1e-12);
        assert_eq!(engine.stats().graphs_built, built, "volume never rebuilds");
        assert_eq!(engine.state(), LifecycleState::Active);

        engine.set_volume(0.0);
        engine.advance(0.2);
        let at_zero = engine.master_gain();
        let mut muted = engine_at(TimeOfDay::Evening);
        muted.set_muted(true);
        muted.advance(0.2);
        assert_eq!(at_zero, muted.master_gain());
    }

    #[test]
    fn out_of_range_volume_is_clamped() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.set_volume(7.0);
        engine.advance(0.2);
        assert!((engine.master_gain() - 0.5).abs() < 1e-12);
        engine.set_volume(f64::NAN);
        engine.advance(0.2);
        assert_eq!(engine.master_gain(), 0.0);
    }

    #[test]
    fn cross_fade_has_no_dead_zone() {
        let mut engine = engine_at(TimeOfDay::Night);
        engine.advance(3.0);
        engine.set_time_of_day(TimeOfDay::Morning);

        let step = 0.01;
        let mut silent_run = 0.0_f64;
        let mut longest = 0.0_f64;
        for _ in 0..300 {
            engine.advance(step);
            if engine.drone_level() < 1e-4 {
                silent_run += step;
                longest = longest.max(silent_run);
            } else {
                silent_run = 0.0;
            }
        }
        assert!(longest <= 0.5, "drone dead zone of {longest} s");
        assert_eq!(engine.live_graphs(), 1);
        assert_eq!(engine.active_time_of_day(), Some(TimeOfDay::Morning));
    }

    #[test]
    fn cross_fade_overlaps_old_and_new_drones() {
        let mut engine = engine_at(TimeOfDay::Night);
        engine.advance(3.0);
        engine.set_time_of_day(TimeOfDay::Evening);
        engine.advance(0.2);
        assert_eq!(engine.live_graphs(), 2, "old drone still fading under the new one");
        assert_eq!(engine.state(), LifecycleState::Active);
        engine.advance(0.6);
        assert_eq!(engine.live_graphs(), 1);
    }

    #[test]
    fn night_to_morning_replaces_accent_set() {
        let mut engine = engine_at(TimeOfDay::Night);
        engine.advance(12.0);
        let night = fired_labels(&engine.drain_events());
        assert!(night.iter().any(|l| l.starts_with("cricket")), "{night:?}");
        assert!(night.iter().any(|l| l.starts_with("fire")), "{night:?}");

        engine.set_time_of_day(TimeOfDay::Morning);
        engine.advance(2.5);
        engine.advance(20.0);
        let morning = fired_labels(&engine.drain_events());
        let allowed = engine.profiles().profile_for(TimeOfDay::Morning);
        for label in &morning {
            assert!(
                allowed.accents.iter().any(|a| &a.label == label),
                "night accent {label} fired after the switch"
            );
        }
        assert!(morning.iter().any(|l| l.starts_with("bird")), "{morning:?}");
        assert!(morning.iter().any(|l| l == "clock_tick"));
    }

    #[test]
    fn page_turn_plays_while_stopping() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.advance(1.0);
        engine.stop();
        assert_eq!(engine.state(), LifecycleState::Stopping);

        let voices_before = engine.active_voices();
        engine.play_page_turn();
        assert_eq!(engine.active_voices(), voices_before + 3);
        assert_eq!(engine.stats().page_turn_bursts, 3);

        let mut out = vec![0.0f32; 1600];
        engine.render(&mut out);
        assert!(out.iter().any(|s| s.abs() > 1e-5));
        assert_eq!(engine.state(), LifecycleState::Stopping);
    }

    #[test]
    fn page_turn_sounds_without_soundscape() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.stop();
        assert_eq!(engine.state(), LifecycleState::Idle);
        engine.play_page_turn();

        let mut out = vec![0.0f32; 2400];
        engine.render(&mut out);
        let peak = out.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 1e-4, "page turn should be audible, got {peak}");
        assert_eq!(engine.active_voices(), 0, "bursts dispose themselves");
    }

    #[test]
    fn page_turn_is_silent_when_muted() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.set_muted(true);
        engine.play_page_turn();
        assert_eq!(engine.active_voices(), 0);
        assert_eq!(engine.stats().page_turn_bursts, 0);
    }

    #[test]
    fn stale_firing_is_discarded() {
        let mut engine = engine_at(TimeOfDay::Night);
        engine.advance(0.5);
        let voices = engine.active_voices();
        let epoch = engine.active.as_ref().map(DroneGraph::epoch).unwrap();
        engine.fire_accent(AccentFiring { epoch: epoch + 10, index: 0 }, engine.current_time());
        assert_eq!(engine.stats().stale_firings, 1);
        assert_eq!(engine.active_voices(), voices);
    }

    #[test]
    fn restart_rebuilds_immediately() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.advance(2.0);
        engine.restart();
        assert_eq!(engine.state(), LifecycleState::Active);
        assert_eq!(engine.stats().graphs_built, 2);
        assert_eq!(engine.live_graphs(), 2);
        engine.advance(1.0);
        assert_eq!(engine.live_graphs(), 1);
        assert_eq!(engine.live_drone_oscillators(), 3);
    }

    #[test]
    fn suspended_context_skips_accents_until_restart() {
        let cfg = EngineConfig {
            start_suspended: true,
            ..config()
        };
        let mut engine = AmbientEngine::new(cfg, Controls::default());
        let mut out = vec![1.0f32; 8000 * 5];
        engine.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0), "suspended output is silent");
        assert_eq!(engine.stats().accents_fired, 0);
        assert!(engine.stats().accents_skipped > 0);

        engine.restart();
        engine.advance(5.0);
        assert!(engine.stats().accents_fired > 0);
    }

    #[test]
    fn unavailable_audio_makes_everything_a_no_op() {
        let mut engine = AmbientEngine::new(
            EngineConfig::default().with_sample_rate(0.0),
            Controls::default(),
        );
        assert!(!engine.is_available());
        engine.set_time_of_day(TimeOfDay::Night);
        engine.set_muted(true);
        engine.set_muted(false);
        engine.set_volume(1.0);
        engine.restart();
        engine.play_page_turn();
        engine.stop();

        let mut out = vec![0.5f32; 512];
        engine.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(engine.state(), LifecycleState::Idle);
        assert_eq!(engine.live_graphs(), 0);
        assert_eq!(engine.current_time(), 0.0);
        assert!(engine.drain_events().is_empty());
    }

    #[test]
    fn failed_build_leaves_nothing_running() {
        let mut table = ProfileTable::builtin();
        // Valid on paper, but shorter than one sample at 8 kHz.
        table.base.reverb = Some(ReverbSettings { decay_s: 0.0001 });
        let mut engine = AmbientEngine::with_table(config(), table, Controls::default());
        engine.advance(0.5);

        assert_eq!(engine.state(), LifecycleState::Idle);
        assert_eq!(engine.live_graphs(), 0);
        assert_eq!(engine.pending_accents(), 0);
        assert_eq!(engine.stats().build_failures, 1);
        assert!(
            engine
                .drain_events()
                .iter()
                .any(|e| matches!(e, EngineEvent::BuildFailed { .. }))
        );
    }

    #[test]
    fn shutdown_releases_everything() {
        let mut engine = engine_at(TimeOfDay::Night);
        engine.advance(2.0);
        engine.set_time_of_day(TimeOfDay::Morning);
        engine.advance(0.2);
        engine.shutdown();

        assert!(!engine.is_available());
        assert_eq!(engine.live_graphs(), 0);
        assert_eq!(engine.pending_accents(), 0);
        assert_eq!(engine.state(), LifecycleState::Idle);
        assert_eq!(engine.stats().graphs_released, 2);

        engine.restart();
        engine.play_page_turn();
        engine.advance(1.0);
        assert_eq!(engine.live_graphs(), 0);
    }

    #[test]
    fn event_queue_is_bounded() {
        let mut engine = engine_at(TimeOfDay::Evening);
        for _ in 0..(EVENT_QUEUE_CAPACITY + 40) {
            engine.play_page_turn();
        }
        let events = engine.drain_events();
        assert_eq!(events.len(), EVENT_QUEUE_CAPACITY);
        assert!(engine.drain_events().is_empty());
    }

    #[test]
    fn interleaved_output_mirrors_stereo_layout() {
        let mut engine = engine_at(TimeOfDay::Evening);
        engine.advance(2.5);
        let mut out = vec![0.0f32; 1001];
        engine.render_interleaved(&mut out);
        assert_eq!(out[1000], 0.0, "odd trailing sample is left silent");
        assert!(out[..1000].iter().any(|s| s.abs() > 1e-4));
        let expected = 2.5 + 500.0 / SR;
        assert!((engine.current_time() - expected).abs() < 1e-9);
    }
}
