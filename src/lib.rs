pub mod config;
pub mod context;
pub mod dsp;
pub mod effects;
pub mod engine;
pub mod error;
pub mod graph;
pub mod profile;
pub mod scheduler;

use crate::config::EngineConfig;
use crate::engine::{AmbientEngine, Controls};
use crate::profile::TimeOfDay;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the soundscape-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// WASM-exposed: the merged built-in profile for a time of day, as a JS object.
#[wasm_bindgen]
pub fn soundscape_profile(time_of_day: &str) -> Result<JsValue, JsValue> {
    let time: TimeOfDay = time_of_day
        .parse()
        .map_err(|e| JsValue::from_str(&format!("{e}")))?;
    serde_wasm_bindgen::to_value(&profile::profile_for(time))
        .map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed ambient soundscape, driven from an AudioWorklet.
///
/// Control calls never throw. Output is pulled with `process` (mono) or
/// `processInterleaved` (stereo) at the worklet's render quantum.
#[wasm_bindgen]
pub struct AmbientSoundscape {
    engine: AmbientEngine,
}

#[wasm_bindgen]
impl AmbientSoundscape {
    #[wasm_bindgen(constructor)]
    pub fn new(sample_rate: f64) -> AmbientSoundscape {
        Self::from_config(EngineConfig::default().with_sample_rate(sample_rate))
    }

    /// Deterministic variant for reproducible renders.
    #[wasm_bindgen(js_name = withSeed)]
    pub fn with_seed(sample_rate: f64, seed: u32) -> AmbientSoundscape {
        Self::from_config(
            EngineConfig::default()
                .with_sample_rate(sample_rate)
                .with_seed(u64::from(seed)),
        )
    }

    fn from_config(config: EngineConfig) -> AmbientSoundscape {
        AmbientSoundscape {
            engine: AmbientEngine::new(config, Controls::default()),
        }
    }

    /// Unknown names are logged and ignored.
    #[wasm_bindgen(js_name = setTimeOfDay)]
    pub fn set_time_of_day(&mut self, time_of_day: &str) {
        match time_of_day.parse::<TimeOfDay>() {
            Ok(time) => self.engine.set_time_of_day(time),
            Err(err) => tracing::warn!(%err, "ignoring time of day"),
        }
    }

    #[wasm_bindgen(js_name = setMuted)]
    pub fn set_muted(&mut self, muted: bool) {
        self.engine.set_muted(muted);
    }

    #[wasm_bindgen(js_name = setVolume)]
    pub fn set_volume(&mut self, volume: f64) {
        self.engine.set_volume(volume);
    }

    #[wasm_bindgen(js_name = playPageTurn)]
    pub fn play_page_turn(&mut self) {
        self.engine.play_page_turn();
    }

    pub fn restart(&mut self) {
        self.engine.restart();
    }

    pub fn stop(&mut self) {
        self.engine.stop();
    }

    pub fn resume(&mut self) {
        self.engine.resume();
    }

    pub fn process(&mut self, output: &mut [f32]) {
        self.engine.render(output);
    }

    #[wasm_bindgen(js_name = processInterleaved)]
    pub fn process_interleaved(&mut self, output: &mut [f32]) {
        self.engine.render_interleaved(output);
    }

    pub fn state(&self) -> String {
        self.engine.state().as_str().to_string()
    }

    #[wasm_bindgen(getter, js_name = currentTime)]
    pub fn current_time(&self) -> f64 {
        self.engine.current_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_matches_manifest() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn soundscape_class_drives_the_engine() {
        let mut soundscape = AmbientSoundscape::with_seed(8000.0, 3);
        assert_eq!(soundscape.state(), "starting");

        soundscape.set_time_of_day("  NIGHT ");
        soundscape.set_time_of_day("dusk");
        let mut block = vec![0.0f32; 128];
        for _ in 0..20 {
            soundscape.process(&mut block);
        }
        assert_eq!(soundscape.state(), "active");
        assert_eq!(
            soundscape.engine.active_time_of_day(),
            Some(TimeOfDay::Night),
            "bad names are ignored"
        );

        soundscape.set_muted(true);
        soundscape.process_interleaved(&mut vec![0.0f32; 256]);
        assert_eq!(soundscape.state(), "stopping");
        assert!(soundscape.current_time() > 0.3);
    }

    #[test]
    fn unavailable_rate_is_silent() {
        let mut soundscape = AmbientSoundscape::new(0.0);
        let mut block = vec![1.0f32; 128];
        soundscape.process(&mut block);
        soundscape.play_page_turn();
        assert!(block.iter().all(|&s| s == 0.0));
        assert_eq!(soundscape.state(), "idle");
    }
}
