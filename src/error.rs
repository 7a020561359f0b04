//! Error types for the soundscape engine.
//!
//! These only surface from fallible constructors. `AmbientEngine` absorbs
//! every one of them so the host never sees an audio failure.

use thiserror::Error;

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

#[derive(Debug, Error)]
pub enum AudioError {
    /// The requested sample rate cannot drive an output device.
    #[error("invalid sample rate: {rate}")]
    InvalidSampleRate { rate: f64 },

    /// A profile or accent descriptor breaks one of its invariants.
    #[error("invalid profile '{field}': {message}")]
    InvalidProfile { field: String, message: String },

    /// An engine configuration value is out of range.
    #[error("invalid config '{field}': {message}")]
    InvalidConfig { field: String, message: String },

    /// FFT planning or processing failed while preparing the reverb.
    #[error("fft error: {0}")]
    Fft(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The audio context has already been released.
    #[error("audio context is closed")]
    ContextClosed,
}

impl AudioError {
    pub fn invalid_profile(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidProfile {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_error_names_field() {
        let err = AudioError::invalid_profile("accents[2].interval_ms", "min exceeds max");
        let msg = err.to_string();
        assert!(msg.contains("accents[2].interval_ms"), "got {msg}");
        assert!(msg.contains("min exceeds max"), "got {msg}");
    }

    #[test]
    fn json_errors_convert() {
        let parse = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err: AudioError = parse.into();
        assert!(matches!(err, AudioError::Json(_)));
    }
}
