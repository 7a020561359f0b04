//! DSP building blocks for the soundscape.
//!
//! Everything is sample-accurate against the audio clock: parameters are
//! automation curves evaluated per sample, and voices know their own start
//! and stop times.

pub mod envelope;
pub mod filter;
pub mod mixer;
pub mod oscillator;
pub mod param;
pub mod reverb;
pub mod voice;
