//! Configuration, types, and shared structures for neurofocus.
//!
//! This crate contains the frame and score types, the frequency band
//! catalog, and the configuration logic used across the workspace.

pub mod band;
pub mod config;
pub mod error;
pub mod frame;

pub use band::FrequencyBand;
pub use config::NeuroConfig;
pub use error::ConfigError;
pub use frame::{ArtifactFlags, SampleFrame, ScoreSet, TickPayload};
