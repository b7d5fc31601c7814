// Traitement du signal EEG pour neurofocus : fenêtre glissante, filtrage,
// DSP de Welch, scores dérivés et détection d'artefacts.

pub mod artifact;
pub mod buffer;
pub mod filter;
pub mod pulse;
pub mod spectral;
pub mod welch;

pub use artifact::ArtifactDetector;
pub use buffer::SampleBuffer;
pub use filter::SignalFilter;
pub use pulse::PulseTracker;
pub use spectral::SpectralScorer;
pub use welch::{Psd, WelchEstimator};
