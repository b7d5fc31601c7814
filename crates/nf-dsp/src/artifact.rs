use nf_core::band::{ALPHA_BURST, BLINK, FrequencyBand, JAW_CLENCH};
use nf_core::config::{ArtifactConfig, NeuroConfig};
use nf_core::frame::{ArtifactFlags, SampleFrame};

use crate::buffer::SampleBuffer;
use crate::welch::WelchEstimator;

/// Détecteur d'artefacts à seuils statiques, sur son propre buffer brut.
///
/// Politique de déclenchement :
/// - clignement : **au moins un** canal frontal au-dessus du seuil ;
/// - crispation de mâchoire : **au moins un** canal normalisé au-dessus ;
/// - bouffée alpha : **tous** les canaux occipitaux au-dessus.
///
/// # Example
/// ```
/// use nf_core::config::NeuroConfig;
/// use nf_core::frame::SampleFrame;
/// use nf_dsp::artifact::ArtifactDetector;
///
/// let mut detector = ArtifactDetector::from_config(&NeuroConfig::default());
/// detector.update(&SampleFrame::new(vec![vec![0.0; 256]; 4]));
/// assert!(!detector.detect().any());
/// ```
pub struct ArtifactDetector {
    buffer: SampleBuffer,
    welch: WelchEstimator,
    config: ArtifactConfig,
}

impl ArtifactDetector {
    #[must_use]
    pub fn new(channels: usize, sample_rate: f64, config: ArtifactConfig) -> Self {
        Self {
            buffer: SampleBuffer::new(channels, config.buffer_size),
            welch: WelchEstimator::new(sample_rate, sample_rate.round().max(1.0) as usize),
            config,
        }
    }

    #[must_use]
    pub fn from_config(config: &NeuroConfig) -> Self {
        Self::new(
            config.channels,
            config.signal.sample_rate,
            config.artifact.clone(),
        )
    }

    /// Ingère une frame dans le buffer du détecteur.
    pub fn update(&mut self, frame: &SampleFrame) {
        self.buffer.update(frame);
    }

    /// Puissance sommée de la bande pour chaque canal demandé.
    /// Canal hors buffer → 0.
    fn band_power(&self, channels: impl IntoIterator<Item = usize>, band: &FrequencyBand) -> Vec<f64> {
        channels
            .into_iter()
            .map(|ch| {
                if ch >= self.buffer.channels() {
                    return 0.0;
                }
                let p = self.welch.estimate(self.buffer.channel(ch)).band_sum(band);
                if p.is_finite() { p } else { 0.0 }
            })
            .collect()
    }

    #[must_use]
    pub fn detect_blink(&self) -> bool {
        self.band_power(self.config.blink_channels.iter().copied(), &BLINK)
            .iter()
            .any(|&p| p > self.config.blink_threshold)
    }

    /// Normalise par la puissance maximale ; maximum nul → pas d'événement.
    #[must_use]
    pub fn detect_jaw_clench(&self) -> bool {
        let power = self.band_power(0..self.buffer.channels(), &JAW_CLENCH);
        let max = power.iter().copied().fold(0.0, f64::max);
        if max <= 0.0 {
            return false;
        }
        power
            .iter()
            .any(|&p| p / max > self.config.clench_threshold)
    }

    #[must_use]
    pub fn detect_alpha_burst(&self) -> bool {
        let power = self.band_power(self.config.alpha_burst_channels.iter().copied(), &ALPHA_BURST);
        !power.is_empty() && power.iter().all(|&p| p > self.config.alpha_burst_threshold)
    }

    /// Les trois détecteurs sur l'état courant du buffer.
    #[must_use]
    pub fn detect(&self) -> ArtifactFlags {
        ArtifactFlags {
            blink: self.detect_blink(),
            jaw_clench: self.detect_jaw_clench(),
            alpha_burst: self.detect_alpha_burst(),
        }
    }
}
