use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration complète du pipeline, hot-rechargeable.
///
/// Sérialisable en TOML. Chaque champ a une valeur par défaut saine
/// (Muse 2 : 4 canaux TP9, AF7, AF8, TP10 à 256 Hz).
///
/// # Example
/// ```
/// use nf_core::config::NeuroConfig;
/// let config = NeuroConfig::default();
/// assert_eq!(config.channels, 4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct NeuroConfig {
    /// Nombre de canaux EEG C.
    pub channels: usize,
    pub signal: SignalConfig,
    pub spectral: SpectralConfig,
    pub artifact: ArtifactConfig,
    pub session: SessionConfig,
}

/// Acquisition et filtrage.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SignalConfig {
    /// Fréquence d'échantillonnage EEG en Hz.
    pub sample_rate: f64,
    /// Capacité N du buffer de fenêtre (échantillons par canal).
    pub window_size: usize,
    /// Coupure basse du passe-bande.
    pub low_cut_hz: f64,
    /// Coupure haute du passe-bande.
    pub high_cut_hz: f64,
    /// Ordre Butterworth.
    pub filter_order: usize,
}

/// Estimation spectrale et scores dérivés.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SpectralConfig {
    /// Taille de segment Welch.
    pub segment_len: usize,
    /// Canal hémisphère gauche pour l'asymétrie frontale (AF7).
    pub asymmetry_left: usize,
    /// Canal hémisphère droit pour l'asymétrie frontale (AF8).
    pub asymmetry_right: usize,
    /// Canaux du score de concentration.
    pub frontal_channels: Vec<usize>,
    /// Canaux du score d'immersion.
    pub occipital_channels: Vec<usize>,
    /// Seuil accéléromètre (g).
    pub accel_threshold: f64,
    /// Seuil gyroscope (deg/s).
    pub gyro_threshold: f64,
    /// Fréquence d'échantillonnage PPG.
    pub ppg_rate: f64,
    /// Historique PPG minimal avant calcul de la HRV.
    pub ppg_min_history_secs: f64,
    /// Historique PPG conservé.
    pub ppg_history_secs: f64,
    /// Écart minimal entre deux pics PPG.
    pub ppg_min_peak_spacing_secs: f64,
}

/// Détection d'artefacts, seuils statiques.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ArtifactConfig {
    /// Capacité du buffer propre au détecteur.
    pub buffer_size: usize,
    /// Canaux frontaux surveillés pour les clignements (AF7, AF8).
    pub blink_channels: Vec<usize>,
    pub blink_threshold: f64,
    /// Seuil sur la puissance normalisée par le canal maximal.
    pub clench_threshold: f64,
    /// Canaux surveillés pour les bouffées alpha (tous doivent dépasser).
    pub alpha_burst_channels: Vec<usize>,
    pub alpha_burst_threshold: f64,
}

/// Cadence et métriques de session.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Intervalle cible entre deux ticks.
    pub tick_ms: u64,
    /// Attention sous laquelle un décrochage est enregistré.
    pub drop_threshold: f64,
    /// Échecs de lecture consécutifs tolérés avant arrêt.
    pub max_consecutive_failures: u32,
}

impl Default for NeuroConfig {
    fn default() -> Self {
        Self {
            channels: 4,
            signal: SignalConfig {
                sample_rate: 256.0,
                window_size: 512,
                low_cut_hz: 0.5,
                high_cut_hz: 50.0,
                filter_order: 5,
            },
            spectral: SpectralConfig {
                segment_len: 256,
                asymmetry_left: 1,
                asymmetry_right: 2,
                frontal_channels: vec![0, 1],
                occipital_channels: vec![2, 3],
                accel_threshold: 1.5,
                gyro_threshold: 50.0,
                ppg_rate: 64.0,
                ppg_min_history_secs: 10.0,
                ppg_history_secs: 30.0,
                ppg_min_peak_spacing_secs: 0.5,
            },
            artifact: ArtifactConfig {
                buffer_size: 512,
                blink_channels: vec![1, 2],
                blink_threshold: 80.0,
                clench_threshold: 0.8,
                alpha_burst_channels: vec![2, 3],
                alpha_burst_threshold: 30.0,
            },
            session: SessionConfig {
                tick_ms: 250,
                drop_threshold: 50.0,
                max_consecutive_failures: 20,
            },
        }
    }
}

impl NeuroConfig {
    /// Clamp all numeric fields to their valid ranges.
    /// Called after TOML deserialization to prevent out-of-range values.
    pub fn clamp_all(&mut self) {
        self.channels = self.channels.clamp(1, 64);
        self.signal.sample_rate = self.signal.sample_rate.clamp(16.0, 8192.0);
        self.signal.window_size = self.signal.window_size.clamp(16, 16384);
        self.signal.filter_order = self.signal.filter_order.min(10);
        self.spectral.segment_len = self.spectral.segment_len.clamp(8, 4096);
        self.spectral.accel_threshold = self.spectral.accel_threshold.max(1e-3);
        self.spectral.gyro_threshold = self.spectral.gyro_threshold.max(1e-3);
        self.spectral.ppg_rate = self.spectral.ppg_rate.clamp(1.0, 1024.0);
        self.spectral.ppg_min_history_secs = self.spectral.ppg_min_history_secs.max(0.0);
        self.spectral.ppg_history_secs = self
            .spectral
            .ppg_history_secs
            .max(self.spectral.ppg_min_history_secs);
        self.spectral.ppg_min_peak_spacing_secs =
            self.spectral.ppg_min_peak_spacing_secs.clamp(0.05, 5.0);
        self.artifact.buffer_size = self.artifact.buffer_size.clamp(16, 16384);
        self.artifact.clench_threshold = self.artifact.clench_threshold.clamp(0.0, 1.0);
        self.session.tick_ms = self.session.tick_ms.clamp(10, 10_000);
        self.session.drop_threshold = self.session.drop_threshold.clamp(0.0, 100.0);
        self.session.max_consecutive_failures = self.session.max_consecutive_failures.max(1);
    }

    /// Vérifie la cohérence : indices de canaux et paramètres du filtre.
    ///
    /// # Errors
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |index: usize| {
            if index < self.channels {
                Ok(())
            } else {
                Err(ConfigError::ChannelOutOfRange {
                    index,
                    channels: self.channels,
                })
            }
        };
        check(self.spectral.asymmetry_left)?;
        check(self.spectral.asymmetry_right)?;
        for &i in self
            .spectral
            .frontal_channels
            .iter()
            .chain(&self.spectral.occipital_channels)
            .chain(&self.artifact.blink_channels)
            .chain(&self.artifact.alpha_burst_channels)
        {
            check(i)?;
        }
        if self.artifact.blink_channels.is_empty() || self.artifact.alpha_burst_channels.is_empty() {
            return Err(ConfigError::Invalid(
                "les canaux de détection d'artefacts ne peuvent pas être vides".into(),
            ));
        }
        let s = &self.signal;
        if !s.sample_rate.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "fréquence d'échantillonnage invalide : {}",
                s.sample_rate
            )));
        }
        if !s.low_cut_hz.is_finite()
            || !s.high_cut_hz.is_finite()
            || s.low_cut_hz <= 0.0
            || s.low_cut_hz >= s.high_cut_hz
        {
            return Err(ConfigError::InvalidBand {
                low_hz: s.low_cut_hz,
                high_hz: s.high_cut_hz,
            });
        }
        if s.high_cut_hz >= s.sample_rate / 2.0 {
            return Err(ConfigError::AboveNyquist {
                cutoff_hz: s.high_cut_hz,
                nyquist_hz: s.sample_rate / 2.0,
            });
        }
        if s.filter_order == 0 {
            return Err(ConfigError::InvalidOrder(s.filter_order));
        }
        Ok(())
    }
}

/// Structure TOML intermédiaire pour désérialisation avec valeurs optionnelles.
#[derive(Deserialize, Default)]
struct ConfigFile {
    channels: Option<usize>,
    signal: Option<SignalSection>,
    spectral: Option<SpectralSection>,
    artifact: Option<ArtifactSection>,
    session: Option<SessionSection>,
}

#[derive(Deserialize)]
struct SignalSection {
    sample_rate: Option<f64>,
    window_size: Option<usize>,
    low_cut_hz: Option<f64>,
    high_cut_hz: Option<f64>,
    filter_order: Option<usize>,
}

#[derive(Deserialize)]
struct SpectralSection {
    segment_len: Option<usize>,
    asymmetry_left: Option<usize>,
    asymmetry_right: Option<usize>,
    frontal_channels: Option<Vec<usize>>,
    occipital_channels: Option<Vec<usize>>,
    accel_threshold: Option<f64>,
    gyro_threshold: Option<f64>,
    ppg_rate: Option<f64>,
    ppg_min_history_secs: Option<f64>,
    ppg_history_secs: Option<f64>,
    ppg_min_peak_spacing_secs: Option<f64>,
}

#[derive(Deserialize)]
struct ArtifactSection {
    buffer_size: Option<usize>,
    blink_channels: Option<Vec<usize>>,
    blink_threshold: Option<f64>,
    clench_threshold: Option<f64>,
    alpha_burst_channels: Option<Vec<usize>>,
    alpha_burst_threshold: Option<f64>,
}

#[derive(Deserialize)]
struct SessionSection {
    tick_ms: Option<u64>,
    drop_threshold: Option<f64>,
    max_consecutive_failures: Option<u32>,
}

/// Copie chaque champ `Some` de la section vers la cible.
macro_rules! merge {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = $src.$field {
                $dst.$field = v;
            }
        )+
    };
}

/// Parse un document TOML et fusionne avec les valeurs par défaut.
///
/// # Errors
/// Returns an error if the TOML is malformed or the merged config is inconsistent.
///
/// # Example
/// ```
/// use nf_core::config::parse_config;
/// let config = parse_config("[session]\ntick_ms = 100\n").unwrap();
/// assert_eq!(config.session.tick_ms, 100);
/// assert_eq!(config.signal.filter_order, 5);
/// ```
pub fn parse_config(content: &str) -> Result<NeuroConfig> {
    let file: ConfigFile = toml::from_str(content).context("Erreur de parsing TOML")?;
    let mut config = NeuroConfig::default();

    if let Some(v) = file.channels {
        config.channels = v;
    }
    if let Some(s) = file.signal {
        merge!(
            config.signal,
            s,
            sample_rate,
            window_size,
            low_cut_hz,
            high_cut_hz,
            filter_order,
        );
    }
    if let Some(s) = file.spectral {
        merge!(
            config.spectral,
            s,
            segment_len,
            asymmetry_left,
            asymmetry_right,
            frontal_channels,
            occipital_channels,
            accel_threshold,
            gyro_threshold,
            ppg_rate,
            ppg_min_history_secs,
            ppg_history_secs,
            ppg_min_peak_spacing_secs,
        );
    }
    if let Some(a) = file.artifact {
        merge!(
            config.artifact,
            a,
            buffer_size,
            blink_channels,
            blink_threshold,
            clench_threshold,
            alpha_burst_channels,
            alpha_burst_threshold,
        );
    }
    if let Some(s) = file.session {
        merge!(
            config.session,
            s,
            tick_ms,
            drop_threshold,
            max_consecutive_failures,
        );
    }

    config.clamp_all();
    config.validate()?;
    Ok(config)
}

/// Charge un fichier TOML et fusionne avec les valeurs par défaut.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
///
/// # Example
/// ```no_run
/// use nf_core::config::load_config;
/// use std::path::Path;
/// let config = load_config(Path::new("config/default.toml")).unwrap();
/// ```
pub fn load_config(path: &Path) -> Result<NeuroConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Impossible de lire {}", path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("Configuration rejetée : {}", path.display()))?;
    log::debug!("Config chargée depuis {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, NeuroConfig::default());
    }

    #[test]
    fn partial_sections_override_only_given_fields() {
        let config = parse_config(
            "channels = 6\n[artifact]\nblink_threshold = 120.0\n[signal]\nhigh_cut_hz = 40.0\n",
        )
        .unwrap();
        assert_eq!(config.channels, 6);
        assert!((config.artifact.blink_threshold - 120.0).abs() < f64::EPSILON);
        assert!((config.artifact.clench_threshold - 0.8).abs() < f64::EPSILON);
        assert!((config.signal.high_cut_hz - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let config = parse_config("[session]\ntick_ms = 1\ndrop_threshold = 500.0\n").unwrap();
        assert_eq!(config.session.tick_ms, 10);
        assert!((config.session.drop_threshold - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cutoff_above_nyquist_is_rejected() {
        assert!(parse_config("[signal]\nhigh_cut_hz = 200.0\n").is_err());
    }

    #[test]
    fn nan_cutoffs_are_rejected() {
        assert!(parse_config("[signal]\nhigh_cut_hz = nan\n").is_err());
        assert!(parse_config("[signal]\nlow_cut_hz = nan\n").is_err());
        assert!(parse_config("[signal]\nsample_rate = nan\n").is_err());
    }

    #[test]
    fn channel_index_out_of_range_is_rejected() {
        let mut config = NeuroConfig::default();
        config.spectral.occipital_channels = vec![2, 7];
        assert_eq!(
            config.validate(),
            Err(ConfigError::ChannelOutOfRange {
                index: 7,
                channels: 4
            })
        );
    }

    #[test]
    fn load_config_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neurofocus.toml");
        std::fs::write(&path, "[spectral]\nsegment_len = 128\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.spectral.segment_len, 128);
    }
}
