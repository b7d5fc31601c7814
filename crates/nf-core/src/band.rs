/// Intervalle de fréquences nommé, semi-ouvert `[low_hz, high_hz)`.
///
/// # Example
/// ```
/// use nf_core::band::ALPHA;
/// assert!(ALPHA.contains(8.0));
/// assert!(!ALPHA.contains(13.0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyBand {
    /// Nom lisible (logs, snapshots).
    pub name: &'static str,
    /// Borne basse incluse, en Hz.
    pub low_hz: f64,
    /// Borne haute exclue, en Hz.
    pub high_hz: f64,
}

impl FrequencyBand {
    /// Construit une bande.
    #[must_use]
    pub const fn new(name: &'static str, low_hz: f64, high_hz: f64) -> Self {
        Self {
            name,
            low_hz,
            high_hz,
        }
    }

    /// `true` si `freq_hz` tombe dans `[low_hz, high_hz)`.
    #[inline]
    #[must_use]
    pub fn contains(&self, freq_hz: f64) -> bool {
        freq_hz >= self.low_hz && freq_hz < self.high_hz
    }
}

// === Catalogue EEG ===
pub const DELTA: FrequencyBand = FrequencyBand::new("delta", 0.5, 4.0);
pub const THETA: FrequencyBand = FrequencyBand::new("theta", 4.0, 8.0);
pub const ALPHA: FrequencyBand = FrequencyBand::new("alpha", 8.0, 13.0);
pub const BETA: FrequencyBand = FrequencyBand::new("beta", 13.0, 30.0);
pub const GAMMA: FrequencyBand = FrequencyBand::new("gamma", 30.0, 100.0);

/// Catalogue fixe, itéré directement.
pub const EEG_BANDS: [FrequencyBand; 5] = [DELTA, THETA, ALPHA, BETA, GAMMA];

// === Sous-bandes du score de focus ===
pub const FOCUS_ALPHA: FrequencyBand = FrequencyBand::new("focus_alpha", 8.0, 12.0);
pub const SMR: FrequencyBand = FrequencyBand::new("smr", 12.0, 15.0);
pub const MID_BETA: FrequencyBand = FrequencyBand::new("mid_beta", 15.0, 20.0);
pub const FOCUS_BETA: FrequencyBand = FrequencyBand::new("focus_beta", 12.0, 30.0);

// === Bandes des détecteurs d'artefacts ===
pub const BLINK: FrequencyBand = FrequencyBand::new("blink", 0.5, 4.0);
pub const JAW_CLENCH: FrequencyBand = FrequencyBand::new("jaw_clench", 20.0, 60.0);
pub const ALPHA_BURST: FrequencyBand = FrequencyBand::new("alpha_burst", 8.0, 13.0);
