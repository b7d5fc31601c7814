use nf_core::band::{EEG_BANDS, FOCUS_ALPHA, FOCUS_BETA, MID_BETA, SMR};
use nf_core::config::{NeuroConfig, SpectralConfig};
use nf_core::frame::ScoreSet;
use rayon::prelude::*;

use crate::pulse;
use crate::welch::WelchEstimator;

/// Puissances moyennes d'un canal, calculées une fois par tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ChannelPowers {
    pub delta: f64,
    pub theta: f64,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    /// Alpha étroit 8–12 Hz (focus, immersion).
    pub focus_alpha: f64,
    pub smr: f64,
    pub mid_beta: f64,
    /// Bêta large 12–30 Hz (focus, concentration).
    pub focus_beta: f64,
}

/// Scores dérivés de la DSP de Welch, du mouvement et du pouls.
///
/// Sans état entre deux ticks : l'historique PPG est tenu par l'appelant
/// (voir [`crate::pulse::PulseTracker`]).
///
/// # Example
/// ```
/// use nf_core::config::NeuroConfig;
/// use nf_dsp::spectral::SpectralScorer;
///
/// let scorer = SpectralScorer::from_config(&NeuroConfig::default());
/// let window = vec![vec![0.0; 512]; 4];
/// let scores = scorer.score(&window, &[], &[], &[]);
/// assert!(scores.is_bounded());
/// assert!((scores.motion - 100.0).abs() < 1e-9);
/// assert!((scores.hrv - 50.0).abs() < 1e-9);
/// ```
pub struct SpectralScorer {
    welch: WelchEstimator,
    config: SpectralConfig,
}

impl SpectralScorer {
    #[must_use]
    pub fn new(sample_rate: f64, config: SpectralConfig) -> Self {
        Self {
            welch: WelchEstimator::new(sample_rate, config.segment_len),
            config,
        }
    }

    #[must_use]
    pub fn from_config(config: &NeuroConfig) -> Self {
        Self::new(config.signal.sample_rate, config.spectral.clone())
    }

    /// Puissances par canal, canaux estimés en parallèle.
    #[must_use]
    pub fn band_powers(&self, window: &[Vec<f64>]) -> Vec<ChannelPowers> {
        window
            .par_iter()
            .map(|channel| {
                let psd = self.welch.estimate(channel);
                let [delta, theta, alpha, beta, gamma] =
                    EEG_BANDS.map(|band| finite(psd.band_mean(&band)));
                ChannelPowers {
                    delta,
                    theta,
                    alpha,
                    beta,
                    gamma,
                    focus_alpha: finite(psd.band_mean(&FOCUS_ALPHA)),
                    smr: finite(psd.band_mean(&SMR)),
                    mid_beta: finite(psd.band_mean(&MID_BETA)),
                    focus_beta: finite(psd.band_mean(&FOCUS_BETA)),
                }
            })
            .collect()
    }

    /// HRV dans [0, 1] sur l'historique PPG fourni.
    #[must_use]
    pub fn hrv(&self, ppg: &[f64]) -> f64 {
        pulse::hrv_score(
            ppg,
            self.config.ppg_rate,
            self.config.ppg_min_history_secs,
            self.config.ppg_min_peak_spacing_secs,
        )
    }

    /// Calcule le jeu de scores complet d'un tick.
    ///
    /// `window` est la fenêtre filtrée, `accel`/`gyro` les lignes de la
    /// frame courante, `ppg` l'historique de pouls accumulé.
    #[must_use]
    pub fn score(
        &self,
        window: &[Vec<f64>],
        accel: &[[f64; 3]],
        gyro: &[[f64; 3]],
        ppg: &[f64],
    ) -> ScoreSet {
        let powers = self.band_powers(window);
        let cfg = &self.config;

        let attention = attention(&powers, cfg.asymmetry_left, cfg.asymmetry_right);
        let motion = motion_score(accel, gyro, cfg.accel_threshold, cfg.gyro_threshold);
        let hrv = self.hrv(ppg);

        ScoreSet {
            attention,
            focus: focus(&powers),
            concentration: concentration(&powers, &cfg.frontal_channels),
            immersion: immersion(&powers, &cfg.occipital_channels),
            composite: composite(attention, motion, hrv),
            motion: motion * 100.0,
            hrv: hrv * 100.0,
        }
    }
}

/// NaN et infinis remplacés par 0.
#[inline]
#[must_use]
pub fn finite(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}

/// Division protégée : dénominateur nul ou résultat non fini → 0.
#[inline]
#[must_use]
pub fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { finite(num / den) }
}

/// Projection affine de `[d0, d1]` vers `[r0, r1]`, sans clamp.
#[inline]
#[must_use]
pub fn rescale(x: f64, d0: f64, d1: f64, r0: f64, r1: f64) -> f64 {
    r0 + ratio((x - d0) * (r1 - r0), d1 - d0)
}

/// Moyenne arithmétique, 0 pour une entrée vide.
#[must_use]
pub fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(s, c), v| (s + finite(v), c + 1));
    ratio(sum, count as f64)
}

fn clamp_percent(x: f64) -> f64 {
    finite(x).clamp(0.0, 100.0)
}

/// Canal par indice ; canal absent → puissances nulles.
fn channel(powers: &[ChannelPowers], index: usize) -> ChannelPowers {
    powers.get(index).copied().unwrap_or_default()
}

/// Asymétrie alpha frontale dans [-1, 1], 0 si la somme est nulle.
#[must_use]
pub fn frontal_asymmetry(left_alpha: f64, right_alpha: f64) -> f64 {
    ratio(right_alpha - left_alpha, right_alpha + left_alpha)
}

/// `40·(1 − ᾱ) + 30·β̄ + 30·(FAA+1)/2`, clampé dans [0, 100].
#[must_use]
pub fn attention(powers: &[ChannelPowers], left: usize, right: usize) -> f64 {
    let alpha = mean(powers.iter().map(|p| p.alpha));
    let beta = mean(powers.iter().map(|p| p.beta));
    let faa = frontal_asymmetry(channel(powers, left).alpha, channel(powers, right).alpha);
    clamp_percent(40.0 * (1.0 - alpha) + 30.0 * beta + 30.0 * ((faa + 1.0) / 2.0))
}

/// Ratios bêta/thêta et SMR, moyenne sur tous les canaux, `[2, 26] → [0, 100]`.
#[must_use]
pub fn focus(powers: &[ChannelPowers]) -> f64 {
    let raw = mean(powers.iter().map(|p| {
        0.4 * ratio(p.focus_beta, p.theta) + 0.4 * ratio(p.smr + p.mid_beta, p.theta)
            - 0.2 * ratio(p.focus_alpha, p.focus_beta)
    }));
    clamp_percent(rescale(raw, 2.0, 26.0, 0.0, 100.0))
}

/// Bêta/thêta frontal, `[1.8, 2.4] → [0, 1]`, clampé puis ×100.
#[must_use]
pub fn concentration(powers: &[ChannelPowers], frontal: &[usize]) -> f64 {
    let raw = mean(frontal.iter().map(|&i| {
        let p = channel(powers, i);
        ratio(p.focus_beta, p.theta)
    }));
    finite(rescale(raw, 1.8, 2.4, 0.0, 1.0)).clamp(0.0, 1.0) * 100.0
}

/// Thêta/alpha occipital, `[0.1, 10] → [0, 100]`.
#[must_use]
pub fn immersion(powers: &[ChannelPowers], occipital: &[usize]) -> f64 {
    let raw = mean(occipital.iter().map(|&i| {
        let p = channel(powers, i);
        ratio(p.theta, p.focus_alpha)
    }));
    clamp_percent(rescale(raw, 0.1, 10.0, 0.0, 100.0))
}

fn magnitude(row: &[f64; 3]) -> f64 {
    (row[0] * row[0] + row[1] * row[1] + row[2] * row[2]).sqrt()
}

/// Stabilité de la tête dans [0, 1] ; 1 = immobile.
///
/// Accéléromètre ou gyroscope vide → 1.0 (aucun mouvement observé).
#[must_use]
pub fn motion_score(
    accel: &[[f64; 3]],
    gyro: &[[f64; 3]],
    accel_threshold: f64,
    gyro_threshold: f64,
) -> f64 {
    if accel.is_empty() || gyro.is_empty() {
        return 1.0;
    }
    let acc = ratio(mean(accel.iter().map(magnitude)), accel_threshold);
    let gyr = ratio(mean(gyro.iter().map(magnitude)), gyro_threshold);
    finite(1.0 - ((acc + gyr) / 2.0).min(1.0)).clamp(0.0, 1.0)
}

/// `attention·0.6·motion + hrv·20`, clampé dans [0, 100].
#[must_use]
pub fn composite(attention: f64, motion: f64, hrv: f64) -> f64 {
    clamp_percent(attention * 0.6 * motion + hrv * 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tone(freq: f64, amp: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| amp * (2.0 * PI * freq * i as f64 / 256.0).sin())
            .collect()
    }

    fn scorer() -> SpectralScorer {
        SpectralScorer::from_config(&NeuroConfig::default())
    }

    #[test]
    fn all_zero_window_stays_bounded() {
        let scores = scorer().score(&vec![vec![0.0; 512]; 4], &[], &[], &[]);
        assert!(scores.is_bounded());
        // ᾱ = 0, β̄ = 0, FAA = 0 → 40 + 0 + 15.
        assert!((scores.attention - 55.0).abs() < 1e-9);
        assert!(scores.focus.abs() < 1e-9);
        assert!(scores.concentration.abs() < 1e-9);
        assert!(scores.immersion.abs() < 1e-9);
    }

    #[test]
    fn extreme_inputs_never_leak_nan() {
        let window = vec![
            vec![f64::MAX; 512],
            tone(10.0, 1e150, 512),
            vec![0.0; 3],
            Vec::new(),
        ];
        let accel = vec![[f64::INFINITY, 0.0, 0.0]];
        let gyro = vec![[f64::NAN, 1.0, 1.0]];
        let scores = scorer().score(&window, &accel, &gyro, &[f64::NAN; 700]);
        assert!(scores.is_bounded(), "{scores:?}");
    }

    #[test]
    fn motion_defaults_to_still_on_empty_sensors() {
        assert!((motion_score(&[], &[], 1.5, 50.0) - 1.0).abs() < f64::EPSILON);
        assert!((motion_score(&[[0.0, 0.0, 1.0]], &[], 1.5, 50.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn motion_decreases_with_movement() {
        let still = motion_score(&[[0.0, 0.0, 0.3]], &[[1.0, 0.0, 0.0]], 1.5, 50.0);
        // (0.2 + 0.02) / 2 = 0.11
        assert!((still - 0.89).abs() < 1e-9);
        let shaking = motion_score(&[[3.0, 0.0, 0.0]], &[[100.0, 0.0, 0.0]], 1.5, 50.0);
        assert!(shaking.abs() < f64::EPSILON);
    }

    #[test]
    fn faa_is_zero_when_both_sides_are_silent() {
        assert!(frontal_asymmetry(0.0, 0.0).abs() < f64::EPSILON);
        assert!((frontal_asymmetry(1.0, 3.0) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn attention_follows_formula() {
        let p = |alpha| ChannelPowers {
            alpha,
            beta: 0.5,
            ..ChannelPowers::default()
        };
        // ᾱ = 0.25, β̄ = 0.5, FAA = (0.5 − 0) / 0.5 = 1.
        let powers = [p(0.0), p(0.0), p(0.5), p(0.5)];
        let a = attention(&powers, 1, 2);
        assert!((a - (40.0 * 0.75 + 15.0 + 30.0)).abs() < 1e-9);
    }

    #[test]
    fn concentration_is_rescaled_then_scaled_to_percent() {
        let p = ChannelPowers {
            theta: 1.0,
            focus_beta: 2.1,
            ..ChannelPowers::default()
        };
        let c = concentration(&[p, p], &[0, 1]);
        assert!((c - 50.0).abs() < 1e-9);
        let high = ChannelPowers { focus_beta: 9.0, ..p };
        assert!((concentration(&[high, high], &[0, 1]) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn immersion_uses_occipital_channels_only() {
        let quiet = ChannelPowers::default();
        let occ = ChannelPowers {
            theta: 5.05,
            focus_alpha: 1.0,
            ..ChannelPowers::default()
        };
        let i = immersion(&[quiet, quiet, occ, occ], &[2, 3]);
        assert!((i - 50.0).abs() < 1e-9);
    }

    #[test]
    fn missing_channel_index_reads_as_silence() {
        let occ = ChannelPowers {
            theta: 5.05,
            focus_alpha: 1.0,
            ..ChannelPowers::default()
        };
        // Canal 9 absent : ratio 0, moyenne (5.05 + 0) / 2.
        assert!(immersion(&[occ], &[0, 9]) < 50.0);
    }

    #[test]
    fn composite_reproduces_weighting() {
        assert!((composite(50.0, 1.0, 0.5) - 40.0).abs() < 1e-9);
        assert!((composite(100.0, 1.0, 1.0) - 80.0).abs() < 1e-9);
        assert!(composite(f64::NAN, 1.0, 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn beta_dominant_signal_raises_focus_over_theta_dominant() {
        let s = scorer();
        let beta = vec![tone(20.0, 10.0, 512); 4];
        let theta = vec![tone(6.0, 10.0, 512); 4];
        let f_beta = s.score(&beta, &[], &[], &[]).focus;
        let f_theta = s.score(&theta, &[], &[], &[]).focus;
        assert!(f_beta >= f_theta);
    }

    #[test]
    fn helpers_handle_degenerate_values() {
        assert!(ratio(1.0, 0.0).abs() < f64::EPSILON);
        assert!(mean(std::iter::empty()).abs() < f64::EPSILON);
        assert!((rescale(14.0, 2.0, 26.0, 0.0, 100.0) - 50.0).abs() < 1e-9);
        assert!(finite(f64::NEG_INFINITY).abs() < f64::EPSILON);
    }
}
