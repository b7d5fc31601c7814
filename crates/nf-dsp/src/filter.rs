use std::f64::consts::PI;

use nf_core::config::SignalConfig;
use nf_core::error::ConfigError;
use rayon::prelude::*;

/// Coefficients d'une section du second ordre (biquad), a0 normalisé à 1.
///
/// H(z) = (b0 + b1·z⁻¹ + b2·z⁻²) / (1 + a1·z⁻¹ + a2·z⁻²)
#[derive(Clone, Copy, Debug, PartialEq)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    /// Gain statique H(1), utilisé pour l'état initial en régime établi.
    fn dc_gain(&self) -> f64 {
        let den = 1.0 + self.a1 + self.a2;
        if den.abs() < 1e-12 {
            0.0
        } else {
            (self.b0 + self.b1 + self.b2) / den
        }
    }
}

/// Passe-bande Butterworth à phase nulle (aller-retour), sans état interne.
///
/// Conçu une fois à la construction ; `apply` ne fait que lire les
/// coefficients, les états des sections vivent sur la pile de l'appel.
///
/// # Example
/// ```
/// use nf_dsp::filter::SignalFilter;
/// let filter = SignalFilter::new(256.0, 0.5, 50.0, 5).unwrap();
/// let window = vec![vec![0.0; 128]; 4];
/// let out = filter.apply(&window);
/// assert_eq!(out.len(), 4);
/// assert_eq!(out[0].len(), 128);
/// assert!(SignalFilter::new(256.0, 0.5, 128.0, 5).is_err());
/// ```
#[derive(Clone, Debug)]
pub struct SignalFilter {
    sections: Vec<Biquad>,
    /// Longueur de l'extension impaire aux bords.
    pad_len: usize,
}

impl SignalFilter {
    /// Conçoit le filtre : passe-haut d'ordre `order` à `low_hz` en cascade
    /// avec un passe-bas d'ordre `order` à `high_hz`.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if a cutoff is non-positive, `low_hz >= high_hz`,
    /// `high_hz` reaches Nyquist, or `order == 0`.
    pub fn new(
        sample_rate: f64,
        low_hz: f64,
        high_hz: f64,
        order: usize,
    ) -> Result<Self, ConfigError> {
        if order == 0 {
            return Err(ConfigError::InvalidOrder(order));
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "fréquence d'échantillonnage invalide : {sample_rate}"
            )));
        }
        let nyquist = sample_rate / 2.0;
        // NaN échoue toutes les comparaisons : on l'écarte explicitement.
        if !low_hz.is_finite() || !high_hz.is_finite() || low_hz <= 0.0 || low_hz >= high_hz {
            return Err(ConfigError::InvalidBand { low_hz, high_hz });
        }
        if high_hz >= nyquist {
            return Err(ConfigError::AboveNyquist {
                cutoff_hz: high_hz,
                nyquist_hz: nyquist,
            });
        }

        let mut sections = highpass_sections(prewarp(low_hz, sample_rate), order);
        sections.extend(lowpass_sections(prewarp(high_hz, sample_rate), order));
        let pad_len = 3 * (2 * sections.len() + 1);

        log::debug!(
            "SignalFilter: {low_hz}–{high_hz} Hz, ordre {order}, {} sections",
            sections.len()
        );

        Ok(Self { sections, pad_len })
    }

    /// Construit depuis la section `[signal]` de la configuration.
    ///
    /// # Errors
    /// Same as [`SignalFilter::new`].
    pub fn from_config(config: &SignalConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.sample_rate,
            config.low_cut_hz,
            config.high_cut_hz,
            config.filter_order,
        )
    }

    /// Filtre chaque canal indépendamment le long du temps.
    ///
    /// La sortie a exactement la forme de l'entrée. Canaux traités en
    /// parallèle sur le pool rayon.
    #[must_use]
    pub fn apply(&self, window: &[Vec<f64>]) -> Vec<Vec<f64>> {
        window
            .par_iter()
            .map(|channel| self.filtfilt(channel))
            .collect()
    }

    /// Filtrage aller-retour d'un canal avec extension impaire aux bords.
    fn filtfilt(&self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        if n == 0 {
            return Vec::new();
        }
        let pad = self.pad_len.min(n - 1);

        let mut ext = Vec::with_capacity(n + 2 * pad);
        let (first, last) = (x[0], x[n - 1]);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
        ext.extend_from_slice(x);
        ext.extend((1..=pad).map(|i| 2.0 * last - x[n - 1 - i]));

        self.run(&mut ext);
        ext.reverse();
        self.run(&mut ext);
        ext.reverse();

        ext.drain(..pad);
        ext.truncate(n);
        for v in &mut ext {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
        ext
    }

    /// Passe directe en place, forme directe II transposée.
    ///
    /// L'état de chaque section démarre en régime établi pour la première
    /// valeur, ce qui évite le transitoire de bord.
    fn run(&self, signal: &mut [f64]) {
        let Some(&x0) = signal.first() else {
            return;
        };

        let mut states: Vec<(f64, f64)> = Vec::with_capacity(self.sections.len());
        let mut u = x0;
        for s in &self.sections {
            let y = s.dc_gain() * u;
            states.push((y - s.b0 * u, s.b2 * u - s.a2 * y));
            u = y;
        }

        for sample in signal.iter_mut() {
            let mut v = *sample;
            for (s, (z1, z2)) in self.sections.iter().zip(states.iter_mut()) {
                let y = s.b0 * v + *z1;
                *z1 = s.b1 * v - s.a1 * y + *z2;
                *z2 = s.b2 * v - s.a2 * y;
                v = y;
            }
            *sample = v;
        }
    }
}

/// Pré-distorsion de la transformée bilinéaire.
fn prewarp(freq_hz: f64, sample_rate: f64) -> f64 {
    (PI * freq_hz / sample_rate).tan()
}

/// Amortissement 1/Q de la k-ième paire de pôles Butterworth.
fn pole_damping(k: usize, order: usize) -> f64 {
    2.0 * (PI * (2 * k + 1) as f64 / (2 * order) as f64).sin()
}

fn lowpass_sections(k: f64, order: usize) -> Vec<Biquad> {
    let k2 = k * k;
    let mut sections: Vec<Biquad> = (0..order / 2)
        .map(|i| {
            let d = pole_damping(i, order);
            let norm = 1.0 + d * k + k2;
            let b0 = k2 / norm;
            Biquad {
                b0,
                b1: 2.0 * b0,
                b2: b0,
                a1: 2.0 * (k2 - 1.0) / norm,
                a2: (1.0 - d * k + k2) / norm,
            }
        })
        .collect();
    if order % 2 == 1 {
        let b0 = k / (1.0 + k);
        sections.push(Biquad {
            b0,
            b1: b0,
            b2: 0.0,
            a1: (k - 1.0) / (k + 1.0),
            a2: 0.0,
        });
    }
    sections
}

fn highpass_sections(k: f64, order: usize) -> Vec<Biquad> {
    let k2 = k * k;
    let mut sections: Vec<Biquad> = (0..order / 2)
        .map(|i| {
            let d = pole_damping(i, order);
            let norm = 1.0 + d * k + k2;
            let b0 = 1.0 / norm;
            Biquad {
                b0,
                b1: -2.0 * b0,
                b2: b0,
                a1: 2.0 * (k2 - 1.0) / norm,
                a2: (1.0 - d * k + k2) / norm,
            }
        })
        .collect();
    if order % 2 == 1 {
        let b0 = 1.0 / (1.0 + k);
        sections.push(Biquad {
            b0,
            b1: -b0,
            b2: 0.0,
            a1: (k - 1.0) / (k + 1.0),
            a2: 0.0,
        });
    }
    sections
}
