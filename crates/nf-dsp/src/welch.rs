use std::sync::Arc;

use nf_core::band::FrequencyBand;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

/// Densité spectrale de puissance unilatérale d'un canal.
///
/// `freqs[k] = k · fs / nperseg`, `power[k]` en unités²/Hz.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Psd {
    pub freqs: Vec<f64>,
    pub power: Vec<f64>,
}

impl Psd {
    /// Valeurs de la DSP dont la fréquence tombe dans `[low, high)`.
    fn in_band(&self, band: FrequencyBand) -> impl Iterator<Item = f64> + '_ {
        self.freqs
            .iter()
            .zip(&self.power)
            .filter(move |(f, _)| band.contains(**f))
            .map(|(_, p)| *p)
    }

    /// Puissance moyenne des bins de la bande. Aucun bin → 0.
    #[must_use]
    pub fn band_mean(&self, band: &FrequencyBand) -> f64 {
        let (sum, count) = self
            .in_band(*band)
            .fold((0.0, 0usize), |(s, c), p| (s + p, c + 1));
        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    /// Puissance sommée des bins de la bande. Aucun bin → 0.
    #[must_use]
    pub fn band_sum(&self, band: &FrequencyBand) -> f64 {
        self.in_band(*band).sum()
    }

    /// Fréquence du bin le plus puissant (0 si vide).
    #[must_use]
    pub fn peak_frequency(&self) -> f64 {
        self.power
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0.0, |(k, _)| self.freqs[k])
    }
}

/// Segment FFT pré-planifié : fenêtre de Hann périodique + plan realfft.
struct Segment {
    len: usize,
    plan: Arc<dyn RealToComplex<f64>>,
    window: Vec<f64>,
    /// Somme des carrés de la fenêtre, dénominateur de la mise à l'échelle.
    window_power: f64,
}

impl Segment {
    fn new(planner: &mut RealFftPlanner<f64>, len: usize) -> Self {
        let window: Vec<f64> = (0..len)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / len as f64).cos())
            })
            .collect();
        let window_power = window.iter().map(|w| w * w).sum();
        Self {
            len,
            plan: planner.plan_fft_forward(len),
            window,
            window_power,
        }
    }
}

/// Estimateur de Welch : segments recouvrants à 50 %, fenêtre de Hann,
/// détrend constant, échelle de densité, spectre unilatéral.
///
/// Le plan FFT est partagé (`Arc`) et les buffers sont locaux à chaque appel,
/// ce qui permet d'estimer plusieurs canaux en parallèle avec `&self`.
///
/// # Example
/// ```
/// use nf_dsp::welch::WelchEstimator;
/// let welch = WelchEstimator::new(256.0, 256);
/// let psd = welch.estimate(&vec![0.0; 512]);
/// assert_eq!(psd.freqs.len(), 129);
/// assert!(psd.power.iter().all(|p| *p == 0.0));
/// ```
pub struct WelchEstimator {
    sample_rate: f64,
    segment: Segment,
}

impl WelchEstimator {
    /// Prépare le plan pour des segments de `segment_len` échantillons.
    #[must_use]
    pub fn new(sample_rate: f64, segment_len: usize) -> Self {
        let mut planner = RealFftPlanner::<f64>::new();
        Self {
            sample_rate,
            segment: Segment::new(&mut planner, segment_len.max(1)),
        }
    }

    /// DSP d'un canal. Signal plus court que le segment : le segment est
    /// réduit à la longueur du signal. Signal vide : DSP vide.
    #[must_use]
    pub fn estimate(&self, signal: &[f64]) -> Psd {
        let n = signal.len();
        if n == 0 {
            return Psd::default();
        }
        if n >= self.segment.len {
            return self.estimate_with(&self.segment, signal);
        }
        log::trace!("Welch: segment réduit à {n} échantillons");
        let mut planner = RealFftPlanner::<f64>::new();
        let short = Segment::new(&mut planner, n);
        self.estimate_with(&short, signal)
    }

    fn estimate_with(&self, seg: &Segment, signal: &[f64]) -> Psd {
        let nperseg = seg.len;
        let step = nperseg - nperseg / 2;
        let bins = nperseg / 2 + 1;
        let freqs: Vec<f64> = (0..bins)
            .map(|k| k as f64 * self.sample_rate / nperseg as f64)
            .collect();

        let scale = self.sample_rate * seg.window_power;
        if scale <= 0.0 || !scale.is_finite() {
            return Psd {
                power: vec![0.0; bins],
                freqs,
            };
        }

        let mut input = seg.plan.make_input_vec();
        let mut spectrum = seg.plan.make_output_vec();
        let mut scratch = seg.plan.make_scratch_vec();
        let mut power = vec![0.0; bins];
        let mut segments = 0usize;

        let mut start = 0;
        while start + nperseg <= signal.len() {
            let chunk = &signal[start..start + nperseg];
            let mean = chunk.iter().sum::<f64>() / nperseg as f64;
            for ((slot, &x), &w) in input.iter_mut().zip(chunk).zip(&seg.window) {
                *slot = (x - mean) * w;
            }
            if seg
                .plan
                .process_with_scratch(&mut input, &mut spectrum, &mut scratch)
                .is_ok()
            {
                accumulate_periodogram(&spectrum, &mut power);
                segments += 1;
            }
            start += step;
        }

        if segments == 0 {
            return Psd {
                power: vec![0.0; bins],
                freqs,
            };
        }

        let last = bins - 1;
        for (k, p) in power.iter_mut().enumerate() {
            let one_sided = if k == 0 || (k == last && nperseg % 2 == 0) {
                1.0
            } else {
                2.0
            };
            let v = *p * one_sided / (scale * segments as f64);
            *p = if v.is_finite() { v } else { 0.0 };
        }

        Psd { freqs, power }
    }
}

fn accumulate_periodogram(spectrum: &[Complex<f64>], power: &mut [f64]) {
    for (p, c) in power.iter_mut().zip(spectrum) {
        *p += c.norm_sqr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nf_core::band::{ALPHA, BETA, FrequencyBand};
    use std::f64::consts::PI;

    fn tone(freq: f64, amp: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| amp * (2.0 * PI * freq * i as f64 / 256.0).sin())
            .collect()
    }

    #[test]
    fn peak_lands_on_tone_frequency() {
        let welch = WelchEstimator::new(256.0, 256);
        let psd = welch.estimate(&tone(20.0, 1.0, 512));
        assert!((psd.peak_frequency() - 20.0).abs() < f64::EPSILON);
        assert!(psd.band_mean(&BETA) > psd.band_mean(&ALPHA));
    }

    #[test]
    fn on_bin_tone_band_sum_matches_half_squared_amplitude() {
        let welch = WelchEstimator::new(256.0, 256);
        let psd = welch.estimate(&tone(10.0, 20.0, 512));
        let sum = psd.band_sum(&ALPHA);
        assert!((sum - 200.0).abs() < 1.0, "sum = {sum}");
    }

    #[test]
    fn short_signal_shrinks_segment() {
        let welch = WelchEstimator::new(256.0, 256);
        let psd = welch.estimate(&tone(16.0, 1.0, 64));
        assert_eq!(psd.freqs.len(), 33);
        assert!((psd.freqs[1] - 4.0).abs() < f64::EPSILON);
        assert!(psd.power.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn empty_signal_and_empty_band_yield_zero() {
        let welch = WelchEstimator::new(256.0, 256);
        let psd = welch.estimate(&[]);
        assert!(psd.freqs.is_empty());
        assert!(psd.band_mean(&ALPHA).abs() < f64::EPSILON);

        let psd = welch.estimate(&tone(10.0, 1.0, 256));
        let nowhere = FrequencyBand::new("nowhere", 500.0, 600.0);
        assert!(psd.band_mean(&nowhere).abs() < f64::EPSILON);
        assert!(psd.band_sum(&nowhere).abs() < f64::EPSILON);
    }

    #[test]
    fn constant_signal_is_detrended() {
        let welch = WelchEstimator::new(256.0, 256);
        let psd = welch.estimate(&vec![3.0; 512]);
        assert!(psd.power.iter().all(|p| p.abs() < 1e-12));
    }
}
