use std::collections::VecDeque;

use nf_core::config::SpectralConfig;

/// Maxima locaux stricts, plateaux réduits à leur milieu, puis sélection
/// par distance minimale en privilégiant les pics les plus hauts.
///
/// `distance` est en échantillons ; `0` ou `1` désactive la sélection.
///
/// # Example
/// ```
/// use nf_dsp::pulse::find_peaks;
/// let x = [0.0, 1.0, 0.0, 2.0, 0.0, 0.5, 0.0];
/// assert_eq!(find_peaks(&x, 1), vec![1, 3, 5]);
/// assert_eq!(find_peaks(&x, 3), vec![3]);
/// ```
#[must_use]
pub fn find_peaks(signal: &[f64], distance: usize) -> Vec<usize> {
    let peaks = local_maxima(signal);
    if distance <= 1 || peaks.len() < 2 {
        return peaks;
    }

    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| signal[peaks[a]].total_cmp(&signal[peaks[b]]));

    let mut keep = vec![true; peaks.len()];
    for &j in order.iter().rev() {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            k -= 1;
            keep[k] = false;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(p))
        .collect()
}

fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Variabilité cardiaque dans [0, 1] à partir des intervalles entre pics.
///
/// Moins de `min_history_secs` de signal ou moins de 2 pics → 0.5.
/// Sinon `min(1, σ(intervalles) / 0.1 s)`, σ écart-type de population.
///
/// # Example
/// ```
/// use nf_dsp::pulse::hrv_score;
/// assert!((hrv_score(&[0.0; 64], 64.0, 10.0, 0.5) - 0.5).abs() < 1e-12);
/// ```
#[must_use]
pub fn hrv_score(ppg: &[f64], rate: f64, min_history_secs: f64, min_spacing_secs: f64) -> f64 {
    const NEUTRAL: f64 = 0.5;
    if rate <= 0.0 || (ppg.len() as f64) < rate * min_history_secs {
        return NEUTRAL;
    }
    let distance = (rate * min_spacing_secs).ceil().max(1.0) as usize;
    let peaks = find_peaks(ppg, distance);
    if peaks.len() < 2 {
        return NEUTRAL;
    }

    let intervals: Vec<f64> = peaks.windows(2).map(|w| (w[1] - w[0]) as f64 / rate).collect();
    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    let var = intervals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let score = (var.sqrt() / 0.1).min(1.0);
    if score.is_finite() { score.max(0.0) } else { 0.0 }
}

/// Historique glissant du signal PPG entre les ticks.
///
/// Les frames PPG sont courtes (quelques dizaines d'échantillons par tick) ;
/// la HRV n'a de sens qu'au-delà de ~10 s, d'où l'accumulation.
#[derive(Clone, Debug)]
pub struct PulseTracker {
    history: VecDeque<f64>,
    capacity: usize,
}

impl PulseTracker {
    #[must_use]
    pub fn new(rate: f64, history_secs: f64) -> Self {
        let capacity = (rate * history_secs).ceil().max(1.0) as usize;
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    #[must_use]
    pub fn from_config(config: &SpectralConfig) -> Self {
        Self::new(config.ppg_rate, config.ppg_history_secs)
    }

    /// Ajoute les échantillons d'une frame, oublie les plus anciens.
    pub fn push(&mut self, samples: &[f64]) {
        let skip = samples.len().saturating_sub(self.capacity);
        self.history.extend(&samples[skip..]);
        let excess = self.history.len().saturating_sub(self.capacity);
        self.history.drain(..excess);
    }

    /// Historique contigu, du plus ancien au plus récent.
    pub fn samples(&mut self) -> &[f64] {
        self.history.make_contiguous()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f64 = 64.0;

    /// Impulsions unitaires aux positions données.
    fn pulses(len: usize, at: &[usize]) -> Vec<f64> {
        let mut x = vec![0.0; len];
        for &i in at {
            x[i] = 1.0;
        }
        x
    }

    #[test]
    fn plateau_peak_reports_midpoint() {
        let x = [0.0, 1.0, 1.0, 1.0, 0.0];
        assert_eq!(find_peaks(&x, 1), vec![2]);
        let rising_edge = [0.0, 1.0, 1.0];
        assert!(find_peaks(&rising_edge, 1).is_empty());
    }

    #[test]
    fn distance_keeps_highest_of_close_peaks() {
        let x = [0.0, 1.0, 0.0, 3.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.5, 0.0];
        assert_eq!(find_peaks(&x, 4), vec![3, 9]);
    }

    #[test]
    fn short_history_is_neutral() {
        let x = pulses(5 * 64, &[10, 60, 110, 160]);
        assert!((hrv_score(&x, RATE, 10.0, 0.5) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn fewer_than_two_peaks_is_neutral() {
        let flat = vec![0.2; 12 * 64];
        assert!((hrv_score(&flat, RATE, 10.0, 0.5) - 0.5).abs() < f64::EPSILON);
        let one = pulses(12 * 64, &[300]);
        assert!((hrv_score(&one, RATE, 10.0, 0.5) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn regular_pulse_has_zero_variability() {
        let at: Vec<usize> = (0..12).map(|k| 10 + k * 64).collect();
        let x = pulses(12 * 64 + 20, &at);
        assert!(hrv_score(&x, RATE, 10.0, 0.5).abs() < 1e-12);
    }

    #[test]
    fn irregular_pulse_saturates() {
        // Intervalles alternés 38 et 64 échantillons : σ ≈ 0.2 s.
        let mut at = vec![10];
        while *at.last().unwrap() < 12 * 64 - 80 {
            let step = if at.len() % 2 == 0 { 64 } else { 38 };
            at.push(at.last().unwrap() + step);
        }
        let x = pulses(12 * 64, &at);
        assert!((hrv_score(&x, RATE, 10.0, 0.5) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tracker_keeps_most_recent_history() {
        let mut tracker = PulseTracker::new(4.0, 2.0);
        tracker.push(&[1.0, 2.0, 3.0]);
        tracker.push(&[4.0, 5.0, 6.0, 7.0]);
        assert_eq!(tracker.len(), 7);
        tracker.push(&[8.0, 9.0, 10.0]);
        assert_eq!(tracker.samples(), &[3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        tracker.push(&(0..20).map(f64::from).collect::<Vec<_>>());
        assert_eq!(tracker.samples()[0], 12.0);
        assert_eq!(tracker.len(), 8);
    }
}
