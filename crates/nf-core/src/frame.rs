use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bloc d'échantillons lu en une fois depuis le device.
///
/// `channels` est indexé `[canal][échantillon]`. Les flux auxiliaires
/// (accéléromètre, gyroscope, PPG) sont lus dans le même poll et peuvent
/// être vides.
///
/// # Example
/// ```
/// use nf_core::frame::SampleFrame;
/// let frame = SampleFrame::new(vec![vec![0.0; 10], vec![0.0; 8]]);
/// assert_eq!(frame.len(), 8);
/// assert!(!frame.is_empty());
/// assert!(SampleFrame::default().is_empty());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleFrame {
    /// Échantillons EEG, un vecteur par canal.
    pub channels: Vec<Vec<f64>>,
    /// Accéléromètre, une ligne `[x, y, z]` en g par échantillon.
    pub accel: Vec<[f64; 3]>,
    /// Gyroscope, une ligne `[x, y, z]` en deg/s par échantillon.
    pub gyro: Vec<[f64; 3]>,
    /// Onde de pouls (PPG).
    pub ppg: Vec<f64>,
}

impl SampleFrame {
    /// Frame EEG seule, sans flux auxiliaires.
    #[must_use]
    pub fn new(channels: Vec<Vec<f64>>) -> Self {
        Self {
            channels,
            ..Self::default()
        }
    }

    /// Nombre d'échantillons exploitables : longueur du canal le plus court.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }

    /// `true` si aucune donnée EEG n'est exploitable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nombre de canaux présents dans la frame.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// Scores d'un tick, tous rapportés dans [0, 100].
///
/// `motion` et `hrv` sont calculés dans [0, 1] puis multipliés par 100.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSet {
    pub attention: f64,
    pub focus: f64,
    pub concentration: f64,
    pub immersion: f64,
    pub composite: f64,
    pub motion: f64,
    pub hrv: f64,
}

impl ScoreSet {
    /// Met à jour une moyenne courante avec le `count`-ième échantillon.
    ///
    /// # Example
    /// ```
    /// use nf_core::frame::ScoreSet;
    /// let mut avg = ScoreSet::default();
    /// avg.accumulate(&ScoreSet { attention: 40.0, ..ScoreSet::default() }, 1);
    /// avg.accumulate(&ScoreSet { attention: 60.0, ..ScoreSet::default() }, 2);
    /// assert!((avg.attention - 50.0).abs() < 1e-9);
    /// ```
    pub fn accumulate(&mut self, next: &ScoreSet, count: usize) {
        if count == 0 {
            return;
        }
        let n = count as f64;
        let step = |avg: &mut f64, x: f64| *avg += (x - *avg) / n;
        step(&mut self.attention, next.attention);
        step(&mut self.focus, next.focus);
        step(&mut self.concentration, next.concentration);
        step(&mut self.immersion, next.immersion);
        step(&mut self.composite, next.composite);
        step(&mut self.motion, next.motion);
        step(&mut self.hrv, next.hrv);
    }

    /// `true` si tous les champs sont finis et dans [0, 100].
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        [
            self.attention,
            self.focus,
            self.concentration,
            self.immersion,
            self.composite,
            self.motion,
            self.hrv,
        ]
        .iter()
        .all(|v| v.is_finite() && (0.0..=100.0).contains(v))
    }
}

/// Événements d'artefacts détectés sur la fenêtre courante.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactFlags {
    pub blink: bool,
    pub jaw_clench: bool,
    pub alpha_burst: bool,
}

impl ArtifactFlags {
    /// `true` si au moins un artefact est levé.
    #[must_use]
    pub fn any(&self) -> bool {
        self.blink || self.jaw_clench || self.alpha_burst
    }
}

/// Payload diffusé à chaque abonné, une fois par tick.
///
/// Schéma JSON : `{timestamp, attentionScore, channels, deviceStatus}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPayload {
    /// Secondes depuis l'epoch Unix.
    pub timestamp: f64,
    /// Score d'attention dans [0, 100].
    pub attention_score: f64,
    /// Fenêtre filtrée, `[canal][échantillon]`.
    pub channels: Vec<Vec<f64>>,
    /// État du device (batterie, etc.).
    pub device_status: BTreeMap<String, f64>,
}
