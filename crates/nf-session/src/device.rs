use std::collections::BTreeMap;
use std::f64::consts::PI;

use nf_core::config::NeuroConfig;
use nf_core::frame::SampleFrame;

use crate::error::AcquisitionError;
use crate::session::SessionId;

/// Source de frames d'un device, possédée par le thread de sa session.
pub trait DeviceSource: Send {
    /// Lit les échantillons disponibles. Une frame vide n'est pas une erreur.
    ///
    /// # Errors
    /// Returns an [`AcquisitionError`]; only `Fatal` ends the session.
    fn get_frame(&mut self) -> Result<SampleFrame, AcquisitionError>;

    /// Libère le device. Appelé exactement une fois par session.
    fn stop(&mut self);

    /// Télémétrie du device (batterie, qualité de contact…).
    fn status(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }
}

/// Ouvre une source par session.
pub trait DeviceProvider: Send + Sync {
    /// # Errors
    /// Returns an [`AcquisitionError`] if the device cannot be acquired.
    fn open(&self, session: SessionId) -> Result<Box<dyn DeviceSource>, AcquisitionError>;
}

/// Garde de portée : `stop()` est appelé une seule fois, à la libération
/// explicite ou au drop (y compris pendant un unwind).
pub(crate) struct DeviceGuard {
    device: Box<dyn DeviceSource>,
    released: bool,
}

impl DeviceGuard {
    pub(crate) fn new(device: Box<dyn DeviceSource>) -> Self {
        Self {
            device,
            released: false,
        }
    }

    pub(crate) fn get_frame(&mut self) -> Result<SampleFrame, AcquisitionError> {
        if self.released {
            return Err(AcquisitionError::Fatal("device déjà libéré".into()));
        }
        self.device.get_frame()
    }

    pub(crate) fn status(&self) -> BTreeMap<String, f64> {
        self.device.status()
    }

    pub(crate) fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.device.stop();
        }
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

// === Device synthétique ===

/// Générateur EEG de démonstration, 4 canaux par défaut.
///
/// Chaque canal : alpha 10 Hz + bêta 20 Hz déphasé par canal + bruit.
/// Accéléromètre/gyroscope à 52 Hz autour du repos, PPG à 1.2 Hz.
///
/// # Example
/// ```
/// use nf_session::device::{DeviceSource, SyntheticDevice};
/// let mut device = SyntheticDevice::new(4, 256.0, 64.0, 64);
/// let frame = device.get_frame().unwrap();
/// assert_eq!(frame.channel_count(), 4);
/// assert_eq!(frame.len(), 64);
/// assert_eq!(frame.ppg.len(), 16);
/// ```
pub struct SyntheticDevice {
    channels: usize,
    sample_rate: f64,
    ppg_rate: f64,
    samples_per_read: usize,
    /// Index du prochain échantillon EEG.
    cursor: u64,
    rng: fastrand::Rng,
    stopped: bool,
}

impl SyntheticDevice {
    const IMU_RATE: f64 = 52.0;
    const PULSE_HZ: f64 = 1.2;

    #[must_use]
    pub fn new(channels: usize, sample_rate: f64, ppg_rate: f64, samples_per_read: usize) -> Self {
        Self {
            channels,
            sample_rate,
            ppg_rate,
            samples_per_read,
            cursor: 0,
            rng: fastrand::Rng::new(),
            stopped: false,
        }
    }

    /// Graine fixe, pour des runs reproductibles.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    /// Nombre d'échantillons d'un flux à `rate` Hz dans `[start, end)` EEG.
    fn aux_span(&self, rate: f64, start: u64, end: u64) -> (u64, u64) {
        let scale = rate / self.sample_rate;
        let first = (start as f64 * scale).floor() as u64;
        let last = (end as f64 * scale).floor() as u64;
        (first, last)
    }

    fn noise(&mut self, amplitude: f64) -> f64 {
        (self.rng.f64() * 2.0 - 1.0) * amplitude
    }
}

impl DeviceSource for SyntheticDevice {
    fn get_frame(&mut self) -> Result<SampleFrame, AcquisitionError> {
        if self.stopped {
            return Err(AcquisitionError::Fatal("device arrêté".into()));
        }
        let start = self.cursor;
        let end = start + self.samples_per_read as u64;

        let mut channels = Vec::with_capacity(self.channels);
        for c in 0..self.channels {
            let phase = c as f64 * 0.7;
            let row: Vec<f64> = (start..end)
                .map(|i| {
                    let t = i as f64 / self.sample_rate;
                    20.0 * (2.0 * PI * 10.0 * t).sin()
                        + 8.0 * (2.0 * PI * 20.0 * t + phase).sin()
                        + self.noise(3.0)
                })
                .collect();
            channels.push(row);
        }

        let (p0, p1) = self.aux_span(self.ppg_rate, start, end);
        let ppg: Vec<f64> = (p0..p1)
            .map(|k| {
                let t = k as f64 / self.ppg_rate;
                (2.0 * PI * Self::PULSE_HZ * t).sin() + self.noise(0.05)
            })
            .collect();

        let (m0, m1) = self.aux_span(Self::IMU_RATE, start, end);
        let mut accel = Vec::with_capacity((m1 - m0) as usize);
        let mut gyro = Vec::with_capacity((m1 - m0) as usize);
        for _ in m0..m1 {
            accel.push([self.noise(0.02), self.noise(0.02), 1.0 + self.noise(0.02)]);
            gyro.push([self.noise(2.0), self.noise(2.0), self.noise(2.0)]);
        }

        self.cursor = end;
        Ok(SampleFrame {
            channels,
            accel,
            gyro,
            ppg,
        })
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            log::debug!("SyntheticDevice arrêté après {} échantillons", self.cursor);
        }
    }

    fn status(&self) -> BTreeMap<String, f64> {
        BTreeMap::from([("battery".to_string(), 80.0)])
    }
}

/// Fournit un [`SyntheticDevice`] par session, cadencé sur le tick.
pub struct SyntheticProvider {
    channels: usize,
    sample_rate: f64,
    ppg_rate: f64,
    samples_per_read: usize,
}

impl SyntheticProvider {
    #[must_use]
    pub fn from_config(config: &NeuroConfig) -> Self {
        let per_tick = config.signal.sample_rate * config.session.tick_ms as f64 / 1000.0;
        Self {
            channels: config.channels,
            sample_rate: config.signal.sample_rate,
            ppg_rate: config.spectral.ppg_rate,
            samples_per_read: per_tick.round().max(1.0) as usize,
        }
    }
}

impl DeviceProvider for SyntheticProvider {
    fn open(&self, session: SessionId) -> Result<Box<dyn DeviceSource>, AcquisitionError> {
        log::debug!("SyntheticDevice ouvert pour la session {}", session.short());
        Ok(Box::new(SyntheticDevice::new(
            self.channels,
            self.sample_rate,
            self.ppg_rate,
            self.samples_per_read,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl DeviceSource for Counting {
        fn get_frame(&mut self) -> Result<SampleFrame, AcquisitionError> {
            Ok(SampleFrame::default())
        }

        fn stop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn guard_stops_once_on_release_then_drop() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut guard = DeviceGuard::new(Box::new(Counting(Arc::clone(&stops))));
        guard.release();
        guard.release();
        assert!(guard.get_frame().is_err());
        drop(guard);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guard_stops_during_unwind() {
        let stops = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&stops);
        let result = std::panic::catch_unwind(move || {
            let _guard = DeviceGuard::new(Box::new(Counting(inner)));
            panic!("tick en échec");
        });
        assert!(result.is_err());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn synthetic_streams_are_continuous() {
        let mut device = SyntheticDevice::new(2, 256.0, 64.0, 100).with_seed(7);
        let mut ppg = 0;
        let mut imu = 0;
        for _ in 0..8 {
            let frame = device.get_frame().unwrap();
            assert_eq!(frame.len(), 100);
            ppg += frame.ppg.len();
            imu += frame.accel.len();
            assert_eq!(frame.accel.len(), frame.gyro.len());
        }
        // 800 échantillons à 256 Hz = 3.125 s.
        assert_eq!(ppg, 200);
        assert_eq!(imu, 162);
        assert_eq!(device.status().get("battery"), Some(&80.0));
    }

    #[test]
    fn stopped_synthetic_device_is_fatal() {
        let mut device = SyntheticDevice::new(1, 256.0, 64.0, 10);
        device.stop();
        assert!(device.get_frame().unwrap_err().is_fatal());
    }
}
