//! Boucle de tick d'une session.
//!
//! Un thread par session : lecture device → buffer → filtre → scores et
//! artefacts → historique → persistance → diffusion aux abonnés.
//! Le device est acquis dans le thread et libéré par [`DeviceGuard`] sur
//! tous les chemins de sortie.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use flume::RecvTimeoutError;
use nf_core::config::NeuroConfig;
use nf_core::error::ConfigError;
use nf_core::frame::{SampleFrame, TickPayload};
use nf_dsp::{ArtifactDetector, PulseTracker, SampleBuffer, SignalFilter, SpectralScorer};

use crate::device::{DeviceGuard, DeviceProvider};
use crate::error::AcquisitionError;
use crate::session::{CoordinatorState, ScoreSample, SessionShared};
use crate::store::SessionStore;

/// Pipeline d'une session et sa machine d'états `Idle → Streaming → Stopped`.
pub(crate) struct SessionStreamCoordinator {
    shared: Arc<SessionShared>,
    store: Arc<dyn SessionStore>,
    buffer: SampleBuffer,
    filter: SignalFilter,
    scorer: SpectralScorer,
    artifacts: ArtifactDetector,
    pulse: PulseTracker,
    tick: Duration,
    drop_threshold: f64,
    max_failures: u32,
    state: CoordinatorState,
}

impl SessionStreamCoordinator {
    /// Construit le pipeline. Le filtre est conçu ici : une configuration
    /// invalide échoue avant tout spawn.
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        config: &NeuroConfig,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            shared,
            store,
            buffer: SampleBuffer::new(config.channels, config.signal.window_size),
            filter: SignalFilter::from_config(&config.signal)?,
            scorer: SpectralScorer::from_config(config),
            artifacts: ArtifactDetector::from_config(config),
            pulse: PulseTracker::from_config(&config.spectral),
            tick: Duration::from_millis(config.session.tick_ms),
            drop_threshold: config.session.drop_threshold,
            max_failures: config.session.max_consecutive_failures,
            state: CoordinatorState::Idle,
        })
    }

    fn transition(&mut self, next: CoordinatorState) {
        log::debug!(
            "Session {}: {:?} → {next:?}",
            self.shared.id().short(),
            self.state
        );
        self.state = next;
        self.shared.set_state(next);
    }

    /// Corps du thread de session.
    ///
    /// Sort quand la session n'est plus active, quand le signal d'arrêt
    /// arrive (ou que son émetteur disparaît), ou sur erreur fatale.
    pub(crate) fn run(
        mut self,
        provider: Arc<dyn DeviceProvider>,
        stop_rx: flume::Receiver<()>,
    ) -> Result<(), AcquisitionError> {
        let id = self.shared.id();
        let _unwind = EndOnUnwind {
            shared: Arc::clone(&self.shared),
            store: Arc::clone(&self.store),
        };
        let result = match provider.open(id) {
            Ok(device) => {
                let mut device = DeviceGuard::new(device);
                self.transition(CoordinatorState::Streaming);
                let result = self.stream(&mut device, &stop_rx);
                device.release();
                result
            }
            Err(e) => Err(e),
        };

        self.transition(CoordinatorState::Stopped);
        match &result {
            Ok(()) => log::info!("Session {}: terminée proprement", id.short()),
            Err(e) => {
                log::error!("Session {}: arrêt sur erreur d'acquisition : {e}", id.short());
                self.shared.set_error(e.to_string());
                self.shared.end();
            }
        }
        if let Err(e) = self.store.save(&self.shared.snapshot()) {
            log::warn!("Session {}: sauvegarde finale impossible : {e:#}", id.short());
        }
        result
    }

    fn stream(
        &mut self,
        device: &mut DeviceGuard,
        stop_rx: &flume::Receiver<()>,
    ) -> Result<(), AcquisitionError> {
        let id = self.shared.id().short();
        let mut failures = 0u32;

        loop {
            if !self.shared.is_active() {
                return Ok(());
            }
            let started = Instant::now();

            match device.get_frame() {
                Ok(frame) if frame.is_empty() => {
                    log::debug!("Session {id}: aucune donnée reçue du device");
                }
                Ok(frame) => {
                    failures = 0;
                    let status = device.status();
                    self.process(&frame, status);
                }
                Err(e) if !e.is_fatal() => {
                    failures += 1;
                    log::warn!("Session {id}: {e} ({failures}/{})", self.max_failures);
                    if failures >= self.max_failures {
                        return Err(AcquisitionError::Fatal(format!(
                            "{failures} échecs de lecture consécutifs, dernier : {e}"
                        )));
                    }
                }
                Err(e) => return Err(e),
            }

            let wait = self.tick.saturating_sub(started.elapsed());
            match stop_rx.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    /// Un tick sur une frame non vide.
    fn process(&mut self, frame: &SampleFrame, device_status: BTreeMap<String, f64>) {
        self.buffer.update(frame);
        self.artifacts.update(frame);
        self.pulse.push(&frame.ppg);

        let filtered = self.filter.apply(self.buffer.window());
        let scores = self
            .scorer
            .score(&filtered, &frame.accel, &frame.gyro, self.pulse.samples());
        let artifacts = self.artifacts.detect();
        if artifacts.any() {
            log::debug!("Session {}: artefacts {artifacts:?}", self.shared.id().short());
        }

        let now = Utc::now();
        let sample = ScoreSample {
            timestamp: now,
            scores,
            artifacts,
        };
        // Session terminée pendant le tick : rien n'est enregistré ni diffusé.
        let Some(record) = self.shared.record(sample, self.drop_threshold) else {
            log::debug!("Session {}: tick abandonné après la fin", self.shared.id().short());
            return;
        };
        if let Err(e) = self.store.append(&record) {
            log::warn!("Session {}: sauvegarde impossible : {e:#}", self.shared.id().short());
        }

        let payload = TickPayload {
            timestamp: now.timestamp_micros() as f64 / 1e6,
            attention_score: scores.attention,
            channels: filtered,
            device_status,
        };
        let delivered = self.shared.broadcast(&payload);
        log::trace!(
            "Session {}: attention {:.1}, {delivered} abonné(s)",
            self.shared.id().short(),
            scores.attention
        );
    }
}

/// Termine la session si son thread panique : statut `Ended`, état
/// `Stopped`, erreur consignée et instantané final.
struct EndOnUnwind {
    shared: Arc<SessionShared>,
    store: Arc<dyn SessionStore>,
}

impl Drop for EndOnUnwind {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let id = self.shared.id().short();
        log::error!("Session {id}: panic dans le thread de session");
        self.shared.set_error("panic dans le thread de session".into());
        self.shared.set_state(CoordinatorState::Stopped);
        self.shared.end();
        if let Err(e) = self.store.save(&self.shared.snapshot()) {
            log::warn!("Session {id}: sauvegarde finale impossible : {e:#}");
        }
    }
}
