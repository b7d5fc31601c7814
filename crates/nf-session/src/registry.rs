use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use arc_swap::ArcSwap;
use nf_core::config::NeuroConfig;
use parking_lot::Mutex;

use crate::coordinator::SessionStreamCoordinator;
use crate::device::DeviceProvider;
use crate::error::{AcquisitionError, SessionError};
use crate::session::{
    CoordinatorState, SessionDescriptor, SessionId, SessionShared, SessionSnapshot, SessionStatus,
};
use crate::store::SessionStore;
use crate::subscriber::{Subscriber, SubscriberHandle};

/// Thread de session possédé par le registre.
struct SessionWorker {
    handle: thread::JoinHandle<Result<(), AcquisitionError>>,
    stop_tx: flume::Sender<()>,
}

/// Thread d'une session et marqueur de suppression.
///
/// Son verrou est tenu pendant le join et la sauvegarde qui suit : un
/// second `end`/`delete` attend la fin du premier.
struct WorkerSlot {
    /// `None` une fois le thread joint.
    worker: Option<SessionWorker>,
    deleted: bool,
}

struct SessionEntry {
    shared: Arc<SessionShared>,
    slot: Arc<Mutex<WorkerSlot>>,
}

/// Cycle de vie des sessions et de leurs abonnés.
///
/// La table id → session est sous un seul verrou, tenu uniquement le temps
/// d'une recherche ou d'une insertion/suppression ; les joins de threads se
/// font sous le verrou du slot de la session, jamais sous celui de la table.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use nf_core::config::NeuroConfig;
/// use nf_session::device::SyntheticProvider;
/// use nf_session::registry::SessionRegistry;
/// use nf_session::session::SessionStatus;
/// use nf_session::store::MemoryStore;
///
/// let config = NeuroConfig::default();
/// let registry = SessionRegistry::new(
///     config.clone(),
///     Arc::new(SyntheticProvider::from_config(&config)),
///     Arc::new(MemoryStore::new()),
/// );
/// let session = registry.create().unwrap();
/// registry.end(session.id).unwrap();
/// assert_eq!(registry.status(session.id).unwrap(), SessionStatus::Ended);
/// registry.delete(session.id).unwrap();
/// assert!(registry.delete(session.id).is_err());
/// ```
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    config: Arc<ArcSwap<NeuroConfig>>,
    provider: Arc<dyn DeviceProvider>,
    store: Arc<dyn SessionStore>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(
        config: NeuroConfig,
        provider: Arc<dyn DeviceProvider>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self::with_shared_config(Arc::new(ArcSwap::from_pointee(config)), provider, store)
    }

    /// Configuration partagée (hot-reload) : chaque nouvelle session lit la
    /// version courante, les sessions en cours gardent la leur.
    #[must_use]
    pub fn with_shared_config(
        config: Arc<ArcSwap<NeuroConfig>>,
        provider: Arc<dyn DeviceProvider>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
            provider,
            store,
        }
    }

    fn entry(
        &self,
        id: SessionId,
    ) -> Result<(Arc<SessionShared>, Arc<Mutex<WorkerSlot>>), SessionError> {
        self.sessions
            .lock()
            .get(&id)
            .map(|e| (Arc::clone(&e.shared), Arc::clone(&e.slot)))
            .ok_or(SessionError::NotFound(id))
    }

    fn shared(&self, id: SessionId) -> Result<Arc<SessionShared>, SessionError> {
        self.sessions
            .lock()
            .get(&id)
            .map(|e| Arc::clone(&e.shared))
            .ok_or(SessionError::NotFound(id))
    }

    /// Crée une session active et démarre son thread de streaming.
    ///
    /// # Errors
    /// `Config` if the current configuration cannot build the filter,
    /// `Spawn` if the OS refuses the thread.
    pub fn create(&self) -> Result<SessionDescriptor, SessionError> {
        let config = self.config.load_full();
        let id = SessionId::new();
        let shared = Arc::new(SessionShared::new(id));
        let coordinator =
            SessionStreamCoordinator::new(Arc::clone(&shared), &config, Arc::clone(&self.store))?;

        if let Err(e) = self.store.save(&shared.snapshot()) {
            log::warn!("Session {}: sauvegarde initiale impossible : {e:#}", id.short());
        }

        let (stop_tx, stop_rx) = flume::bounded(1);
        let provider = Arc::clone(&self.provider);
        let handle = thread::Builder::new()
            .name(format!("nf-session-{}", id.short()))
            .spawn(move || coordinator.run(provider, stop_rx))?;

        let descriptor = shared.descriptor();
        self.sessions.lock().insert(
            id,
            SessionEntry {
                shared,
                slot: Arc::new(Mutex::new(WorkerSlot {
                    worker: Some(SessionWorker { handle, stop_tx }),
                    deleted: false,
                })),
            },
        );
        log::info!("Session {id} créée");
        Ok(descriptor)
    }

    /// Termine la session et attend la sortie de son thread.
    /// Déjà terminée : no-op. Un appel concurrent attend le join en cours.
    ///
    /// # Errors
    /// `NotFound` for an unknown or deleted id.
    pub fn end(&self, id: SessionId) -> Result<(), SessionError> {
        let (shared, slot) = self.entry(id)?;
        let mut slot = slot.lock();
        if slot.deleted {
            return Err(SessionError::NotFound(id));
        }
        stop_locked(&shared, &mut slot);
        if let Err(e) = self.store.save(&shared.snapshot()) {
            log::warn!("Session {}: sauvegarde impossible : {e:#}", id.short());
        }
        Ok(())
    }

    /// Supprime définitivement la session, en la terminant d'abord.
    ///
    /// # Errors
    /// `NotFound` for an unknown or already deleted id.
    pub fn delete(&self, id: SessionId) -> Result<(), SessionError> {
        let (shared, slot) = self.entry(id)?;
        let mut slot = slot.lock();
        if slot.deleted {
            return Err(SessionError::NotFound(id));
        }
        stop_locked(&shared, &mut slot);
        slot.deleted = true;
        self.sessions.lock().remove(&id);
        shared.clear_subscribers();
        if let Err(e) = self.store.remove(id) {
            log::warn!("Session {}: suppression du stockage impossible : {e:#}", id.short());
        }
        log::info!("Session {id} supprimée");
        Ok(())
    }

    /// # Errors
    /// `NotFound` for an unknown id, `InvalidStateTransition` if the session
    /// has ended.
    pub fn register_subscriber(
        &self,
        id: SessionId,
        subscriber: Box<dyn Subscriber>,
    ) -> Result<SubscriberHandle, SessionError> {
        let handle = self.shared(id)?.add_subscriber(subscriber)?;
        log::debug!("Session {}: abonné {} enregistré", id.short(), handle.id());
        Ok(handle)
    }

    /// Retire un abonné. Poignée inconnue : `Ok(false)`.
    ///
    /// # Errors
    /// `NotFound` for an unknown session id.
    pub fn unregister_subscriber(
        &self,
        id: SessionId,
        handle: SubscriberHandle,
    ) -> Result<bool, SessionError> {
        Ok(self.shared(id)?.remove_subscriber(handle))
    }

    /// Sessions triées par date de début décroissante, filtrées, tronquées.
    #[must_use]
    pub fn list_sessions(
        &self,
        limit: usize,
        status: Option<SessionStatus>,
    ) -> Vec<SessionDescriptor> {
        let mut list: Vec<SessionDescriptor> = self
            .sessions
            .lock()
            .values()
            .map(|e| e.shared.descriptor())
            .filter(|d| status.is_none_or(|s| d.status == s))
            .collect();
        list.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        list.truncate(limit);
        list
    }

    /// # Errors
    /// `NotFound` for an unknown id.
    pub fn get(&self, id: SessionId) -> Result<SessionSnapshot, SessionError> {
        Ok(self.shared(id)?.snapshot())
    }

    /// # Errors
    /// `NotFound` for an unknown id.
    pub fn status(&self, id: SessionId) -> Result<SessionStatus, SessionError> {
        Ok(self.shared(id)?.status())
    }

    /// # Errors
    /// `NotFound` for an unknown id.
    pub fn subscriber_count(&self, id: SessionId) -> Result<usize, SessionError> {
        Ok(self.shared(id)?.subscriber_count())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Termine toutes les sessions et joint leurs threads.
    pub fn shutdown(&self) {
        let entries: Vec<(Arc<SessionShared>, Arc<Mutex<WorkerSlot>>)> = self
            .sessions
            .lock()
            .values()
            .map(|e| (Arc::clone(&e.shared), Arc::clone(&e.slot)))
            .collect();

        // Tous les threads sont réveillés avant le premier join.
        let mut running = 0usize;
        for (shared, slot) in &entries {
            shared.end();
            if let Some(worker) = &slot.lock().worker {
                let _ = worker.stop_tx.try_send(());
                running += 1;
            }
        }
        if running == 0 {
            return;
        }
        log::info!("Arrêt de {running} session(s)");
        for (shared, slot) in &entries {
            let mut slot = slot.lock();
            if slot.deleted || slot.worker.is_none() {
                continue;
            }
            stop_locked(shared, &mut slot);
            if let Err(e) = self.store.save(&shared.snapshot()) {
                log::warn!("Session {}: sauvegarde impossible : {e:#}", shared.id().short());
            }
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Termine la session et joint son thread, slot verrouillé par l'appelant.
fn stop_locked(shared: &SessionShared, slot: &mut WorkerSlot) {
    if shared.end() {
        log::info!("Session {} terminée", shared.id());
    }
    if let Some(worker) = slot.worker.take() {
        join_worker(shared, worker);
    }
}

/// Réveille le thread et attend sa sortie.
fn join_worker(shared: &SessionShared, worker: SessionWorker) {
    let id = shared.id().short();
    // Canal plein : un signal est déjà en attente.
    let _ = worker.stop_tx.try_send(());
    match worker.handle.join() {
        Ok(Ok(())) => log::debug!("Session {id}: thread joint"),
        Ok(Err(e)) => log::warn!("Session {id}: thread sorti sur erreur : {e}"),
        Err(_) => {
            log::error!("Session {id}: panic dans le thread de session");
            shared.set_error("panic dans le thread de session".into());
            shared.set_state(CoordinatorState::Stopped);
            shared.end();
        }
    }
}
