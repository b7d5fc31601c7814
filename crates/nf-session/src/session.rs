use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use nf_core::frame::{ArtifactFlags, ScoreSet, TickPayload};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::subscriber::{Subscriber, SubscriberHandle};

/// Identifiant unique de session (UUID v4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Huit premiers caractères hexadécimaux, pour les noms de threads et les logs.
    #[must_use]
    pub fn short(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(8);
        s
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Statut métier. `Active → Ended`, jamais l'inverse.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Ended,
}

/// État du coordinateur de la session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    #[default]
    Idle,
    Streaming,
    Stopped,
}

/// Un point de l'historique : scores et artefacts d'un tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSample {
    pub timestamp: DateTime<Utc>,
    pub scores: ScoreSet,
    pub artifacts: ArtifactFlags,
}

/// Décrochage d'attention : tick dont l'attention passe sous le seuil.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropEvent {
    /// Secondes écoulées depuis le début de la session.
    pub offset_secs: f64,
    /// Attention observée.
    pub score: f64,
}

/// Ce qu'un tick ajoute à la session : persisté en append, sans recopier
/// l'historique.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickRecord {
    pub id: SessionId,
    /// Position du point dans l'historique.
    pub index: usize,
    pub sample: ScoreSample,
    /// Moyenne courante après ce tick.
    pub average: ScoreSet,
    pub drop_event: Option<DropEvent>,
}

impl TickRecord {
    /// Rejoue le tick sur un instantané. Ignoré s'il n'est pas le suivant
    /// attendu (déjà présent, ou trou).
    pub fn apply_to(&self, snapshot: &mut SessionSnapshot) -> bool {
        if self.id != snapshot.id || self.index != snapshot.history.len() {
            return false;
        }
        snapshot.history.push(self.sample.clone());
        snapshot.average = self.average;
        snapshot.drop_events.extend(self.drop_event);
        true
    }
}

/// Vue légère pour les listings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub id: SessionId,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Copie complète de l'état d'une session, persistée à chaque tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub status: SessionStatus,
    pub state: CoordinatorState,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub history: Vec<ScoreSample>,
    pub average: ScoreSet,
    pub drop_events: Vec<DropEvent>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    #[must_use]
    pub fn descriptor(&self) -> SessionDescriptor {
        SessionDescriptor {
            id: self.id,
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

/// Partie mutable des métriques, sous le verrou `metrics`.
#[derive(Debug, Default)]
struct Metrics {
    status: SessionStatus,
    state: CoordinatorState,
    end_time: Option<DateTime<Utc>>,
    history: Vec<ScoreSample>,
    average: ScoreSet,
    drop_events: Vec<DropEvent>,
    last_error: Option<String>,
}

/// État d'une session partagé entre le registre et son coordinateur.
///
/// Deux verrous : `metrics` (statut, historique) et `subscribers`. Quand
/// les deux sont pris, c'est toujours `subscribers` puis `metrics`.
pub(crate) struct SessionShared {
    id: SessionId,
    start_time: DateTime<Utc>,
    metrics: Mutex<Metrics>,
    subscribers: Mutex<Vec<(SubscriberHandle, Box<dyn Subscriber>)>>,
    next_handle: AtomicU64,
}

impl SessionShared {
    pub(crate) fn new(id: SessionId) -> Self {
        Self {
            id,
            start_time: Utc::now(),
            metrics: Mutex::new(Metrics::default()),
            subscribers: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.metrics.lock().status == SessionStatus::Active
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.metrics.lock().status
    }

    /// Passe la session à `Ended`. Retourne `true` seulement à la transition.
    ///
    /// Tient `subscribers` pendant la transition : aucun enregistrement ne
    /// peut s'intercaler.
    pub(crate) fn end(&self) -> bool {
        let _subs = self.subscribers.lock();
        let mut m = self.metrics.lock();
        if m.status == SessionStatus::Ended {
            return false;
        }
        m.status = SessionStatus::Ended;
        m.end_time = Some(Utc::now());
        true
    }

    pub(crate) fn set_state(&self, state: CoordinatorState) {
        self.metrics.lock().state = state;
    }

    pub(crate) fn set_error(&self, error: String) {
        self.metrics.lock().last_error = Some(error);
    }

    /// Ajoute un point d'historique, met à jour la moyenne et les
    /// décrochages, et retourne l'enregistrement à persister.
    ///
    /// `None` si la session est terminée : le tick est abandonné.
    pub(crate) fn record(&self, sample: ScoreSample, drop_threshold: f64) -> Option<TickRecord> {
        let mut m = self.metrics.lock();
        if m.status != SessionStatus::Active {
            return None;
        }
        let drop_event = (sample.scores.attention < drop_threshold).then(|| {
            let offset = (sample.timestamp - self.start_time).num_microseconds().unwrap_or(0);
            DropEvent {
                offset_secs: (offset as f64 / 1e6).max(0.0),
                score: sample.scores.attention,
            }
        });
        m.drop_events.extend(drop_event);
        let index = m.history.len();
        m.average.accumulate(&sample.scores, index + 1);
        m.history.push(sample.clone());
        Some(TickRecord {
            id: self.id,
            index,
            sample,
            average: m.average,
            drop_event,
        })
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let m = self.metrics.lock();
        self.snapshot_locked(&m)
    }

    pub(crate) fn descriptor(&self) -> SessionDescriptor {
        let m = self.metrics.lock();
        SessionDescriptor {
            id: self.id,
            status: m.status,
            start_time: self.start_time,
            end_time: m.end_time,
        }
    }

    fn snapshot_locked(&self, m: &Metrics) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            status: m.status,
            state: m.state,
            start_time: self.start_time,
            end_time: m.end_time,
            history: m.history.clone(),
            average: m.average,
            drop_events: m.drop_events.clone(),
            last_error: m.last_error.clone(),
        }
    }

    /// Enregistre un abonné ; refusé si la session n'est plus active.
    pub(crate) fn add_subscriber(
        &self,
        subscriber: Box<dyn Subscriber>,
    ) -> Result<SubscriberHandle, SessionError> {
        let mut subs = self.subscribers.lock();
        if !self.is_active() {
            return Err(SessionError::InvalidStateTransition {
                id: self.id,
                reason: "la session n'accepte plus d'abonnés",
            });
        }
        let handle = SubscriberHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        subs.push((handle, subscriber));
        Ok(handle)
    }

    pub(crate) fn remove_subscriber(&self, handle: SubscriberHandle) -> bool {
        let mut subs = self.subscribers.lock();
        let before = subs.len();
        subs.retain(|(h, _)| *h != handle);
        subs.len() != before
    }

    pub(crate) fn clear_subscribers(&self) {
        for (_, sub) in self.subscribers.lock().drain(..) {
            sub.close();
        }
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Envoie le payload à chaque abonné sous le verrou, retire ceux qui
    /// échouent. Retourne le nombre d'envois réussis.
    pub(crate) fn broadcast(&self, payload: &TickPayload) -> usize {
        let mut subs = self.subscribers.lock();
        subs.retain(|(handle, sub)| match sub.send(payload) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Session {}: abonné {} retiré ({e})", self.id.short(), handle.0);
                sub.close();
                false
            }
        });
        subs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SubscriberSendError;
    use std::sync::Arc;
    use crate::subscriber::ChannelSubscriber;

    struct Broken;

    impl Subscriber for Broken {
        fn send(&self, _payload: &TickPayload) -> Result<(), SubscriberSendError> {
            Err(SubscriberSendError::Other("socket fermée".into()))
        }
    }

    fn sample(attention: f64) -> ScoreSample {
        ScoreSample {
            timestamp: Utc::now(),
            scores: ScoreSet {
                attention,
                ..ScoreSet::default()
            },
            artifacts: ArtifactFlags::default(),
        }
    }

    #[test]
    fn failing_subscriber_is_removed_and_others_still_receive() {
        let shared = SessionShared::new(SessionId::new());
        let (a, rx_a) = ChannelSubscriber::bounded(4);
        let (c, rx_c) = ChannelSubscriber::bounded(4);
        shared.add_subscriber(Box::new(a)).unwrap();
        let broken = shared.add_subscriber(Box::new(Broken)).unwrap();
        shared.add_subscriber(Box::new(c)).unwrap();

        let payload = TickPayload {
            attention_score: 61.0,
            ..TickPayload::default()
        };
        assert_eq!(shared.broadcast(&payload), 2);
        assert_eq!(shared.subscriber_count(), 2);
        assert_eq!(rx_a.try_recv().unwrap(), payload);
        assert_eq!(rx_c.try_recv().unwrap(), payload);
        assert!(!shared.remove_subscriber(broken));
    }

    #[test]
    fn drop_events_recorded_below_threshold() {
        let shared = SessionShared::new(SessionId::new());
        shared.record(sample(70.0), 50.0);
        let dropped = shared.record(sample(40.0), 50.0).unwrap();
        let last = shared.record(sample(50.0), 50.0).unwrap();
        assert!(dropped.drop_event.is_some());
        assert!(last.drop_event.is_none());
        assert_eq!(last.index, 2);

        let snap = shared.snapshot();
        assert_eq!(snap.history.len(), 3);
        assert_eq!(snap.drop_events.len(), 1);
        assert!((snap.drop_events[0].score - 40.0).abs() < f64::EPSILON);
        assert!(snap.drop_events[0].offset_secs >= 0.0);
        assert!((snap.average.attention - 160.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn end_is_one_way_and_idempotent() {
        let shared = SessionShared::new(SessionId::new());
        assert!(shared.end());
        let first = shared.snapshot().end_time;
        assert!(!shared.end());
        assert_eq!(shared.snapshot().end_time, first);
        assert_eq!(shared.status(), SessionStatus::Ended);
    }

    #[test]
    fn ended_session_refuses_ticks() {
        let shared = SessionShared::new(SessionId::new());
        assert!(shared.record(sample(60.0), 50.0).is_some());
        shared.end();
        assert!(shared.record(sample(30.0), 50.0).is_none());
        let snap = shared.snapshot();
        assert_eq!(snap.history.len(), 1);
        assert!(snap.drop_events.is_empty());
    }

    #[test]
    fn replaying_records_rebuilds_the_snapshot() {
        let shared = SessionShared::new(SessionId::new());
        let mut replayed = shared.snapshot();
        let records: Vec<_> = [80.0, 20.0, 55.0]
            .into_iter()
            .filter_map(|a| shared.record(sample(a), 50.0))
            .collect();
        for r in &records {
            assert!(r.apply_to(&mut replayed));
        }
        // Déjà appliqué : ignoré.
        assert!(!records[0].apply_to(&mut replayed));
        assert_eq!(replayed, shared.snapshot());
    }

    #[test]
    fn no_subscriber_slips_in_after_end() {
        let shared = Arc::new(SessionShared::new(SessionId::new()));
        let adder = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || {
                let mut receivers = Vec::new();
                loop {
                    let (sub, rx) = ChannelSubscriber::bounded(1);
                    match shared.add_subscriber(Box::new(sub)) {
                        Ok(_) => receivers.push(rx),
                        Err(_) => return receivers.len(),
                    }
                }
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(5));
        shared.end();
        let at_end = shared.subscriber_count();
        let accepted = adder.join().unwrap();
        assert_eq!(shared.subscriber_count(), at_end);
        assert_eq!(accepted, at_end);
    }

    #[test]
    fn ended_session_rejects_subscribers() {
        let shared = SessionShared::new(SessionId::new());
        shared.end();
        let (sub, _rx) = ChannelSubscriber::bounded(1);
        assert!(matches!(
            shared.add_subscriber(Box::new(sub)),
            Err(SessionError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn snapshot_serializes_with_camel_case() {
        let shared = SessionShared::new(SessionId::new());
        shared.record(sample(10.0), 50.0);
        let json = serde_json::to_value(shared.snapshot()).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["state"], "idle");
        assert!(json["dropEvents"][0]["offsetSecs"].is_number());
        let back: SessionSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, shared.id());
    }

    #[test]
    fn short_id_has_eight_chars() {
        let id = SessionId::new();
        assert_eq!(id.short().len(), 8);
        assert_eq!(id.to_string().parse::<SessionId>().unwrap(), id);
    }
}
