use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nf_core::frame::TickPayload;
use nf_session::{ChannelSubscriber, SessionId, SessionRegistry, SessionSnapshot};

/// Profondeur de la file d'un moniteur : au-delà, l'abonné est retiré.
const MONITOR_QUEUE: usize = 64;

/// Intervalle des logs `info` d'un moniteur ; le reste passe en `trace`.
const LOG_EVERY: Duration = Duration::from_secs(1);

/// Ce qu'un moniteur a vu passer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MonitorStats {
    pub payloads: usize,
    pub last_attention: Option<f64>,
}

/// Session démarrée et son thread moniteur.
pub struct MonitoredSession {
    pub id: SessionId,
    handle: JoinHandle<MonitorStats>,
}

impl MonitoredSession {
    /// Attend la fin du moniteur (le canal se ferme quand le registre
    /// relâche l'abonné).
    #[must_use]
    pub fn join(self) -> MonitorStats {
        match self.handle.join() {
            Ok(stats) => stats,
            Err(_) => {
                log::error!("Moniteur {} : panic", self.id.short());
                MonitorStats::default()
            }
        }
    }
}

/// Crée une session et y abonne un moniteur qui journalise les ticks.
///
/// # Errors
/// Returns an error if the session cannot be created or the monitor
/// thread cannot be spawned.
pub fn start_monitored_session(registry: &SessionRegistry) -> anyhow::Result<MonitoredSession> {
    let descriptor = registry.create()?;
    let id = descriptor.id;
    let (subscriber, rx) = ChannelSubscriber::bounded(MONITOR_QUEUE);
    registry.register_subscriber(id, Box::new(subscriber))?;

    let handle = thread::Builder::new()
        .name(format!("nf-monitor-{}", id.short()))
        .spawn(move || monitor_loop(id, &rx, LOG_EVERY))?;
    Ok(MonitoredSession { id, handle })
}

/// Consomme les payloads jusqu'à fermeture du canal.
fn monitor_loop(
    id: SessionId,
    rx: &flume::Receiver<TickPayload>,
    log_every: Duration,
) -> MonitorStats {
    let mut stats = MonitorStats::default();
    let mut last_log: Option<Instant> = None;
    while let Ok(payload) = rx.recv() {
        stats.payloads += 1;
        stats.last_attention = Some(payload.attention_score);
        let due = last_log.is_none_or(|t| t.elapsed() >= log_every);
        if due {
            last_log = Some(Instant::now());
            log::info!(
                "[{}] attention {:>5.1} | {} canaux | batterie {}",
                id.short(),
                payload.attention_score,
                payload.channels.len(),
                payload
                    .device_status
                    .get("battery")
                    .map_or_else(|| "?".to_string(), |b| format!("{b:.0}%")),
            );
        } else {
            log::trace!("[{}] attention {:.1}", id.short(), payload.attention_score);
        }
    }
    log::debug!("Moniteur {} : canal fermé après {} ticks", id.short(), stats.payloads);
    stats
}

/// Ligne de résumé affichée en fin de run.
#[must_use]
pub fn summary_line(snapshot: &SessionSnapshot, stats: &MonitorStats) -> String {
    let mut line = format!(
        "{} [{:?}] {} ticks ({} reçus) | attention moy. {:.1} | focus {:.1} | {} chute(s)",
        snapshot.id.short(),
        snapshot.status,
        snapshot.history.len(),
        stats.payloads,
        snapshot.average.attention,
        snapshot.average.focus,
        snapshot.drop_events.len(),
    );
    if let Some(ref error) = snapshot.last_error {
        line.push_str(&format!(" | erreur : {error}"));
    }
    line
}

/// Résumé JSON d'une session.
#[must_use]
pub fn summary_json(snapshot: &SessionSnapshot, stats: &MonitorStats) -> serde_json::Value {
    serde_json::json!({
        "id": snapshot.id,
        "status": snapshot.status,
        "startTime": snapshot.start_time,
        "endTime": snapshot.end_time,
        "ticks": snapshot.history.len(),
        "received": stats.payloads,
        "average": snapshot.average,
        "dropEvents": snapshot.drop_events,
        "lastError": snapshot.last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_counts_until_channel_closes() {
        let (tx, rx) = flume::unbounded();
        for score in [40.0, 55.0, 61.5] {
            tx.send(TickPayload {
                attention_score: score,
                ..TickPayload::default()
            })
            .unwrap();
        }
        drop(tx);
        let stats = monitor_loop(SessionId::new(), &rx, Duration::ZERO);
        assert_eq!(stats.payloads, 3);
        assert_eq!(stats.last_attention, Some(61.5));
    }

    #[test]
    fn summary_mentions_errors() {
        let (tx, rx) = flume::unbounded::<TickPayload>();
        drop(tx);
        let stats = monitor_loop(SessionId::new(), &rx, LOG_EVERY);
        assert_eq!(stats, MonitorStats::default());

        let registry = SessionRegistry::new(
            nf_core::config::NeuroConfig::default(),
            std::sync::Arc::new(nf_session::SyntheticProvider::from_config(
                &nf_core::config::NeuroConfig::default(),
            )),
            std::sync::Arc::new(nf_session::MemoryStore::new()),
        );
        let session = start_monitored_session(&registry).unwrap();
        registry.end(session.id).unwrap();
        let snapshot = registry.get(session.id).unwrap();
        let line = summary_line(&snapshot, &MonitorStats::default());
        assert!(line.starts_with(&session.id.short()));
        assert!(!line.contains("erreur"));
        let json = summary_json(&snapshot, &MonitorStats::default());
        assert_eq!(json["status"], "ended");

        drop(registry);
        let _ = session.join();
    }
}
