use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::session::{SessionId, SessionSnapshot, TickRecord};

/// Stockage durable des sessions, clé = id.
///
/// `save` écrit l'instantané complet (création, fin de session) ; `append`
/// ajoute un tick à coût constant. Une cohérence à terme suffit.
pub trait SessionStore: Send + Sync {
    /// Remplace l'instantané stocké pour cette session.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be written.
    fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;

    /// Ajoute un tick à la session déjà sauvegardée.
    ///
    /// # Errors
    /// Returns an error if the session was never saved or the record
    /// cannot be written.
    fn append(&self, record: &TickRecord) -> Result<()>;

    /// # Errors
    /// Returns an error if the stored snapshot cannot be read or decoded.
    fn load(&self, id: SessionId) -> Result<Option<SessionSnapshot>>;

    /// Oublie la session. Absente : pas d'erreur.
    ///
    /// # Errors
    /// Returns an error if the underlying storage refuses the removal.
    fn remove(&self, id: SessionId) -> Result<()>;
}

/// Stockage en mémoire (tests, runs éphémères).
#[derive(Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<SessionId, SessionSnapshot>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.snapshots.lock().insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    fn append(&self, record: &TickRecord) -> Result<()> {
        let mut snapshots = self.snapshots.lock();
        let snapshot = snapshots
            .get_mut(&record.id)
            .with_context(|| format!("Session inconnue du stockage : {}", record.id))?;
        record.apply_to(snapshot);
        Ok(())
    }

    fn load(&self, id: SessionId) -> Result<Option<SessionSnapshot>> {
        Ok(self.snapshots.lock().get(&id).cloned())
    }

    fn remove(&self, id: SessionId) -> Result<()> {
        self.snapshots.lock().remove(&id);
        Ok(())
    }
}

/// Un fichier `<id>.json` par session dans un répertoire, plus un journal
/// `<id>.ticks.jsonl` des ticks ajoutés depuis.
///
/// L'instantané est écrit atomiquement (fichier temporaire dans le même
/// répertoire, puis renommage) et vide le journal ; `load` rejoue le journal
/// par-dessus l'instantané.
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    /// Crée le répertoire au besoin.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Impossible de créer {}", dir.display()))?;
        log::debug!("JsonDirStore: {}", dir.display());
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: SessionId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn journal_for(&self, id: SessionId) -> PathBuf {
        self.dir.join(format!("{id}.ticks.jsonl"))
    }
}

/// Supprime un fichier ; absent n'est pas une erreur.
fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Impossible de supprimer {}", path.display())),
    }
}

impl SessionStore for JsonDirStore {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let path = self.path_for(snapshot.id);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Fichier temporaire impossible dans {}", self.dir.display()))?;
        serde_json::to_writer(&mut tmp, snapshot).context("Sérialisation de la session")?;
        tmp.flush()?;
        tmp.persist(&path)
            .with_context(|| format!("Impossible d'écrire {}", path.display()))?;
        // L'instantané contient désormais tout le journal.
        remove_if_present(&self.journal_for(snapshot.id))
    }

    fn append(&self, record: &TickRecord) -> Result<()> {
        if !self.path_for(record.id).exists() {
            anyhow::bail!("Session inconnue du stockage : {}", record.id);
        }
        let path = self.journal_for(record.id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Impossible d'ouvrir {}", path.display()))?;
        let mut line = serde_json::to_vec(record).context("Sérialisation du tick")?;
        line.push(b'\n');
        file.write_all(&line)
            .with_context(|| format!("Impossible d'écrire {}", path.display()))?;
        Ok(())
    }

    fn load(&self, id: SessionId) -> Result<Option<SessionSnapshot>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Impossible de lire {}", path.display()))?;
        let mut snapshot: SessionSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Session corrompue : {}", path.display()))?;

        let journal = self.journal_for(id);
        if journal.exists() {
            let file = std::fs::File::open(&journal)
                .with_context(|| format!("Impossible de lire {}", journal.display()))?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                match serde_json::from_str::<TickRecord>(&line) {
                    Ok(record) => {
                        record.apply_to(&mut snapshot);
                    }
                    // Dernière ligne tronquée par un arrêt brutal.
                    Err(e) => {
                        log::warn!("Tick illisible dans {} : {e}", journal.display());
                        break;
                    }
                }
            }
        }
        Ok(Some(snapshot))
    }

    fn remove(&self, id: SessionId) -> Result<()> {
        remove_if_present(&self.journal_for(id))?;
        remove_if_present(&self.path_for(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CoordinatorState, DropEvent, ScoreSample, SessionStatus};
    use chrono::Utc;
    use nf_core::frame::{ArtifactFlags, ScoreSet};

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            id: SessionId::new(),
            status: SessionStatus::Active,
            state: CoordinatorState::Streaming,
            start_time: Utc::now(),
            end_time: None,
            history: Vec::new(),
            average: ScoreSet {
                attention: 42.0,
                ..ScoreSet::default()
            },
            drop_events: Vec::new(),
            last_error: None,
        }
    }

    #[test]
    fn json_store_writes_one_file_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirStore::new(dir.path().join("sessions")).unwrap();
        let mut snap = snapshot();
        store.save(&snap).unwrap();
        snap.status = SessionStatus::Ended;
        store.save(&snap).unwrap();

        let files: Vec<_> = std::fs::read_dir(store.dir()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let loaded = store.load(snap.id).unwrap().unwrap();
        assert_eq!(loaded, snap);

        store.remove(snap.id).unwrap();
        assert!(store.load(snap.id).unwrap().is_none());
        store.remove(snap.id).unwrap();
    }

    fn tick(snap: &SessionSnapshot, index: usize, attention: f64) -> TickRecord {
        let scores = ScoreSet {
            attention,
            ..ScoreSet::default()
        };
        TickRecord {
            id: snap.id,
            index,
            sample: ScoreSample {
                timestamp: Utc::now(),
                scores,
                artifacts: ArtifactFlags::default(),
            },
            average: scores,
            drop_event: (attention < 50.0).then_some(DropEvent {
                offset_secs: index as f64,
                score: attention,
            }),
        }
    }

    #[test]
    fn json_store_replays_appended_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirStore::new(dir.path()).unwrap();
        let mut snap = snapshot();
        assert!(store.append(&tick(&snap, 0, 70.0)).is_err());

        store.save(&snap).unwrap();
        store.append(&tick(&snap, 0, 70.0)).unwrap();
        store.append(&tick(&snap, 1, 30.0)).unwrap();
        let loaded = store.load(snap.id).unwrap().unwrap();
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.drop_events.len(), 1);

        // Un instantané complet absorbe le journal.
        snap = loaded;
        snap.status = SessionStatus::Ended;
        store.save(&snap).unwrap();
        assert!(!store.journal_for(snap.id).exists());
        assert_eq!(store.load(snap.id).unwrap().unwrap(), snap);

        store.append(&tick(&snap, 2, 90.0)).unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(store.journal_for(snap.id))
            .unwrap()
            .write_all(b"{\"id\":")
            .unwrap();
        assert_eq!(store.load(snap.id).unwrap().unwrap().history.len(), 3);

        store.remove(snap.id).unwrap();
        assert_eq!(std::fs::read_dir(store.dir()).unwrap().count(), 0);
    }

    #[test]
    fn memory_store_applies_ticks_in_order() {
        let store = MemoryStore::new();
        let snap = snapshot();
        assert!(store.append(&tick(&snap, 0, 70.0)).is_err());
        store.save(&snap).unwrap();
        store.append(&tick(&snap, 0, 70.0)).unwrap();
        store.append(&tick(&snap, 0, 70.0)).unwrap();
        store.append(&tick(&snap, 1, 40.0)).unwrap();
        let loaded = store.load(snap.id).unwrap().unwrap();
        assert_eq!(loaded.history.len(), 2);
        assert!((loaded.average.attention - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn memory_store_replaces_snapshots() {
        let store = MemoryStore::new();
        let snap = snapshot();
        store.save(&snap).unwrap();
        store.save(&snap).unwrap();
        assert_eq!(store.len(), 1);
        store.remove(snap.id).unwrap();
        assert!(store.is_empty());
    }
}
