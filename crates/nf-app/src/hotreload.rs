use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use nf_core::config::NeuroConfig;
use notify::{Event, EventKind, RecursiveMode, Watcher};

/// Surveille le fichier config et met à jour l'ArcSwap.
///
/// Les sessions déjà lancées gardent leur config ; seules les suivantes
/// voient la nouvelle. Retourne le Watcher (doit rester vivant).
///
/// # Errors
/// Returns an error if the watcher cannot be created or the path cannot be watched.
pub fn spawn_config_watcher(
    config_path: &Path,
    config: &Arc<ArcSwap<NeuroConfig>>,
) -> Result<impl Watcher + use<>> {
    let config = Arc::clone(config);
    let path = config_path.to_path_buf();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res
            && matches!(event.kind, EventKind::Modify(_))
        {
            reload(&path, &config);
        }
    })?;

    watcher.watch(config_path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Recharge la config ; en cas d'erreur l'ancienne reste en place.
fn reload(path: &Path, config: &ArcSwap<NeuroConfig>) -> bool {
    match nf_core::config::load_config(path) {
        Ok(new_config) => {
            config.store(Arc::new(new_config));
            log::info!("Config rechargée depuis {}", path.display());
            true
        }
        Err(e) => {
            log::warn!("Erreur de rechargement config : {e:#}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_file_keeps_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neurofocus.toml");
        let config = ArcSwap::from_pointee(NeuroConfig::default());

        std::fs::write(&path, "[session]\ntick_ms = 100\n").unwrap();
        assert!(reload(&path, &config));
        assert_eq!(config.load().session.tick_ms, 100);

        std::fs::write(&path, "[signal]\nhigh_cut_hz = 500.0\n").unwrap();
        assert!(!reload(&path, &config));
        assert_eq!(config.load().session.tick_ms, 100);
    }
}
