use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use arc_swap::ArcSwap;
use clap::Parser;
use nf_core::config::NeuroConfig;
use nf_session::{JsonDirStore, MemoryStore, SessionRegistry, SessionStore, SyntheticProvider};

pub mod cli;
pub mod hotreload;
pub mod pipeline;

fn main() -> Result<()> {
    // 1. Parser CLI
    let cli = cli::Cli::parse();

    // 2. Initialiser le logging
    env_logger::Builder::new()
        .filter_level(cli.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();

    // 3. Valider les arguments
    cli.validate()?;

    // 4. Charger la config
    let config = Arc::new(ArcSwap::from_pointee(resolve_config(&cli)?));

    // 5. Hot-reload : ne concerne que les sessions créées ensuite
    let _watcher = if cli.config.exists() {
        Some(hotreload::spawn_config_watcher(&cli.config, &config)?)
    } else {
        None
    };

    // 6. Stockage et registre
    let store: Arc<dyn SessionStore> = match cli.store_dir {
        Some(ref dir) => Arc::new(JsonDirStore::new(dir)?),
        None => Arc::new(MemoryStore::new()),
    };
    let provider = Arc::new(SyntheticProvider::from_config(&config.load()));
    let registry = SessionRegistry::with_shared_config(Arc::clone(&config), provider, store);

    // 7. Ctrl-C → canal de sortie
    let (quit_tx, quit_rx) = flume::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = quit_tx.try_send(());
    })?;

    // 8. Démarrer les sessions
    let mut sessions = Vec::with_capacity(cli.sessions);
    for _ in 0..cli.sessions {
        sessions.push(pipeline::start_monitored_session(&registry)?);
    }
    log::info!(
        "{} session(s) démarrée(s), tick {} ms",
        sessions.len(),
        config.load().session.tick_ms
    );

    // 9. Attendre la durée ou Ctrl-C
    match cli.duration {
        Some(secs) => {
            let _ = quit_rx.recv_timeout(Duration::from_secs(secs));
        }
        None => {
            let _ = quit_rx.recv();
        }
    }

    // 10. Arrêt, résumé
    registry.shutdown();
    let snapshots: Vec<_> = sessions
        .iter()
        .filter_map(|s| match registry.get(s.id) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("{e}");
                None
            }
        })
        .collect();

    // Le registre relâche les abonnés : les moniteurs sortent.
    drop(registry);
    let stats: Vec<_> = sessions.into_iter().map(pipeline::MonitoredSession::join).collect();

    if cli.json {
        let summaries: Vec<_> = snapshots
            .iter()
            .zip(&stats)
            .map(|(snap, st)| pipeline::summary_json(snap, st))
            .collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        println!("Fin du run : {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
        for (snap, st) in snapshots.iter().zip(&stats) {
            println!("  {}", pipeline::summary_line(snap, st));
        }
    }
    Ok(())
}

/// Charge --config, ou les défauts si le fichier est absent.
fn resolve_config(cli: &cli::Cli) -> Result<NeuroConfig> {
    if cli.config.exists() {
        nf_core::config::load_config(&cli.config)
    } else {
        log::warn!(
            "Config introuvable : {}. Utilisation des défauts.",
            cli.config.display()
        );
        Ok(NeuroConfig::default())
    }
}
