use std::path::PathBuf;

use clap::Parser;

/// neurofocus : scores d'attention EEG en temps réel, diffusés par session.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Fichier de configuration TOML. Défaut : config/default.toml.
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Nombre de sessions synthétiques à démarrer.
    #[arg(short, long, default_value_t = 1)]
    pub sessions: usize,

    /// Durée du run en secondes. Absent : jusqu'à Ctrl-C.
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Répertoire de persistance JSON des sessions. Absent : mémoire seule.
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// Afficher le résumé final en JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Niveau de log : error, warn, info, debug, trace.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Vérifie les combinaisons d'arguments.
    ///
    /// # Errors
    /// Returns an error if no session is requested or the duration is zero.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sessions == 0 {
            anyhow::bail!("Au moins une session est requise (--sessions ≥ 1).");
        }
        if self.duration == Some(0) {
            anyhow::bail!("--duration doit être > 0. Omettez-le pour tourner jusqu'à Ctrl-C.");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let cli = Cli::parse_from(["neurofocus"]);
        assert_eq!(cli.sessions, 1);
        assert!(cli.duration.is_none());
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn zero_sessions_rejected() {
        let cli = Cli::parse_from(["neurofocus", "--sessions", "0"]);
        assert!(cli.validate().is_err());
        let cli = Cli::parse_from(["neurofocus", "-d", "0"]);
        assert!(cli.validate().is_err());
    }
}
