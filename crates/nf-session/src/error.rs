use nf_core::error::ConfigError;
use thiserror::Error;

use crate::session::SessionId;

/// Échec de lecture du device.
///
/// `Recoverable` est retenté au tick suivant ; `Fatal` arrête la session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("Lecture device échouée : {0}")]
    Recoverable(String),

    #[error("Device perdu : {0}")]
    Fatal(String),
}

impl AcquisitionError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Échec d'envoi à un abonné. L'abonné est retiré, la session continue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriberSendError {
    #[error("Abonné déconnecté")]
    Disconnected,

    #[error("File de l'abonné pleine")]
    Full,

    #[error("Envoi échoué : {0}")]
    Other(String),
}

/// Erreurs remontées par le registre de sessions.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session introuvable : {0}")]
    NotFound(SessionId),

    #[error("Transition invalide pour la session {id} : {reason}")]
    InvalidStateTransition {
        id: SessionId,
        reason: &'static str,
    },

    #[error("Impossible de démarrer le thread de session : {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
