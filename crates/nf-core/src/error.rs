use thiserror::Error;

/// Errors originating from configuration and filter construction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Invalid configuration value or structure.
    #[error("Configuration invalide : {0}")]
    Invalid(String),

    /// A cutoff frequency at or above Nyquist.
    #[error("Fréquence de coupure {cutoff_hz} Hz ≥ Nyquist ({nyquist_hz} Hz)")]
    AboveNyquist {
        /// Offending cutoff.
        cutoff_hz: f64,
        /// Half the sampling rate.
        nyquist_hz: f64,
    },

    /// Low cutoff not strictly below high cutoff, or non-positive.
    #[error("Bande passante invalide : {low_hz}–{high_hz} Hz")]
    InvalidBand {
        /// Low cutoff.
        low_hz: f64,
        /// High cutoff.
        high_hz: f64,
    },

    /// Filter order must be ≥ 1.
    #[error("Ordre de filtre invalide : {0}")]
    InvalidOrder(usize),

    /// Channel index outside the configured channel count.
    #[error("Canal {index} hors limites (canaux : {channels})")]
    ChannelOutOfRange {
        /// Offending index.
        index: usize,
        /// Configured channel count.
        channels: usize,
    },
}
