pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("schema migration v{from}->v{to} failed: {message}")]
    Migration { from: u32, to: u32, message: String },

    #[error("stored data is corrupt: {message}")]
    Corrupt { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid step transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("decryption failed")]
    Decryption,

    #[error("encryption failed: {message}")]
    Encryption { message: String },

    #[error("invalid backup: {message}")]
    Validation { message: String },

    #[error("remote {provider} error: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },

    #[error("remote backup not found")]
    RemoteBlobMissing,

    #[error("remote session is not authenticated")]
    Unauthenticated,

    #[error("backup passphrase is empty")]
    MissingPassphrase,

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Whether the same operation may succeed if the user simply tries again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Io(_) | Self::Cancelled)
    }

    /// Text suitable for showing to the person operating the app.
    ///
    /// Never includes key material or cipher details; a failed decryption only
    /// ever reads as a passphrase problem.
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingPassphrase => "Enter a backup passphrase first.".to_string(),
            Self::Unauthenticated => "Sign in to the backup account first.".to_string(),
            Self::RemoteBlobMissing => "No backup was found for this account.".to_string(),
            Self::Decryption => "The passphrase is incorrect.".to_string(),
            Self::Validation { .. } => {
                "The backup file is damaged or from an unsupported version.".to_string()
            }
            Self::Transport { .. } | Self::Io(_) => {
                "Could not reach the backup storage. Please try again.".to_string()
            }
            Self::Cancelled => "The operation was cancelled.".to_string(),
            Self::Migration { .. } | Self::Corrupt { .. } => {
                "The local database could not be opened.".to_string()
            }
            Self::NotFound { entity, .. } => format!("The {entity} no longer exists."),
            Self::InvalidTransition { from, to } => {
                format!("A cut cannot move from {from} to {to}.")
            }
            Self::InvalidConfig { message } => format!("Invalid settings: {message}"),
            Self::Sqlite(_) | Self::Encryption { .. } => "The operation failed.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decryption_message_does_not_leak_details() {
        let err = Error::Decryption;
        assert_eq!(err.to_string(), "decryption failed");
        assert!(!err.user_message().to_lowercase().contains("tag"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn transport_errors_are_retryable() {
        let err = Error::Transport {
            provider: "test.mem",
            message: "connection reset".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!Error::validation("bad").is_retryable());
    }
}
