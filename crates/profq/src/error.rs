use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No active session. Run `profq load <profile>` first.")]
    NoSession,

    #[error("Session {0} is no longer running. Run `profq load <profile>` again.")]
    StaleSession(String),

    #[error(
        "Session {id} was started by a different profq build ({daemon}, this is {client}). \
         Run `profq load <profile>` again."
    )]
    VersionMismatch {
        id: String,
        daemon: String,
        client: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out {0}")]
    Timeout(String),

    #[error("Profile is still loading, try again shortly")]
    DaemonLoading,

    #[error("Profile failed to load: {0}")]
    ProfileLoad(String),

    #[error("Daemon error: {0}")]
    Daemon(String),

    #[error("Unknown handle: {0}")]
    UnknownHandle(String),

    #[error("{0}")]
    Query(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
}

impl Error {
    /// Every reported failure exits with 1; callers only distinguish success.
    pub fn exit_code(&self) -> i32 {
        exit_code::GENERAL_ERROR
    }

    /// Session errors leave artifacts behind that the caller should remove.
    pub fn requires_cleanup(&self) -> bool {
        matches!(self, Error::StaleSession(_) | Error::VersionMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_errors_request_cleanup() {
        assert!(Error::StaleSession("abc".into()).requires_cleanup());
        assert!(
            Error::VersionMismatch {
                id: "abc".into(),
                daemon: "1".into(),
                client: "2".into(),
            }
            .requires_cleanup()
        );
        assert!(!Error::DaemonLoading.requires_cleanup());
        assert_eq!(Error::NoSession.exit_code(), exit_code::GENERAL_ERROR);
    }
}
