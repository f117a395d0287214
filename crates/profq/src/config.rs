use std::path::PathBuf;
use std::time::Duration;

pub const SESSION_DIR_ENV: &str = "PROFQ_SESSION_DIR";
pub const LOG_ENV: &str = "PROFQ_LOG";

/// Version fingerprint baked in by build.rs; daemons and clients must agree.
pub const BUILD_VERSION: &str = env!("PROFQ_BUILD_VERSION");

/// A bounded polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub interval: Duration,
    pub attempts: u32,
}

impl Poll {
    pub fn total(&self) -> Duration {
        self.interval * self.attempts
    }
}

/// Runtime settings, resolved once per process from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub session_dir: PathBuf,
    pub log_filter: Option<String>,
    pub socket_timeout: Duration,
    /// Waiting for the daemon to bind its socket and write metadata.
    pub startup_poll: Poll,
    /// Waiting for the profile to finish loading.
    pub ready_poll: Poll,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            session_dir: default_session_dir(),
            log_filter: None,
            socket_timeout: Duration::from_secs(30),
            startup_poll: Poll {
                interval: Duration::from_millis(50),
                attempts: 100,
            },
            ready_poll: Poll {
                interval: Duration::from_millis(200),
                attempts: 600,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(dir) = non_empty_env(SESSION_DIR_ENV) {
            config.session_dir = PathBuf::from(dir);
        }
        config.log_filter = non_empty_env(LOG_ENV);
        config
    }

    /// Use `dir` for sessions instead of the environment's choice.
    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = dir.into();
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn default_session_dir() -> PathBuf {
    match non_empty_env("HOME") {
        Some(home) => PathBuf::from(home).join(".profq").join("sessions"),
        None => std::env::temp_dir().join("profq").join("sessions"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.socket_timeout, Duration::from_secs(30));
        assert_eq!(config.startup_poll.total(), Duration::from_secs(5));
        assert_eq!(config.ready_poll.total(), Duration::from_secs(120));
        assert!(config.session_dir.ends_with("sessions"));
    }

    #[test]
    fn test_with_session_dir() {
        let config = Config::default().with_session_dir("/tmp/x");
        assert_eq!(config.session_dir, PathBuf::from("/tmp/x"));
    }
}
