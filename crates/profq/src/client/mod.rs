//! Client side of the daemon protocol: session resolution, requests and
//! daemon startup.

pub mod format;

use crate::config::{BUILD_VERSION, Config, LOG_ENV, SESSION_DIR_ENV};
use crate::error::{Error, Result};
use crate::process::ProcessSupervisor;
use crate::protocol::{ClientMessage, Command, CommandOutput, ServerResponse};
use crate::session::{SessionMetadata, SessionStore};
use std::ffi::OsString;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Run a blocking socket operation on a helper thread, giving up after
/// `timeout`. The operation keeps running in the background if abandoned.
fn with_deadline<T, F>(timeout: Duration, operation: F) -> std::io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(operation());
    });
    rx.recv_timeout(timeout)
        .unwrap_or_else(|_| Err(std::io::Error::from(ErrorKind::TimedOut)))
}

/// Connect with a bound on the wait; a daemon with a full accept backlog
/// would otherwise block the client indefinitely.
fn connect(socket_path: &Path, timeout: Duration) -> std::io::Result<UnixStream> {
    let path = socket_path.to_path_buf();
    with_deadline(timeout, move || UnixStream::connect(path))
}

/// Send one message and read one reply line.
pub fn send_message(
    socket_path: &Path,
    message: &ClientMessage,
    timeout: Duration,
) -> Result<ServerResponse> {
    let io_error = |e: std::io::Error| match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            Error::Timeout(format!("waiting for daemon at {}", socket_path.display()))
        }
        _ => Error::Transport(format!("{}: {e}", socket_path.display())),
    };

    let mut stream = connect(socket_path, timeout).map_err(io_error)?;
    stream.set_read_timeout(Some(timeout)).map_err(io_error)?;
    stream.set_write_timeout(Some(timeout)).map_err(io_error)?;

    let mut payload = serde_json::to_string(message)?;
    payload.push('\n');
    stream.write_all(payload.as_bytes()).map_err(io_error)?;
    stream.flush().map_err(io_error)?;

    let mut line = String::new();
    BufReader::new(&stream)
        .read_line(&mut line)
        .map_err(io_error)?;
    if line.trim().is_empty() {
        return Err(Error::Transport(
            "daemon closed the connection without replying".to_string(),
        ));
    }
    serde_json::from_str(&line)
        .map_err(|e| Error::Transport(format!("malformed reply from daemon: {e}")))
}

/// How a listed session is doing.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Loading,
    Ready,
    Failed(String),
    Unresponsive(String),
    /// Dead or incompatible; its files were removed while listing.
    Removed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Loading => f.write_str("loading"),
            SessionState::Ready => f.write_str("ready"),
            SessionState::Failed(msg) => write!(f, "error: {msg}"),
            SessionState::Unresponsive(msg) => write!(f, "unresponsive: {msg}"),
            SessionState::Removed => f.write_str("stale (removed)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub id: String,
    pub metadata: Option<SessionMetadata>,
    pub current: bool,
    pub state: SessionState,
}

pub struct Client {
    config: Config,
    store: SessionStore,
}

impl Client {
    pub fn new(config: Config) -> Self {
        let store = SessionStore::new(&config.session_dir);
        Client { config, store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn check_session(&self, id: &str) -> Result<SessionMetadata> {
        let metadata = self
            .store
            .validate(id)
            .ok_or_else(|| Error::StaleSession(id.to_string()))?;
        if metadata.build_version != BUILD_VERSION {
            return Err(Error::VersionMismatch {
                id: id.to_string(),
                daemon: metadata.build_version,
                client: BUILD_VERSION.to_string(),
            });
        }
        Ok(metadata)
    }

    /// The session to talk to: `explicit`, else the current one. Dead or
    /// incompatible sessions are cleaned up before the error is returned.
    pub fn resolve_session(&self, explicit: Option<&str>) -> Result<SessionMetadata> {
        let id = match explicit {
            Some(id) => id.to_string(),
            None => self.store.get_current()?.ok_or(Error::NoSession)?,
        };
        match self.check_session(&id) {
            Ok(metadata) => Ok(metadata),
            Err(e) => {
                if e.requires_cleanup() {
                    debug!(session = %id, "removing stale session");
                    self.store.cleanup(&id)?;
                }
                Err(e)
            }
        }
    }

    pub fn request(
        &self,
        session: &SessionMetadata,
        message: &ClientMessage,
    ) -> Result<ServerResponse> {
        send_message(&session.socket_path, message, self.config.socket_timeout)
    }

    /// Run a query command against a session.
    pub fn command(&self, session: Option<&str>, command: Command) -> Result<CommandOutput> {
        let metadata = self.resolve_session(session)?;
        self.request(&metadata, &ClientMessage::Command { command })?
            .into_output()
    }

    /// Spawn a daemon for `profile` and wait until it has loaded it.
    /// Returns the new session id.
    pub fn start_daemon(&self, profile: &str, supervisor: &dyn ProcessSupervisor) -> Result<String> {
        self.store.ensure_dir()?;
        let id = SessionStore::generate_id();

        let args: Vec<OsString> = vec![
            "daemon".into(),
            "--session-id".into(),
            id.clone().into(),
            profile.into(),
        ];
        let mut env = vec![(
            SESSION_DIR_ENV.to_string(),
            self.store.dir().display().to_string(),
        )];
        if let Some(filter) = &self.config.log_filter {
            env.push((LOG_ENV.to_string(), filter.clone()));
        }
        let pid = supervisor.spawn_detached(&args, &env)?;
        debug!(session = %id, pid, "daemon spawned");

        let metadata = self.wait_for_session(&id)?;
        self.wait_until_ready(&metadata)?;
        Ok(id)
    }

    /// Phase one: the daemon has bound its socket and written metadata.
    fn wait_for_session(&self, id: &str) -> Result<SessionMetadata> {
        let poll = self.config.startup_poll;
        for _ in 0..poll.attempts {
            if let Some(metadata) = self.store.validate(id) {
                return Ok(metadata);
            }
            std::thread::sleep(poll.interval);
        }
        Err(Error::Timeout(format!(
            "after {} waiting for the daemon to start (see {})",
            humantime::format_duration(poll.total()),
            self.store.log_path(id).display()
        )))
    }

    /// Phase two: the profile has loaded. Transport failures are retried,
    /// an explicit error reply is not.
    fn wait_until_ready(&self, metadata: &SessionMetadata) -> Result<()> {
        let poll = self.config.ready_poll;
        for _ in 0..poll.attempts {
            match self.request(metadata, &ClientMessage::Status) {
                Ok(ServerResponse::Ready) => return Ok(()),
                Ok(ServerResponse::Error { error }) => return Err(Error::ProfileLoad(error)),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "status poll failed, retrying"),
            }
            std::thread::sleep(poll.interval);
        }
        Err(Error::Timeout(format!(
            "after {} waiting for the profile to load",
            humantime::format_duration(poll.total())
        )))
    }

    /// Ask a session's daemon to exit.
    pub fn stop(&self, session: Option<&str>) -> Result<String> {
        let metadata = self.resolve_session(session)?;
        self.request(&metadata, &ClientMessage::Shutdown)?
            .into_output()?;
        Ok(metadata.id)
    }

    /// Stop every live session and clean up the rest. Returns the ids stopped.
    pub fn stop_all(&self) -> Result<Vec<String>> {
        let mut stopped = Vec::new();
        for id in self.store.list_ids()? {
            match self.store.validate(&id) {
                Some(metadata) => match self.request(&metadata, &ClientMessage::Shutdown) {
                    Ok(_) => stopped.push(id),
                    Err(e) => warn!(session = %id, error = %e, "failed to stop session"),
                },
                None => self.store.cleanup(&id)?,
            }
        }
        Ok(stopped)
    }

    /// Every known session with its state. Stale sessions are removed.
    pub fn list_sessions(&self) -> Result<Vec<SessionEntry>> {
        let current = self.store.get_current()?;
        let mut entries = Vec::new();
        for id in self.store.list_ids()? {
            let metadata = self.store.load_metadata(&id).ok().flatten();
            let state = match self.check_session(&id) {
                Ok(live) => match self.request(&live, &ClientMessage::Status) {
                    Ok(ServerResponse::Ready) => SessionState::Ready,
                    Ok(ServerResponse::Loading) => SessionState::Loading,
                    Ok(ServerResponse::Error { error }) => SessionState::Failed(error),
                    Ok(other) => SessionState::Unresponsive(format!("unexpected reply {other:?}")),
                    Err(e) => SessionState::Unresponsive(e.to_string()),
                },
                Err(_) => {
                    self.store.cleanup(&id)?;
                    SessionState::Removed
                }
            };
            entries.push(SessionEntry {
                current: current.as_deref() == Some(id.as_str()),
                id,
                metadata,
                state,
            });
        }
        Ok(entries)
    }
}
