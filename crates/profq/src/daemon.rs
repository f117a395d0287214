//! The background process that owns one loaded profile.
//!
//! The socket is bound and session metadata written before the profile is
//! loaded, so clients can tell "not started" from "still loading". Requests
//! are newline-delimited JSON; every connection is served by its own task on
//! a single-threaded runtime.

use crate::config::{BUILD_VERSION, Config};
use crate::error::{Error, Result};
use crate::profile::Profile;
use crate::protocol::{ClientMessage, ServerResponse};
use crate::query::ProfileQuerier;
use crate::session::SessionStore;
use crate::{logging, storage};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Produces the profile a daemon serves.
pub trait ProfileLoader: Send + Sync + 'static {
    fn load(&self, source: &str) -> Result<Profile>;
}

/// Loads JSON or SQLite profiles from disk.
pub struct FileLoader;

impl ProfileLoader for FileLoader {
    fn load(&self, source: &str) -> Result<Profile> {
        storage::load_profile(source)
    }
}

enum LoadState {
    Loading,
    Ready(Box<ProfileQuerier>),
    Failed(String),
}

type SharedState = Arc<Mutex<LoadState>>;

pub struct DaemonOptions {
    pub session_id: String,
    pub profile_path: String,
    pub store: SessionStore,
    pub build_version: String,
    /// Route SIGINT/SIGTERM into shutdown. Only one handler may exist per process.
    pub handle_signals: bool,
}

/// Answer one request line. The flag asks the caller to shut down after
/// the reply has been written.
fn dispatch(line: &str, state: &Mutex<LoadState>) -> (ServerResponse, bool) {
    let message: ClientMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "malformed request");
            return (ServerResponse::error(format!("Invalid message: {e}")), false);
        }
    };

    // A panicking command must not lock every later client out of the daemon.
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    match message {
        ClientMessage::Shutdown => {
            info!("shutdown requested");
            (
                ServerResponse::Success {
                    result: crate::protocol::CommandOutput::Text("Daemon stopped".to_string()),
                },
                true,
            )
        }
        ClientMessage::Status => {
            let response = match &*state {
                LoadState::Loading => ServerResponse::Loading,
                LoadState::Ready(_) => ServerResponse::Ready,
                LoadState::Failed(msg) => ServerResponse::error(msg.clone()),
            };
            (response, false)
        }
        ClientMessage::Command { command } => {
            let response = match &mut *state {
                LoadState::Loading => ServerResponse::error(Error::DaemonLoading.to_string()),
                LoadState::Failed(msg) => {
                    ServerResponse::error(Error::ProfileLoad(msg.clone()).to_string())
                }
                LoadState::Ready(querier) => {
                    info!(command = command.name(), "dispatching");
                    match querier.execute(command) {
                        Ok(result) => ServerResponse::Success { result },
                        Err(e) => {
                            debug!(error = %e, "command failed");
                            ServerResponse::error(e.to_string())
                        }
                    }
                }
            };
            (response, false)
        }
    }
}

async fn handle_connection(stream: UnixStream, state: SharedState, shutdown: Arc<Notify>) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let (response, stop) = dispatch(&line, &state);
        let mut payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "failed to encode response");
                serde_json::to_string(&ServerResponse::error(format!("Internal error: {e}")))
                    .unwrap_or_default()
            }
        };
        payload.push('\n');
        if let Err(e) = write.write_all(payload.as_bytes()).await {
            debug!(error = %e, "connection write failed");
            break;
        }
        let _ = write.flush().await;

        if stop {
            shutdown.notify_one();
            break;
        }
    }
}

fn spawn_load<L: ProfileLoader>(loader: Arc<L>, source: String, state: SharedState) {
    tokio::spawn(async move {
        info!(profile = %source, "loading");
        let loaded = tokio::task::spawn_blocking(move || loader.load(&source)).await;
        let next = match loaded {
            Ok(Ok(profile)) => {
                info!(threads = profile.threads.len(), "ready");
                LoadState::Ready(Box::new(ProfileQuerier::new(Arc::new(profile))))
            }
            Ok(Err(e)) => {
                error!(error = %e, "load-error");
                LoadState::Failed(match e {
                    Error::ProfileLoad(msg) => msg,
                    other => other.to_string(),
                })
            }
            Err(e) => {
                error!(error = %e, "load-error");
                LoadState::Failed(format!("profile loader panicked: {e}"))
            }
        };
        *state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    });
}

/// Serve until a shutdown request or signal, then remove the session's
/// socket and metadata.
pub async fn serve<L: ProfileLoader>(options: DaemonOptions, loader: L) -> Result<()> {
    let DaemonOptions {
        session_id,
        profile_path,
        store,
        build_version,
        handle_signals,
    } = options;
    info!(session = %session_id, "starting");

    store.ensure_dir()?;
    let socket_path = store.socket_path(&session_id);
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    info!(socket = %socket_path.display(), "listening");

    let metadata = store.new_metadata(&session_id, std::process::id(), &profile_path, &build_version);
    store.save_metadata(&metadata)?;
    store.set_current(&session_id)?;

    let shutdown = Arc::new(Notify::new());
    if handle_signals {
        let notify = Arc::clone(&shutdown);
        ctrlc::set_handler(move || notify.notify_one())
            .map_err(|e| Error::Daemon(format!("failed to install signal handler: {e}")))?;
    }

    let state: SharedState = Arc::new(Mutex::new(LoadState::Loading));
    spawn_load(Arc::new(loader), profile_path, Arc::clone(&state));

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("connection accepted");
                    tokio::spawn(handle_connection(stream, Arc::clone(&state), Arc::clone(&shutdown)));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            _ = shutdown.notified() => break,
        }
    }

    drop(listener);
    store.cleanup(&session_id)?;
    info!(session = %session_id, "stopped");
    Ok(())
}

/// Run `serve` on its own single-threaded runtime. A load still running on
/// the blocking pool is abandoned rather than awaited, so shutdown exits
/// promptly.
pub fn serve_blocking<L: ProfileLoader>(options: DaemonOptions, loader: L) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve(options, loader));
    runtime.shutdown_background();
    result
}

/// Entry point of the hidden `daemon` subcommand.
pub fn run(session_id: &str, profile_path: &str, config: &Config) -> Result<()> {
    let store = SessionStore::new(&config.session_dir);
    store.ensure_dir()?;
    logging::init_daemon(&store.log_path(session_id), config.log_filter.as_deref())?;

    let options = DaemonOptions {
        session_id: session_id.to_string(),
        profile_path: profile_path.to_string(),
        store,
        build_version: BUILD_VERSION.to_string(),
        handle_signals: true,
    };
    let result = serve_blocking(options, FileLoader);
    if let Err(e) = &result {
        error!(error = %e, "daemon exited with error");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::fixtures::sample_profile;
    use crate::protocol::{Command, CommandOutput};

    fn ready_state() -> Mutex<LoadState> {
        Mutex::new(LoadState::Ready(Box::new(ProfileQuerier::new(Arc::new(
            sample_profile(),
        )))))
    }

    fn request(message: &ClientMessage) -> String {
        serde_json::to_string(message).unwrap()
    }

    #[test]
    fn test_status_reflects_load_state() {
        let loading = Mutex::new(LoadState::Loading);
        let status = request(&ClientMessage::Status);
        assert_eq!(dispatch(&status, &loading).0, ServerResponse::Loading);
        assert_eq!(dispatch(&status, &ready_state()).0, ServerResponse::Ready);
        let failed = Mutex::new(LoadState::Failed("bad file".into()));
        assert_eq!(
            dispatch(&status, &failed).0,
            ServerResponse::error("bad file")
        );
    }

    #[test]
    fn test_commands_rejected_until_ready() {
        let command = request(&ClientMessage::Command {
            command: Command::Status,
        });
        let (response, stop) = dispatch(&command, &Mutex::new(LoadState::Loading));
        assert!(matches!(response, ServerResponse::Error { error } if error.contains("loading")));
        assert!(!stop);

        let (response, _) = dispatch(&command, &ready_state());
        assert!(matches!(
            response,
            ServerResponse::Success {
                result: CommandOutput::Structured(_)
            }
        ));
    }

    #[test]
    fn test_query_errors_are_replies() {
        let command = request(&ClientMessage::Command {
            command: Command::FunctionInfo {
                function: "f-42".into(),
            },
        });
        let (response, _) = dispatch(&command, &ready_state());
        assert_eq!(response, ServerResponse::error("Unknown handle: f-42"));

        let (response, _) = dispatch("{not json", &ready_state());
        assert!(matches!(response, ServerResponse::Error { .. }));
    }

    #[test]
    fn test_state_survives_a_panicking_holder() {
        let state = Arc::new(ready_state());
        let holder = Arc::clone(&state);
        let panicked = std::thread::spawn(move || {
            let _guard = holder.lock().unwrap();
            panic!("command blew up");
        })
        .join();
        assert!(panicked.is_err());
        assert!(state.is_poisoned());

        let (response, _) = dispatch(&request(&ClientMessage::Status), &state);
        assert_eq!(response, ServerResponse::Ready);
    }

    #[test]
    fn test_shutdown_requests_stop() {
        let (response, stop) = dispatch(&request(&ClientMessage::Shutdown), &ready_state());
        assert!(matches!(response, ServerResponse::Success { .. }));
        assert!(stop);
    }
}
