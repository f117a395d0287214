mod common;

use profq::client::send_message;
use profq::daemon::{DaemonOptions, ProfileLoader, serve, serve_blocking};
use profq::error::{Error, Result};
use profq::profile::Profile;
use profq::protocol::{ClientMessage, Command, CommandOutput, ServerResponse};
use profq::session::SessionStore;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Blocks until the test opens the gate, then yields the fixture (or fails).
struct GatedLoader {
    gate: Mutex<Receiver<bool>>,
}

impl ProfileLoader for GatedLoader {
    fn load(&self, _source: &str) -> Result<Profile> {
        let succeed = self.gate.lock().unwrap().recv().unwrap_or(false);
        if succeed {
            Ok(common::small_profile())
        } else {
            Err(Error::ProfileLoad("truncated file".into()))
        }
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    store: SessionStore,
    gate: Sender<bool>,
    runtime: tokio::runtime::Runtime,
    server: tokio::task::JoinHandle<Result<()>>,
}

impl Harness {
    fn start() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        let (gate, rx) = channel();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let options = DaemonOptions {
            session_id: "test".into(),
            profile_path: "/profiles/test.json".into(),
            store: store.clone(),
            build_version: profq::config::BUILD_VERSION.into(),
            handle_signals: false,
        };
        let server = runtime.spawn(serve(
            options,
            GatedLoader {
                gate: Mutex::new(rx),
            },
        ));

        let harness = Harness {
            _dir: dir,
            store,
            gate,
            runtime,
            server,
        };
        harness.wait_for(|h| h.store.validate("test").is_some());
        harness
    }

    fn wait_for(&self, mut done: impl FnMut(&Harness) -> bool) {
        for _ in 0..250 {
            if done(self) {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("condition not reached in time");
    }

    fn send(&self, message: &ClientMessage) -> ServerResponse {
        send_message(&self.store.socket_path("test"), message, TIMEOUT).unwrap()
    }

    fn stop(self) {
        let reply = self.send(&ClientMessage::Shutdown);
        assert!(matches!(reply, ServerResponse::Success { .. }));

        let Harness {
            _dir,
            store,
            runtime,
            server,
            ..
        } = self;
        let result = runtime.block_on(async move { tokio::time::timeout(TIMEOUT, server).await });
        assert!(matches!(result, Ok(Ok(Ok(())))));
        assert!(!store.metadata_path("test").exists());
        assert!(!store.socket_path("test").exists());
        assert_eq!(store.get_current().unwrap(), None);
    }
}

#[test]
fn test_status_moves_from_loading_to_ready() {
    let harness = Harness::start();

    let metadata = harness.store.load_metadata("test").unwrap().unwrap();
    assert_eq!(metadata.pid, std::process::id());
    assert_eq!(harness.store.get_current().unwrap().as_deref(), Some("test"));

    assert_eq!(harness.send(&ClientMessage::Status), ServerResponse::Loading);
    let early = harness.send(&ClientMessage::Command {
        command: Command::Status,
    });
    assert!(matches!(early, ServerResponse::Error { .. }));

    harness.gate.send(true).unwrap();
    harness.wait_for(|h| h.send(&ClientMessage::Status) == ServerResponse::Ready);
    for _ in 0..5 {
        assert_eq!(harness.send(&ClientMessage::Status), ServerResponse::Ready);
    }

    let selected = harness.send(&ClientMessage::Command {
        command: Command::ThreadSelect {
            thread: "t-0".into(),
        },
    });
    let ServerResponse::Success {
        result: CommandOutput::Text(text),
    } = selected
    else {
        panic!("unexpected reply {selected:?}");
    };
    assert!(text.contains("t-0"));

    harness.stop();
}

#[test]
fn test_load_failure_is_reported() {
    let harness = Harness::start();
    harness.gate.send(false).unwrap();
    harness.wait_for(|h| h.send(&ClientMessage::Status) != ServerResponse::Loading);

    assert_eq!(
        harness.send(&ClientMessage::Status),
        ServerResponse::error("truncated file")
    );
    let reply = harness.send(&ClientMessage::Command {
        command: Command::ProfileInfo,
    });
    assert_eq!(
        reply,
        ServerResponse::error("Profile failed to load: truncated file")
    );

    harness.stop();
}

#[test]
fn test_lines_in_one_write_are_answered_in_order() {
    let harness = Harness::start();
    harness.gate.send(true).unwrap();
    harness.wait_for(|h| h.send(&ClientMessage::Status) == ServerResponse::Ready);

    let mut stream = UnixStream::connect(harness.store.socket_path("test")).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    let batch = [
        ClientMessage::Command {
            command: Command::FunctionInfo {
                function: "f-7".into(),
            },
        },
        ClientMessage::Status,
    ];
    let mut payload = String::new();
    for message in &batch {
        payload.push_str(&serde_json::to_string(message).unwrap());
        payload.push('\n');
    }
    // Split mid-line to exercise buffering.
    let (first, rest) = payload.split_at(10);
    stream.write_all(first.as_bytes()).unwrap();
    stream.flush().unwrap();
    std::thread::sleep(Duration::from_millis(20));
    stream.write_all(rest.as_bytes()).unwrap();

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    let first: ServerResponse = serde_json::from_str(&line).unwrap();
    assert_eq!(first, ServerResponse::error("Unknown handle: f-7"));

    line.clear();
    reader.read_line(&mut line).unwrap();
    let second: ServerResponse = serde_json::from_str(&line).unwrap();
    assert_eq!(second, ServerResponse::Ready);

    drop(reader);
    harness.stop();
}

#[test]
fn test_shutdown_while_loading_returns_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("sessions"));
    let (gate, rx) = channel();
    let options = DaemonOptions {
        session_id: "slow".into(),
        profile_path: "/profiles/slow.json".into(),
        store: store.clone(),
        build_version: profq::config::BUILD_VERSION.into(),
        handle_signals: false,
    };
    let (done_tx, done_rx) = channel();
    std::thread::spawn(move || {
        let result = serve_blocking(
            options,
            GatedLoader {
                gate: Mutex::new(rx),
            },
        );
        let _ = done_tx.send(result);
    });

    for _ in 0..250 {
        if store.validate("slow").is_some() {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    let socket = store.socket_path("slow");
    assert_eq!(
        send_message(&socket, &ClientMessage::Status, TIMEOUT).unwrap(),
        ServerResponse::Loading
    );
    let reply = send_message(&socket, &ClientMessage::Shutdown, TIMEOUT).unwrap();
    assert!(matches!(reply, ServerResponse::Success { .. }));

    // The loader is still blocked on its gate here.
    let result = done_rx.recv_timeout(TIMEOUT).expect("daemon did not return");
    assert!(result.is_ok());
    assert!(!socket.exists());
    assert!(!store.metadata_path("slow").exists());

    let _ = gate.send(false);
}
