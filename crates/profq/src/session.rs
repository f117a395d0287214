//! On-disk session registry.
//!
//! Every session owns `<id>.sock`, `<id>.log` and `<id>.json` in one
//! directory, and `current.txt` names the most recently created session.
//! Validation only reads; removing stale artifacts is up to the caller.

use crate::error::Result;
use crate::process;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const CURRENT_FILE: &str = "current.txt";
const ID_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub id: String,
    pub socket_path: PathBuf,
    pub log_path: PathBuf,
    pub pid: u32,
    pub profile_path: String,
    pub created_at: DateTime<Utc>,
    pub build_version: String,
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SessionStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()[..ID_LEN].to_string()
    }

    pub fn socket_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.sock"))
    }

    pub fn log_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.log"))
    }

    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Metadata for a session owned by `pid`, with this build's fingerprint.
    pub fn new_metadata(&self, id: &str, pid: u32, profile_path: &str, build_version: &str) -> SessionMetadata {
        SessionMetadata {
            id: id.to_string(),
            socket_path: self.socket_path(id),
            log_path: self.log_path(id),
            pid,
            profile_path: profile_path.to_string(),
            created_at: Utc::now(),
            build_version: build_version.to_string(),
        }
    }

    pub fn save_metadata(&self, metadata: &SessionMetadata) -> Result<()> {
        let path = self.metadata_path(&metadata.id);
        // Write then rename so readers never see a partial file.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(metadata)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn load_metadata(&self, id: &str) -> Result<Option<SessionMetadata>> {
        match std::fs::read(self.metadata_path(id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_current(&self, id: &str) -> Result<()> {
        std::fs::write(self.dir.join(CURRENT_FILE), id)?;
        Ok(())
    }

    pub fn get_current(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(self.dir.join(CURRENT_FILE)) {
            Ok(id) => Ok(Some(id.trim().to_string()).filter(|id| !id.is_empty())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Metadata of a live session: readable metadata, a running owner
    /// process and an existing socket. Performs no mutation.
    pub fn validate(&self, id: &str) -> Option<SessionMetadata> {
        let metadata = self.load_metadata(id).ok().flatten()?;
        if !process::is_alive(metadata.pid) {
            return None;
        }
        if !metadata.socket_path.exists() {
            return None;
        }
        Some(metadata)
    }

    /// Remove the socket and metadata (and the current pointer if it names
    /// this session). Logs are kept.
    pub fn cleanup(&self, id: &str) -> Result<()> {
        remove_if_exists(&self.socket_path(id))?;
        remove_if_exists(&self.metadata_path(id))?;
        if self.get_current()?.as_deref() == Some(id) {
            remove_if_exists(&self.dir.join(CURRENT_FILE))?;
        }
        Ok(())
    }

    /// Ids with a metadata file, sorted.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json") {
                    path.file_stem().and_then(|s| s.to_str()).map(String::from)
                } else {
                    None
                }
            })
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions"));
        store.ensure_dir().unwrap();
        (dir, store)
    }

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_generated_ids_are_short_and_distinct() {
        let a = SessionStore::generate_id();
        let b = SessionStore::generate_id();
        assert_eq!(a.len(), ID_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_metadata_round_trip_and_current() {
        let (_tmp, store) = store();
        let meta = store.new_metadata("abc", std::process::id(), "/tmp/p.json", "v1");
        store.save_metadata(&meta).unwrap();
        assert_eq!(store.load_metadata("abc").unwrap(), Some(meta));
        assert_eq!(store.load_metadata("nope").unwrap(), None);

        assert_eq!(store.get_current().unwrap(), None);
        store.set_current("abc").unwrap();
        assert_eq!(store.get_current().unwrap().as_deref(), Some("abc"));
        assert_eq!(store.list_ids().unwrap(), vec!["abc".to_string()]);
    }

    #[test]
    fn test_validate_live_session() {
        let (_tmp, store) = store();
        let meta = store.new_metadata("live", std::process::id(), "p", "v1");
        store.save_metadata(&meta).unwrap();
        // No socket yet.
        assert!(store.validate("live").is_none());
        std::fs::write(store.socket_path("live"), b"").unwrap();
        assert_eq!(store.validate("live"), Some(meta));
    }

    #[test]
    fn test_dead_pid_session_is_invalid_and_cleaned() {
        let (_tmp, store) = store();
        let meta = store.new_metadata("dead", dead_pid(), "p", "v1");
        store.save_metadata(&meta).unwrap();
        std::fs::write(store.socket_path("dead"), b"").unwrap();
        std::fs::write(store.log_path("dead"), b"log").unwrap();
        store.set_current("dead").unwrap();

        assert!(store.validate("dead").is_none());
        // Validation leaves everything in place.
        assert!(store.metadata_path("dead").exists());

        store.cleanup("dead").unwrap();
        assert!(!store.metadata_path("dead").exists());
        assert!(!store.socket_path("dead").exists());
        assert!(store.log_path("dead").exists());
        assert_eq!(store.get_current().unwrap(), None);
        assert!(store.list_ids().unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_keeps_other_current() {
        let (_tmp, store) = store();
        store.set_current("other").unwrap();
        store.cleanup("missing").unwrap();
        assert_eq!(store.get_current().unwrap().as_deref(), Some("other"));
    }
}
