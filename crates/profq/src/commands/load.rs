use crate::client::Client;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::DetachedSpawner;
use crate::storage;
use serde_json::json;
use std::path::Path;

/// Start a daemon for `profile` and wait until it is ready.
pub fn run(profile: &str, config: &Config, json: bool) -> Result<()> {
    if storage::is_url(profile) {
        return Err(Error::InvalidArgument(format!(
            "{profile}: only local profile files can be loaded"
        )));
    }
    let path = Path::new(profile);
    if !path.is_file() {
        return Err(Error::InvalidArgument(format!("{profile}: no such file")));
    }
    // The daemon runs detached, so hand it an absolute path.
    let path = path.canonicalize()?;
    let path = path.to_string_lossy();

    let client = Client::new(config.clone());
    let id = client.start_daemon(&path, &DetachedSpawner::current_exe()?)?;

    if json {
        println!("{}", json!({ "session": id, "profile": path }));
    } else {
        println!("Session {id} ready ({path})");
    }
    Ok(())
}
