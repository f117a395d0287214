//! Loading and saving profiles.
//!
//! Two on-disk formats are understood: the JSON profile format (`.json`) and
//! a SQLite profile database (anything else).

mod reader;
pub mod schema;
mod writer;

pub use reader::read_profile;
pub use writer::save_profile;

use crate::error::{Error, Result};
use crate::profile::Profile;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

pub fn read_json_profile(path: &Path) -> Result<Profile> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader)
        .map_err(|e| Error::ProfileLoad(format!("{}: {e}", path.display())))
}

/// Load and validate a profile from a local path.
pub fn load_profile(source: &str) -> Result<Profile> {
    if is_url(source) {
        return Err(Error::ProfileLoad(format!(
            "cannot load {source}: only local profile files are supported"
        )));
    }
    let path = Path::new(source);
    if !path.is_file() {
        return Err(Error::ProfileLoad(format!("{source}: no such file")));
    }

    let is_json = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let profile = if is_json {
        read_json_profile(path)?
    } else {
        read_profile(path)?
    };
    profile.validate().map_err(Error::ProfileLoad)?;
    Ok(profile)
}
