use crate::error::{Error, Result};
use crate::storage;
use std::path::Path;

/// Convert a JSON profile into a profile database.
pub fn run(input: &Path, output: &Path) -> Result<()> {
    if output.exists() {
        return Err(Error::InvalidArgument(format!(
            "{} already exists",
            output.display()
        )));
    }
    let profile = storage::read_json_profile(input)?;
    profile.validate().map_err(Error::ProfileLoad)?;
    storage::save_profile(output, &profile)?;

    let samples: usize = profile.threads.iter().map(|t| t.samples.len()).sum();
    let markers: usize = profile.threads.iter().map(|t| t.markers.len()).sum();
    eprintln!(
        "Wrote {} ({} threads, {} samples, {} markers)",
        output.display(),
        profile.threads.len(),
        samples,
        markers
    );
    Ok(())
}
