use crate::client::{Client, format};
use crate::config::Config;
use crate::error::Result;
use serde_json::json;

/// List sessions; stale ones are cleaned up along the way.
pub fn run(config: &Config, json: bool) -> Result<()> {
    let client = Client::new(config.clone());
    let entries = client.list_sessions()?;

    if json {
        let sessions: Vec<_> = entries
            .iter()
            .map(|entry| {
                json!({
                    "id": entry.id,
                    "current": entry.current,
                    "state": entry.state.to_string(),
                    "metadata": entry.metadata,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    println!("{}", format::render_sessions(&entries));
    Ok(())
}
