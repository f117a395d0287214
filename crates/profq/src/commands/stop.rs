use crate::client::Client;
use crate::config::Config;
use crate::error::Result;
use serde_json::json;

pub fn run(session: Option<&str>, all: bool, config: &Config, json: bool) -> Result<()> {
    let client = Client::new(config.clone());
    let stopped = if all {
        client.stop_all()?
    } else {
        vec![client.stop(session)?]
    };

    if json {
        println!("{}", json!({ "stopped": stopped }));
    } else if stopped.is_empty() {
        println!("No running sessions");
    } else {
        for id in stopped {
            println!("Stopped session {id}");
        }
    }
    Ok(())
}
