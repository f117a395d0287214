use anyhow::Context;
use clap::Parser;
use profq::cli::{Cli, Command};
use profq::client::format::FormatOptions;
use profq::commands::query;
use profq::config::Config;
use profq::error::exit_code;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;
    match run(cli) {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(e) => {
            if json {
                println!("{}", serde_json::json!({ "error": format!("{e:#}") }));
            } else {
                eprintln!("Error: {e:#}");
            }
            if let Some(profq_err) = e.downcast_ref::<profq::Error>() {
                ExitCode::from(profq_err.exit_code() as u8)
            } else {
                ExitCode::from(exit_code::GENERAL_ERROR as u8)
            }
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    // Validate CLI arguments
    cli.validate()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Invalid arguments")?;

    let config = Config::from_env();
    if !matches!(cli.command, Command::Daemon { .. }) {
        profq::logging::init_client(config.log_filter.as_deref());
    }

    let session = cli.session.as_deref();
    let json = cli.json;
    let send = |command, options: FormatOptions| {
        query::run(session, command, &options, &config, json)
    };

    match cli.command {
        Command::Profile { command } => {
            send(query::profile_request(&command), FormatOptions::default())?;
        }
        Command::Thread { command } => {
            let (command, options) = query::thread_request(&command);
            send(command, options)?;
        }
        Command::Marker { command } => {
            send(query::marker_request(&command), FormatOptions::default())?;
        }
        Command::Function { command } => {
            send(query::function_request(&command), FormatOptions::default())?;
        }
        Command::Zoom { command } => {
            send(query::zoom_request(&command), FormatOptions::default())?;
        }
        Command::Status => {
            send(profq::protocol::Command::Status, FormatOptions::default())?;
        }
        Command::Load { profile } => {
            profq::commands::load::run(&profile, &config, json)?;
        }
        Command::Stop { all } => {
            profq::commands::stop::run(session, all, &config, json)?;
        }
        Command::ListSessions => {
            profq::commands::list::run(&config, json)?;
        }
        Command::Import { input, output } => {
            profq::commands::import::run(&input, &output)?;
        }
        Command::Completions { shell } => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "profq", &mut std::io::stdout());
        }
        Command::Daemon {
            session_id,
            profile,
        } => {
            profq::daemon::run(&session_id, &profile, &config)?;
        }
    }

    Ok(())
}
