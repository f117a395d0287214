use crate::cli::{FunctionCommand, MarkerCommand, ProfileCommand, ThreadCommand, ZoomCommand};
use crate::client::Client;
use crate::client::format::{self, FormatOptions};
use crate::config::Config;
use crate::error::Result;
use crate::protocol::Command;

pub fn profile_request(command: &ProfileCommand) -> Command {
    match command {
        ProfileCommand::Info => Command::ProfileInfo,
        ProfileCommand::Threads => Command::ProfileThreads,
    }
}

/// The daemon request for a thread subcommand, with its display options.
pub fn thread_request(command: &ThreadCommand) -> (Command, FormatOptions) {
    let plain = |command| (command, FormatOptions::default());
    match command {
        ThreadCommand::Info { thread } => plain(Command::ThreadInfo {
            thread: thread.clone(),
        }),
        ThreadCommand::Select { thread } => plain(Command::ThreadSelect {
            thread: thread.clone(),
        }),
        ThreadCommand::Samples { thread } => plain(Command::ThreadSamples {
            thread: thread.clone(),
        }),
        ThreadCommand::SamplesTopDown { thread, tree } => (
            Command::ThreadSamplesTopDown {
                thread: thread.clone(),
                options: tree.options(),
            },
            FormatOptions {
                max_lines: tree.max_lines,
            },
        ),
        ThreadCommand::SamplesBottomUp { thread, tree } => (
            Command::ThreadSamplesBottomUp {
                thread: thread.clone(),
                options: tree.options(),
            },
            FormatOptions {
                max_lines: tree.max_lines,
            },
        ),
        ThreadCommand::Markers { thread, markers } => plain(Command::ThreadMarkers {
            thread: thread.clone(),
            filters: markers.filters(),
            group_by: Some(markers.group_by.clone()).filter(|keys| !keys.is_empty()),
            auto_group: markers.auto_group,
        }),
        ThreadCommand::Functions {
            thread,
            search,
            min_self,
            limit,
        } => plain(Command::ThreadFunctions {
            thread: thread.clone(),
            search: search.clone(),
            min_self: *min_self,
            limit: *limit,
        }),
    }
}

pub fn marker_request(command: &MarkerCommand) -> Command {
    match command {
        MarkerCommand::Info { marker } => Command::MarkerInfo {
            marker: marker.clone(),
        },
        MarkerCommand::Stack { marker } => Command::MarkerStack {
            marker: marker.clone(),
        },
    }
}

pub fn function_request(command: &FunctionCommand) -> Command {
    match command {
        FunctionCommand::Info { function } => Command::FunctionInfo {
            function: function.clone(),
        },
        FunctionCommand::Expand { function } => Command::FunctionExpand {
            function: function.clone(),
        },
    }
}

pub fn zoom_request(command: &ZoomCommand) -> Command {
    match command {
        ZoomCommand::Push { range } => Command::ZoomPush {
            range: range.clone(),
        },
        ZoomCommand::Pop => Command::ZoomPop,
        ZoomCommand::Clear => Command::ZoomClear,
    }
}

/// Send one query to the session's daemon and print the reply.
pub fn run(
    session: Option<&str>,
    command: Command,
    options: &FormatOptions,
    config: &Config,
    json: bool,
) -> Result<()> {
    let client = Client::new(config.clone());
    let output = client.command(session, command)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        let text = format::render(&output, options);
        println!("{}", text.trim_end());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{self, Cli};
    use crate::query::markers::GroupKey;
    use clap::Parser;

    fn parse(args: &[&str]) -> cli::Command {
        Cli::try_parse_from(std::iter::once("profq").chain(args.iter().copied()))
            .unwrap()
            .command
    }

    fn thread(args: &[&str]) -> (Command, FormatOptions) {
        match parse(args) {
            cli::Command::Thread { command } => thread_request(&command),
            other => panic!("not a thread command: {other:?}"),
        }
    }

    #[test]
    fn test_query_subcommands_map_to_requests() {
        let cli::Command::Zoom { command } = parse(&["zoom", "push", "10%,50%"]) else {
            panic!("not a zoom command");
        };
        assert_eq!(
            zoom_request(&command),
            Command::ZoomPush {
                range: "10%,50%".into()
            }
        );

        let cli::Command::Function { command } = parse(&["function", "expand", "f-3"]) else {
            panic!("not a function command");
        };
        assert_eq!(
            function_request(&command),
            Command::FunctionExpand {
                function: "f-3".into()
            }
        );

        let (command, options) = thread(&["thread", "samples-top-down", "--max-lines", "15"]);
        assert!(matches!(command, Command::ThreadSamplesTopDown { thread: None, .. }));
        assert_eq!(options.max_lines, Some(15));

        let (_, options) = thread(&["thread", "samples", "t-1"]);
        assert_eq!(options.max_lines, None);
    }

    #[test]
    fn test_marker_grouping_is_forwarded() {
        let (command, _) = thread(&["thread", "markers", "t-0", "--group-by", "name"]);
        let Command::ThreadMarkers {
            thread: thread_id,
            group_by,
            ..
        } = command
        else {
            panic!("wrong command");
        };
        assert_eq!(thread_id.as_deref(), Some("t-0"));
        assert_eq!(group_by, Some(vec![GroupKey::Name]));

        let (command, _) = thread(&["thread", "markers", "--auto-group"]);
        assert!(matches!(
            command,
            Command::ThreadMarkers {
                group_by: None,
                auto_group: true,
                ..
            }
        ));
    }
}
