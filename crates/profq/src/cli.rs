use crate::query::collector::{CollectOptions, ScoringStrategy};
use crate::query::handles::{HandleKind, parse_handle, parse_thread_set};
use crate::query::markers::{GroupKey, MAX_GROUP_DEPTH, MarkerFilters};
use crate::query::range::RangeSpec;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "profq")]
#[command(about = "Query recorded performance profiles through a background daemon")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Session to talk to (defaults to the most recently loaded one)
    #[arg(long, global = true)]
    pub session: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a daemon for a profile and make it the current session
    Load {
        /// Profile file (.json or SQLite profile database)
        profile: String,
    },

    /// Profile-wide information
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },

    /// Thread queries
    Thread {
        #[command(subcommand)]
        command: ThreadCommand,
    },

    /// Marker queries
    Marker {
        #[command(subcommand)]
        command: MarkerCommand,
    },

    /// Function queries
    Function {
        #[command(subcommand)]
        command: FunctionCommand,
    },

    /// Narrow or widen the view range
    Zoom {
        #[command(subcommand)]
        command: ZoomCommand,
    },

    /// Show the selected threads and zoom stack
    Status,

    /// Stop the session's daemon
    Stop {
        /// Stop every session
        #[arg(long)]
        all: bool,
    },

    /// List sessions, removing stale ones
    ListSessions,

    /// Convert a JSON profile to a SQLite profile database
    Import {
        /// JSON profile to read
        input: PathBuf,

        /// Database file to write
        output: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },

    /// Run the daemon for one session (started by `load`)
    #[command(hide = true)]
    Daemon {
        #[arg(long)]
        session_id: String,

        profile: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Summary with the busiest threads
    Info,
    /// Summary with every thread
    Threads,
}

#[derive(Subcommand, Debug)]
pub enum ThreadCommand {
    /// Identity, lifetime and busy periods of a thread
    Info {
        #[arg(value_parser = thread_handle)]
        thread: Option<String>,
    },

    /// Change the default thread selection (e.g. t-0 or t-0,t-3)
    Select {
        #[arg(value_parser = thread_handle)]
        thread: String,
    },

    /// Top functions and the heaviest stack
    Samples {
        #[arg(value_parser = thread_handle)]
        thread: Option<String>,
    },

    /// Call tree from the roots down
    SamplesTopDown {
        #[arg(value_parser = thread_handle)]
        thread: Option<String>,

        #[command(flatten)]
        tree: TreeArgs,
    },

    /// Inverted call tree, from the hottest leaves up
    SamplesBottomUp {
        #[arg(value_parser = thread_handle)]
        thread: Option<String>,

        #[command(flatten)]
        tree: TreeArgs,
    },

    /// Aggregated markers
    Markers {
        #[arg(value_parser = thread_handle)]
        thread: Option<String>,

        #[command(flatten)]
        markers: MarkerArgs,
    },

    /// Every sampled function with self and running time
    Functions {
        #[arg(value_parser = thread_handle)]
        thread: Option<String>,

        /// Only functions whose name contains this text
        #[arg(long)]
        search: Option<String>,

        /// Minimum self percentage
        #[arg(long)]
        min_self: Option<f64>,

        /// Number of functions to show
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct TreeArgs {
    /// Nodes to include in the tree
    #[arg(long, default_value = "100")]
    pub max_nodes: usize,

    /// Deepest level to expand
    #[arg(long, default_value = "200")]
    pub max_depth: usize,

    /// Children considered per node
    #[arg(long, default_value = "100")]
    pub max_children: usize,

    /// How node priority decays with depth
    #[arg(long, default_value = "exponential-0.9")]
    pub scoring: ScoringStrategy,

    /// Truncate the printed tree to this many lines
    #[arg(long)]
    pub max_lines: Option<usize>,
}

impl TreeArgs {
    pub fn options(&self) -> CollectOptions {
        CollectOptions {
            max_nodes: self.max_nodes,
            scoring: self.scoring,
            max_depth: self.max_depth,
            max_children_per_node: self.max_children,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct MarkerArgs {
    /// Only markers whose name or type contains this text
    #[arg(long)]
    pub search: Option<String>,

    /// Only markers whose category contains this text
    #[arg(long)]
    pub category: Option<String>,

    /// Minimum duration (e.g. 5ms, 1s; bare numbers are milliseconds)
    #[arg(long, value_parser = parse_duration_ms)]
    pub min_duration: Option<f64>,

    /// Maximum duration
    #[arg(long, value_parser = parse_duration_ms)]
    pub max_duration: Option<f64>,

    /// Only markers with a cause stack
    #[arg(long)]
    pub has_stack: bool,

    /// Keep at most this many markers after filtering
    #[arg(long)]
    pub limit: Option<usize>,

    /// Group by keys (type, name, category, field:<name>), e.g. type,field:eventType
    #[arg(long, value_delimiter = ',', conflicts_with = "auto_group")]
    pub group_by: Vec<GroupKey>,

    /// Sub-group each marker type by its most telling field
    #[arg(long)]
    pub auto_group: bool,
}

impl MarkerArgs {
    pub fn filters(&self) -> MarkerFilters {
        MarkerFilters {
            search: self.search.clone(),
            category: self.category.clone(),
            min_duration: self.min_duration,
            max_duration: self.max_duration,
            has_stack: self.has_stack,
            limit: self.limit,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum MarkerCommand {
    /// Details and payload of a marker
    Info {
        #[arg(value_parser = marker_handle)]
        marker: String,
    },
    /// Cause stack of a marker
    Stack {
        #[arg(value_parser = marker_handle)]
        marker: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum FunctionCommand {
    /// Library, source and sample counts of a function
    Info {
        #[arg(value_parser = function_handle)]
        function: String,
    },
    /// Full name plus callers and callees
    Expand {
        #[arg(value_parser = function_handle)]
        function: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ZoomCommand {
    /// Zoom into a range: m-<n> or <start>,<end> (ts-names, 1.5, 200ms, 2s, 40%)
    Push {
        #[arg(value_parser = zoom_range)]
        range: String,
    },
    /// Return to the previous range
    Pop,
    /// Return to the full profile
    Clear,
}

fn thread_handle(s: &str) -> Result<String, String> {
    parse_thread_set(s).map_err(|e| e.to_string())?;
    Ok(s.trim().to_string())
}

fn marker_handle(s: &str) -> Result<String, String> {
    parse_handle(HandleKind::Marker, s).map_err(|e| e.to_string())?;
    Ok(s.trim().to_string())
}

fn function_handle(s: &str) -> Result<String, String> {
    parse_handle(HandleKind::Function, s).map_err(|e| e.to_string())?;
    Ok(s.trim().to_string())
}

fn zoom_range(s: &str) -> Result<String, String> {
    RangeSpec::parse(s).map_err(|e| e.to_string())?;
    Ok(s.trim().to_string())
}

fn parse_duration_ms(s: &str) -> Result<f64, String> {
    // Bare numbers are milliseconds
    if let Ok(ms) = s.parse::<f64>()
        && ms.is_finite()
        && ms >= 0.0
    {
        return Ok(ms);
    }

    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d.as_nanos() as f64 / 1_000_000.0);
    }

    Err(format!(
        "Invalid duration '{}'. Examples: 5ms, 1s, 250us, 12.5",
        s
    ))
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::Thread {
                command:
                    ThreadCommand::SamplesTopDown { tree, .. }
                    | ThreadCommand::SamplesBottomUp { tree, .. },
            } => {
                if tree.max_nodes == 0 {
                    return Err("--max-nodes must be at least 1".to_string());
                }
                if tree.max_lines == Some(0) {
                    return Err("--max-lines must be at least 1".to_string());
                }
            }
            Command::Thread {
                command: ThreadCommand::Markers { markers, .. },
            } => {
                if markers.group_by.len() > MAX_GROUP_DEPTH {
                    return Err(format!(
                        "--group-by takes at most {MAX_GROUP_DEPTH} keys, got {}",
                        markers.group_by.len()
                    ));
                }
                if let (Some(min), Some(max)) = (markers.min_duration, markers.max_duration)
                    && min > max
                {
                    return Err(format!(
                        "--min-duration ({}) is larger than --max-duration ({})",
                        humantime::format_duration(Duration::from_secs_f64(min / 1000.0)),
                        humantime::format_duration(Duration::from_secs_f64(max / 1000.0))
                    ));
                }
            }
            Command::Thread {
                command: ThreadCommand::Functions {
                    min_self: Some(pct), ..
                },
            } if !(0.0..=100.0).contains(pct) => {
                return Err(format!("--min-self must be a percentage, got {pct}"));
            }
            _ => {}
        }
        Ok(())
    }
}
