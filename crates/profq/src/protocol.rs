//! Messages exchanged between the client and the daemon, one JSON object per line.

use crate::error::{Error, Result};
use crate::query::collector::{CollectOptions, CollectedNode};
use crate::query::markers::{CategoryCount, GroupKey, MarkerFilters, MarkerGroup};
use crate::query::timestamps::TimestampLabel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Command { command: Command },
    Shutdown,
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerResponse {
    Success { result: CommandOutput },
    Error { error: String },
    Loading,
    Ready,
}

impl ServerResponse {
    pub fn error(message: impl Into<String>) -> Self {
        ServerResponse::Error {
            error: message.into(),
        }
    }

    /// The payload of a `success`, or the matching error.
    pub fn into_output(self) -> Result<CommandOutput> {
        match self {
            ServerResponse::Success { result } => Ok(result),
            ServerResponse::Error { error } => Err(Error::Daemon(error)),
            ServerResponse::Loading => Err(Error::DaemonLoading),
            ServerResponse::Ready => Err(Error::Transport(
                "unexpected 'ready' reply to a command".to_string(),
            )),
        }
    }
}

/// Queries understood by the daemon. Thread arguments default to the
/// current selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Command {
    ProfileInfo,
    ProfileThreads,
    ThreadInfo {
        #[serde(default)]
        thread: Option<String>,
    },
    ThreadSelect {
        thread: String,
    },
    ThreadSamples {
        #[serde(default)]
        thread: Option<String>,
    },
    ThreadSamplesTopDown {
        #[serde(default)]
        thread: Option<String>,
        #[serde(default)]
        options: CollectOptions,
    },
    ThreadSamplesBottomUp {
        #[serde(default)]
        thread: Option<String>,
        #[serde(default)]
        options: CollectOptions,
    },
    ThreadMarkers {
        #[serde(default)]
        thread: Option<String>,
        #[serde(default)]
        filters: MarkerFilters,
        #[serde(default)]
        group_by: Option<Vec<GroupKey>>,
        #[serde(default)]
        auto_group: bool,
    },
    ThreadFunctions {
        #[serde(default)]
        thread: Option<String>,
        #[serde(default)]
        search: Option<String>,
        /// Minimum self percentage.
        #[serde(default)]
        min_self: Option<f64>,
        #[serde(default)]
        limit: Option<usize>,
    },
    MarkerInfo {
        marker: String,
    },
    MarkerStack {
        marker: String,
    },
    FunctionInfo {
        function: String,
    },
    FunctionExpand {
        function: String,
    },
    ZoomPush {
        range: String,
    },
    ZoomPop,
    ZoomClear,
    Status,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::ProfileInfo => "profile-info",
            Command::ProfileThreads => "profile-threads",
            Command::ThreadInfo { .. } => "thread-info",
            Command::ThreadSelect { .. } => "thread-select",
            Command::ThreadSamples { .. } => "thread-samples",
            Command::ThreadSamplesTopDown { .. } => "thread-samples-top-down",
            Command::ThreadSamplesBottomUp { .. } => "thread-samples-bottom-up",
            Command::ThreadMarkers { .. } => "thread-markers",
            Command::ThreadFunctions { .. } => "thread-functions",
            Command::MarkerInfo { .. } => "marker-info",
            Command::MarkerStack { .. } => "marker-stack",
            Command::FunctionInfo { .. } => "function-info",
            Command::FunctionExpand { .. } => "function-expand",
            Command::ZoomPush { .. } => "zoom-push",
            Command::ZoomPop => "zoom-pop",
            Command::ZoomClear => "zoom-clear",
            Command::Status => "status",
        }
    }
}

/// `result` of a success: plain text or a structured result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandOutput {
    Text(String),
    Structured(Box<ContextualResult>),
}

impl CommandOutput {
    pub fn structured(result: CommandResult, context: Option<SessionContext>) -> Self {
        CommandOutput::Structured(Box::new(ContextualResult { result, context }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualResult {
    #[serde(flatten)]
    pub result: CommandResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<SessionContext>,
}

/// Current selection and zoom, attached to most results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub selected_threads: String,
    pub thread_names: Vec<String>,
    pub view_range: RangeLabel,
    pub zoom_depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CommandResult {
    ProfileInfo(ProfileInfo),
    ThreadInfo(ThreadInfo),
    ThreadSamples(ThreadSamples),
    ThreadSamplesTopDown(ThreadCallTree),
    ThreadSamplesBottomUp(ThreadCallTree),
    ThreadMarkers(ThreadMarkers),
    ThreadFunctions(ThreadFunctions),
    MarkerInfo(MarkerInfo),
    MarkerStack(MarkerStack),
    FunctionInfo(FunctionInfo),
    FunctionExpand(FunctionExpand),
    ViewRange(ViewRange),
    Status(StatusInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeLabel {
    pub start: TimestampLabel,
    pub end: TimestampLabel,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub handle: String,
    pub name: String,
    pub tid: String,
    pub is_main_thread: bool,
    pub sample_count: usize,
    pub cpu_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub pid: String,
    pub name: String,
    pub cpu_ms: f64,
    pub threads: Vec<ThreadSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInfo {
    pub product: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
    pub interval_ms: f64,
    pub root_range: RangeLabel,
    pub thread_count: usize,
    pub processes: Vec<ProcessSummary>,
    pub show_all: bool,
    /// Threads left out of `processes` when not showing all.
    pub hidden_threads: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceInfo {
    pub start: TimestampLabel,
    pub end: TimestampLabel,
    pub avg_cpu_percentage: f64,
    pub cpu_ms: f64,
    #[serde(default)]
    pub children: Vec<SliceInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    pub handle: String,
    pub name: String,
    pub process_name: String,
    pub pid: String,
    pub tid: String,
    pub is_main_thread: bool,
    pub registered: TimestampLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unregistered: Option<TimestampLabel>,
    pub sample_count: usize,
    pub marker_count: usize,
    pub cpu_ms: f64,
    pub slices: Vec<SliceInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSummary {
    pub handle: String,
    pub name: String,
    pub name_with_library: String,
    pub self_samples: f64,
    pub self_percentage: f64,
    pub total_samples: f64,
    pub total_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub handle: String,
    pub name: String,
    pub name_with_library: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_samples: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSamples {
    pub thread: String,
    pub thread_names: Vec<String>,
    pub total_samples: f64,
    pub top_self: Vec<FunctionSummary>,
    pub top_total: Vec<FunctionSummary>,
    /// Root first.
    pub heaviest_stack: Vec<StackFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadCallTree {
    pub thread: String,
    pub thread_names: Vec<String>,
    pub inverted: bool,
    pub options: CollectOptions,
    pub total_samples: f64,
    pub root: CollectedNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMarkers {
    pub thread: String,
    pub thread_names: Vec<String>,
    /// Markers in view before filtering.
    pub total_markers: usize,
    pub filtered_markers: usize,
    pub filters: MarkerFilters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<GroupKey>>,
    pub groups: Vec<MarkerGroup>,
    pub by_category: Vec<CategoryCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadFunctions {
    pub thread: String,
    pub thread_names: Vec<String>,
    pub total_samples: f64,
    /// Functions seen before `search`/`minSelf`/`limit` were applied.
    pub total_functions: usize,
    pub functions: Vec<FunctionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerField {
    pub key: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerInfo {
    pub handle: String,
    pub name: String,
    pub marker_type: String,
    pub category: String,
    pub thread: String,
    pub start: TimestampLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<TimestampLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    pub has_stack: bool,
    pub fields: Vec<MarkerField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerStack {
    pub handle: String,
    pub name: String,
    /// Leaf first.
    pub frames: Vec<StackFrame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInfo {
    pub handle: String,
    pub name: String,
    pub name_with_library: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub thread: String,
    pub self_samples: f64,
    pub self_percentage: f64,
    pub total_samples: f64,
    pub total_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSite {
    pub handle: String,
    pub name: String,
    pub samples: f64,
    /// Share of the expanded function's total.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionExpand {
    pub handle: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
    pub total_samples: f64,
    pub callers: Vec<CallSite>,
    pub callees: Vec<CallSite>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoomAction {
    Push,
    Pop,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRange {
    pub action: ZoomAction,
    pub range: RangeLabel,
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popped: Option<RangeLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub selected_threads: String,
    pub thread_names: Vec<String>,
    pub root_range: RangeLabel,
    pub zoom_stack: Vec<RangeLabel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_message_wire_format() {
        let msg = ClientMessage::Command {
            command: Command::ZoomPush {
                range: "10%,50%".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "command", "command": {"kind": "zoom-push", "range": "10%,50%"}})
        );
        let status: ClientMessage = serde_json::from_str(r#"{"type":"status"}"#).unwrap();
        assert_eq!(status, ClientMessage::Status);
    }

    #[test]
    fn test_command_defaults_fill_missing_fields() {
        let cmd: Command = serde_json::from_value(json!({
            "kind": "thread-markers",
            "filters": {"search": "dom", "minDuration": 2.0},
            "groupBy": ["type", "field:eventType"],
        }))
        .unwrap();
        let Command::ThreadMarkers {
            thread,
            filters,
            group_by,
            auto_group,
        } = cmd
        else {
            panic!("wrong command");
        };
        assert_eq!(thread, None);
        assert_eq!(filters.search.as_deref(), Some("dom"));
        assert_eq!(filters.min_duration, Some(2.0));
        assert_eq!(group_by.map(|g| g.len()), Some(2));
        assert!(!auto_group);
    }

    #[test]
    fn test_text_and_structured_success() {
        let text = ServerResponse::Success {
            result: CommandOutput::Text("Selected thread t-0".into()),
        };
        assert_eq!(
            serde_json::to_string(&text).unwrap(),
            r#"{"type":"success","result":"Selected thread t-0"}"#
        );

        let label = |name: &str, ms| TimestampLabel {
            name: name.into(),
            ms,
        };
        let view = ServerResponse::Success {
            result: CommandOutput::structured(
                CommandResult::ViewRange(ViewRange {
                    action: ZoomAction::Pop,
                    range: RangeLabel {
                        start: label("ts-0", 0.0),
                        end: label("ts-Z", 10.0),
                        duration_ms: 10.0,
                    },
                    depth: 0,
                    popped: None,
                }),
                None,
            ),
        };
        let wire = serde_json::to_value(&view).unwrap();
        assert_eq!(wire["result"]["type"], "view-range");
        assert_eq!(wire["result"]["action"], "pop");
        let back: ServerResponse = serde_json::from_value(wire).unwrap();
        assert_eq!(back, view);
    }

    #[test]
    fn test_error_response_becomes_daemon_error() {
        let err = ServerResponse::error("Unknown handle: f-9")
            .into_output()
            .unwrap_err();
        assert!(matches!(err, Error::Daemon(msg) if msg.contains("f-9")));
        assert!(matches!(
            ServerResponse::Loading.into_output(),
            Err(Error::DaemonLoading)
        ));
    }
}
