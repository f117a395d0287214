//! Plain-text rendering of daemon results.

use super::SessionEntry;
use crate::protocol::{
    CallSite, CommandOutput, CommandResult, FunctionExpand, FunctionInfo, FunctionSummary,
    MarkerInfo, MarkerStack, ProfileInfo, RangeLabel, SessionContext, SliceInfo, StackFrame,
    StatusInfo, ThreadCallTree, ThreadFunctions, ThreadInfo, ThreadMarkers, ThreadSamples,
    ViewRange, ZoomAction,
};
use crate::query::collector::CollectedNode;
use crate::query::markers::MarkerGroup;
use comfy_table::{Cell, CellAlignment, Table, presets};
use std::fmt::Write;
use std::time::Duration;

/// Longest function name shown before truncation.
pub const MAX_NAME_LEN: usize = 120;

#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Truncate call trees to this many lines.
    pub max_lines: Option<usize>,
}

pub fn render(output: &CommandOutput, options: &FormatOptions) -> String {
    match output {
        CommandOutput::Text(text) => text.clone(),
        CommandOutput::Structured(contextual) => {
            let mut out = String::new();
            if let Some(context) = &contextual.context {
                render_context(&mut out, context);
            }
            out.push_str(&render_result(&contextual.result, options));
            out
        }
    }
}

pub fn render_result(result: &CommandResult, options: &FormatOptions) -> String {
    let mut out = String::new();
    match result {
        CommandResult::ProfileInfo(info) => render_profile_info(&mut out, info),
        CommandResult::ThreadInfo(info) => render_thread_info(&mut out, info),
        CommandResult::ThreadSamples(samples) => render_thread_samples(&mut out, samples),
        CommandResult::ThreadSamplesTopDown(tree) | CommandResult::ThreadSamplesBottomUp(tree) => {
            render_call_tree(&mut out, tree, options)
        }
        CommandResult::ThreadMarkers(markers) => render_thread_markers(&mut out, markers),
        CommandResult::ThreadFunctions(functions) => render_thread_functions(&mut out, functions),
        CommandResult::MarkerInfo(info) => render_marker_info(&mut out, info),
        CommandResult::MarkerStack(stack) => render_marker_stack(&mut out, stack),
        CommandResult::FunctionInfo(info) => render_function_info(&mut out, info),
        CommandResult::FunctionExpand(expand) => render_function_expand(&mut out, expand),
        CommandResult::ViewRange(view) => render_view_range(&mut out, view),
        CommandResult::Status(status) => render_status(&mut out, status),
    }
    out
}

/// Shorten `name` to `max` characters, marking the cut.
pub fn truncate_name(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    let kept: String = name.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Millisecond durations in human units (`1s 250ms`, `0.250ms`).
pub fn format_ms(ms: f64) -> String {
    if !ms.is_finite() || ms < 0.0 {
        return format!("{ms}ms");
    }
    if ms < 1000.0 {
        if ms.fract() == 0.0 {
            return format!("{ms:.0}ms");
        }
        return format!("{ms:.3}ms");
    }
    let rounded = Duration::from_millis(ms.round() as u64);
    humantime::format_duration(rounded).to_string()
}

fn format_samples(samples: f64) -> String {
    if samples.fract() == 0.0 {
        format!("{samples:.0}")
    } else {
        format!("{samples:.2}")
    }
}

fn range(label: &RangeLabel) -> String {
    format!(
        "{}..{} ({})",
        label.start.name,
        label.end.name,
        format_ms(label.duration_ms)
    )
}

fn render_context(out: &mut String, context: &SessionContext) {
    let _ = writeln!(
        out,
        "[thread {} ({}) | view {} | zoom depth {}]",
        context.selected_threads,
        context.thread_names.join(", "),
        range(&context.view_range),
        context.zoom_depth
    );
    out.push('\n');
}

fn render_profile_info(out: &mut String, info: &ProfileInfo) {
    let _ = writeln!(out, "Product:   {}", info.product);
    if let Some(platform) = &info.platform {
        let _ = writeln!(out, "Platform:  {platform}");
    }
    if let Some(start) = info.start_time
        && let Some(started) = chrono::DateTime::from_timestamp_millis(start as i64)
    {
        let _ = writeln!(out, "Started:   {}", started.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    let _ = writeln!(out, "Range:     {}", range(&info.root_range));
    let _ = writeln!(out, "Interval:  {}", format_ms(info.interval_ms));
    let _ = writeln!(out, "Threads:   {}", info.thread_count);

    for process in &info.processes {
        let _ = writeln!(
            out,
            "\nProcess {} (pid {}) - {} CPU",
            process.name,
            process.pid,
            format_ms(process.cpu_ms)
        );
        for thread in &process.threads {
            let main = if thread.is_main_thread { " [main]" } else { "" };
            let _ = writeln!(
                out,
                "  {:<6} {:<30} {:>8} samples  {:>12} CPU{main}",
                thread.handle,
                truncate_name(&thread.name, 30),
                thread.sample_count,
                format_ms(thread.cpu_ms)
            );
        }
    }
    if info.hidden_threads > 0 {
        let _ = writeln!(
            out,
            "\n... {} more threads (profq profile threads)",
            info.hidden_threads
        );
    }
}

fn render_slices(out: &mut String, slices: &[SliceInfo], depth: usize) {
    for slice in slices {
        let _ = writeln!(
            out,
            "{:indent$}{}..{}  {:>5.1}% avg  {} CPU",
            "",
            slice.start.name,
            slice.end.name,
            slice.avg_cpu_percentage,
            format_ms(slice.cpu_ms),
            indent = 2 + depth * 2
        );
        render_slices(out, &slice.children, depth + 1);
    }
}

fn render_thread_info(out: &mut String, info: &ThreadInfo) {
    let _ = writeln!(out, "Thread {} {}", info.handle, info.name);
    let _ = writeln!(
        out,
        "Process:    {} (pid {}, tid {}){}",
        info.process_name,
        info.pid,
        info.tid,
        if info.is_main_thread { " main thread" } else { "" }
    );
    match &info.unregistered {
        Some(end) => {
            let _ = writeln!(out, "Lifetime:   {}..{}", info.registered.name, end.name);
        }
        None => {
            let _ = writeln!(out, "Registered: {}", info.registered.name);
        }
    }
    let _ = writeln!(out, "Samples:    {}", info.sample_count);
    let _ = writeln!(out, "Markers:    {}", info.marker_count);
    let _ = writeln!(out, "CPU:        {}", format_ms(info.cpu_ms));
    if !info.slices.is_empty() {
        let _ = writeln!(out, "\nBusy periods:");
        render_slices(out, &info.slices, 0);
    }
}

fn function_line(out: &mut String, function: &FunctionSummary, by_self: bool) {
    let (samples, pct) = if by_self {
        (function.self_samples, function.self_percentage)
    } else {
        (function.total_samples, function.total_percentage)
    };
    let _ = writeln!(
        out,
        "  {:>6.1}% {:>8}  {:<6} {}",
        pct,
        format_samples(samples),
        function.handle,
        truncate_name(&function.name_with_library, MAX_NAME_LEN)
    );
}

fn frame_line(out: &mut String, index: usize, frame: &StackFrame) {
    let samples = frame
        .total_samples
        .map(|s| format!(" ({})", format_samples(s)))
        .unwrap_or_default();
    let _ = writeln!(
        out,
        "  {index:>3}. {:<6} {}{samples}",
        frame.handle,
        truncate_name(&frame.name_with_library, MAX_NAME_LEN)
    );
}

fn render_thread_samples(out: &mut String, samples: &ThreadSamples) {
    let _ = writeln!(
        out,
        "Thread {} ({}): {} samples",
        samples.thread,
        samples.thread_names.join(", "),
        format_samples(samples.total_samples)
    );
    let _ = writeln!(out, "\nTop functions by self time:");
    for function in &samples.top_self {
        function_line(out, function, true);
    }
    let _ = writeln!(out, "\nTop functions by running time:");
    for function in &samples.top_total {
        function_line(out, function, false);
    }
    if !samples.heaviest_stack.is_empty() {
        let _ = writeln!(out, "\nHeaviest stack (root first):");
        for (i, frame) in samples.heaviest_stack.iter().enumerate() {
            frame_line(out, i + 1, frame);
        }
    }
}

fn tree_lines(node: &CollectedNode, depth: usize, lines: &mut Vec<String>) {
    let handle = node
        .function_handle
        .as_deref()
        .map(|h| format!(" [{h}]"))
        .unwrap_or_default();
    lines.push(format!(
        "{:>6.1}% {:>6.1}%  {:indent$}{}{handle}",
        node.total_percentage,
        node.self_percentage,
        "",
        truncate_name(&node.name_with_library, MAX_NAME_LEN),
        indent = depth * 2
    ));
    for child in &node.children {
        tree_lines(child, depth + 1, lines);
    }
    if let Some(truncated) = &node.children_truncated {
        lines.push(format!(
            "{:>6.1}% {:>7}  {:indent$}... {} more (max {:.1}%)",
            truncated.combined_percentage,
            "",
            "",
            truncated.count,
            truncated.max_percentage,
            indent = (depth + 1) * 2
        ));
    }
}

fn render_call_tree(out: &mut String, tree: &ThreadCallTree, options: &FormatOptions) {
    let _ = writeln!(
        out,
        "Thread {} ({}): {} call tree, {} samples, scoring {}",
        tree.thread,
        tree.thread_names.join(", "),
        if tree.inverted { "bottom-up" } else { "top-down" },
        format_samples(tree.total_samples),
        tree.options.scoring
    );
    let _ = writeln!(out, "{:>7} {:>7}  FUNCTION", "TOTAL", "SELF");

    // The synthetic root carries the totals; its children are the real roots.
    let mut lines = Vec::new();
    for child in &tree.root.children {
        tree_lines(child, 0, &mut lines);
    }
    if let Some(truncated) = &tree.root.children_truncated {
        lines.push(format!(
            "{:>6.1}% {:>7}  ... {} more roots (max {:.1}%)",
            truncated.combined_percentage, "", truncated.count, truncated.max_percentage
        ));
    }

    let shown = options.max_lines.unwrap_or(lines.len()).min(lines.len());
    for line in &lines[..shown] {
        let _ = writeln!(out, "{line}");
    }
    if shown < lines.len() {
        let _ = writeln!(
            out,
            "... {} more lines (raise --max-lines to see them)",
            lines.len() - shown
        );
    }
}

fn render_group(out: &mut String, group: &MarkerGroup, depth: usize) {
    let indent = depth * 2;
    let mut line = format!("{:indent$}{:<32} {:>6}", "", group.group_name, group.count);
    if let Some(stats) = &group.duration_stats {
        let _ = write!(
            line,
            "  avg {}  median {}  p95 {}  max {}",
            format_ms(stats.avg),
            format_ms(stats.median),
            format_ms(stats.p95),
            format_ms(stats.max)
        );
    }
    if let Some(rate) = &group.rate_stats
        && rate.markers_per_second > 0.0
    {
        let _ = write!(line, "  {:.1}/s", rate.markers_per_second);
    }
    let _ = writeln!(out, "{line}");

    if !group.top_markers.is_empty() {
        let examples: Vec<String> = group
            .top_markers
            .iter()
            .map(|m| match m.duration_ms {
                Some(ms) => format!("{} ({})", m.handle, format_ms(ms)),
                None => format!("{} @{}", m.handle, m.start.name),
            })
            .collect();
        let _ = writeln!(out, "{:indent$}  e.g. {}", "", examples.join(", "));
    }
    if let (Some(key), Some(subs)) = (&group.sub_group_key, &group.sub_groups) {
        let _ = writeln!(out, "{:indent$}  by {key}:", "");
        for sub in subs {
            render_group(out, sub, depth + 2);
        }
    }
}

fn render_thread_markers(out: &mut String, markers: &ThreadMarkers) {
    let _ = writeln!(
        out,
        "Thread {} ({}): {} of {} markers",
        markers.thread,
        markers.thread_names.join(", "),
        markers.filtered_markers,
        markers.total_markers
    );
    if let Some(keys) = &markers.group_by {
        let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "Grouped by {}", keys.join(" > "));
    }
    out.push('\n');
    for group in &markers.groups {
        render_group(out, group, 0);
    }

    if !markers.by_category.is_empty() {
        let mut table = Table::new();
        table.load_preset(presets::NOTHING);
        table.set_header(vec!["CATEGORY", "COUNT", "SHARE"]);
        for category in &markers.by_category {
            table.add_row(vec![
                Cell::new(&category.category),
                Cell::new(category.count).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:.1}%", category.percentage))
                    .set_alignment(CellAlignment::Right),
            ]);
        }
        let _ = writeln!(out, "\n{table}");
    }
}

fn render_thread_functions(out: &mut String, functions: &ThreadFunctions) {
    let _ = writeln!(
        out,
        "Thread {} ({}): {} of {} functions, {} samples",
        functions.thread,
        functions.thread_names.join(", "),
        functions.functions.len(),
        functions.total_functions,
        format_samples(functions.total_samples)
    );
    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_header(vec!["HANDLE", "SELF", "SELF%", "TOTAL", "TOTAL%", "FUNCTION"]);
    for f in &functions.functions {
        table.add_row(vec![
            Cell::new(&f.handle),
            Cell::new(format_samples(f.self_samples)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}%", f.self_percentage)).set_alignment(CellAlignment::Right),
            Cell::new(format_samples(f.total_samples)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.1}%", f.total_percentage)).set_alignment(CellAlignment::Right),
            Cell::new(truncate_name(&f.name_with_library, MAX_NAME_LEN)),
        ]);
    }
    let _ = writeln!(out, "{table}");
}

fn render_marker_info(out: &mut String, info: &MarkerInfo) {
    let _ = writeln!(out, "Marker {} {}", info.handle, info.name);
    let _ = writeln!(out, "Type:     {}", info.marker_type);
    let _ = writeln!(out, "Category: {}", info.category);
    let _ = writeln!(out, "Thread:   {}", info.thread);
    match (&info.end, info.duration_ms) {
        (Some(end), Some(ms)) => {
            let _ = writeln!(
                out,
                "Time:     {}..{} ({})",
                info.start.name,
                end.name,
                format_ms(ms)
            );
        }
        _ => {
            let _ = writeln!(out, "Time:     {} (instant)", info.start.name);
        }
    }
    if info.has_stack {
        let _ = writeln!(out, "Stack:    profq marker stack {}", info.handle);
    }
    if !info.fields.is_empty() {
        let _ = writeln!(out, "\nFields:");
        for field in &info.fields {
            let value = match &field.value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = writeln!(out, "  {:<24} {value}", field.key);
        }
    }
}

fn render_marker_stack(out: &mut String, stack: &MarkerStack) {
    let _ = writeln!(out, "Stack of marker {} {} (leaf first):", stack.handle, stack.name);
    for (i, frame) in stack.frames.iter().enumerate() {
        frame_line(out, i, frame);
    }
}

fn render_function_info(out: &mut String, info: &FunctionInfo) {
    let _ = writeln!(
        out,
        "Function {} {}",
        info.handle,
        truncate_name(&info.name, MAX_NAME_LEN)
    );
    if let Some(library) = &info.library {
        match &info.library_path {
            Some(path) if !path.is_empty() => {
                let _ = writeln!(out, "Library:  {library} ({path})");
            }
            _ => {
                let _ = writeln!(out, "Library:  {library}");
            }
        }
    }
    if let Some(file) = &info.file {
        match info.line {
            Some(line) => {
                let _ = writeln!(out, "Source:   {file}:{line}");
            }
            None => {
                let _ = writeln!(out, "Source:   {file}");
            }
        }
    }
    let _ = writeln!(out, "Thread:   {}", info.thread);
    let _ = writeln!(
        out,
        "Self:     {} samples ({:.1}%)",
        format_samples(info.self_samples),
        info.self_percentage
    );
    let _ = writeln!(
        out,
        "Total:    {} samples ({:.1}%)",
        format_samples(info.total_samples),
        info.total_percentage
    );
}

fn call_site_lines(out: &mut String, title: &str, sites: &[CallSite]) {
    let _ = writeln!(out, "\n{title}:");
    if sites.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for site in sites {
        let _ = writeln!(
            out,
            "  {:>6.1}% {:>8}  {:<6} {}",
            site.percentage,
            format_samples(site.samples),
            site.handle,
            truncate_name(&site.name, MAX_NAME_LEN)
        );
    }
}

fn render_function_expand(out: &mut String, expand: &FunctionExpand) {
    let _ = writeln!(out, "Function {}", expand.handle);
    let _ = writeln!(out, "{}", expand.full_name);
    if let Some(library) = &expand.library {
        let _ = writeln!(out, "Library: {library}");
    }
    let _ = writeln!(out, "Total:   {} samples", format_samples(expand.total_samples));
    call_site_lines(out, "Callers", &expand.callers);
    call_site_lines(out, "Callees", &expand.callees);
}

fn render_view_range(out: &mut String, view: &ViewRange) {
    match view.action {
        ZoomAction::Push => {
            let _ = writeln!(out, "Zoomed to {} (depth {})", range(&view.range), view.depth);
        }
        ZoomAction::Pop => {
            if let Some(popped) = &view.popped {
                let _ = writeln!(out, "Left {}", range(popped));
            }
            let _ = writeln!(out, "Now viewing {} (depth {})", range(&view.range), view.depth);
        }
        ZoomAction::Clear => {
            let _ = writeln!(out, "Zoom cleared, viewing {}", range(&view.range));
        }
    }
}

fn render_status(out: &mut String, status: &StatusInfo) {
    let _ = writeln!(
        out,
        "Threads: {} ({})",
        status.selected_threads,
        status.thread_names.join(", ")
    );
    let _ = writeln!(out, "Profile: {}", range(&status.root_range));
    if status.zoom_stack.is_empty() {
        let _ = writeln!(out, "Zoom:    none");
    } else {
        let _ = writeln!(out, "Zoom:");
        for (depth, label) in status.zoom_stack.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", depth + 1, range(label));
        }
    }
}

/// Table of sessions for `list-sessions`.
pub fn render_sessions(entries: &[SessionEntry]) -> String {
    if entries.is_empty() {
        return "No sessions".to_string();
    }
    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_header(vec!["", "ID", "PID", "PROFILE", "CREATED", "STATE"]);
    for entry in entries {
        let (pid, profile, created) = match &entry.metadata {
            Some(meta) => (
                meta.pid.to_string(),
                meta.profile_path.clone(),
                meta.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ),
            None => Default::default(),
        };
        table.add_row(vec![
            Cell::new(if entry.current { "*" } else { "" }),
            Cell::new(&entry.id),
            Cell::new(pid).set_alignment(CellAlignment::Right),
            Cell::new(profile),
            Cell::new(created),
            Cell::new(entry.state.to_string()),
        ]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::collector::{ChildrenTruncated, CollectOptions};
    use crate::query::timestamps::TimestampLabel;

    fn label(name: &str, ms: f64) -> TimestampLabel {
        TimestampLabel {
            name: name.into(),
            ms,
        }
    }

    fn node(name: &str, total: f64, children: Vec<CollectedNode>) -> CollectedNode {
        CollectedNode {
            name: name.into(),
            name_with_library: name.into(),
            function_handle: Some(format!("f-{}", name.len())),
            total_samples: total,
            total_percentage: total,
            self_samples: 0.0,
            self_percentage: 0.0,
            original_depth: 0,
            children,
            children_truncated: None,
        }
    }

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("short", 10), "short");
        let long = "a".repeat(200);
        let cut = truncate_name(&long, MAX_NAME_LEN);
        assert_eq!(cut.chars().count(), MAX_NAME_LEN);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(5.0), "5ms");
        assert_eq!(format_ms(0.25), "0.250ms");
        assert_eq!(format_ms(1500.0), "1s 500ms");
    }

    #[test]
    fn test_call_tree_respects_max_lines() {
        let mut leaf = node("paint", 40.0, vec![]);
        leaf.children_truncated = Some(ChildrenTruncated {
            count: 2,
            combined_samples: 3.0,
            combined_percentage: 3.0,
            max_samples: 2.0,
            max_percentage: 2.0,
            depth: 3,
        });
        let tree = ThreadCallTree {
            thread: "t-0".into(),
            thread_names: vec!["GeckoMain".into()],
            inverted: false,
            options: CollectOptions::default(),
            total_samples: 100.0,
            root: node("(root)", 100.0, vec![node("main", 100.0, vec![node("layout", 50.0, vec![leaf])])]),
        };
        let result = CommandResult::ThreadSamplesTopDown(tree);

        let full = render_result(&result, &FormatOptions::default());
        assert!(full.contains("main [f-4]"));
        assert!(full.contains("... 2 more (max 2.0%)"));

        let cut = render_result(&result, &FormatOptions { max_lines: Some(2) });
        assert!(cut.contains("layout"));
        assert!(!cut.contains("paint"));
        assert!(cut.contains("... 2 more lines"));
    }

    #[test]
    fn test_function_expand_shows_full_name() {
        let name = format!("{}::deep", "module".repeat(30));
        let expand = FunctionExpand {
            handle: "f-0".into(),
            full_name: name.clone(),
            library: None,
            total_samples: 4.0,
            callers: vec![],
            callees: vec![CallSite {
                handle: "f-1".into(),
                name: "paint".into(),
                samples: 4.0,
                percentage: 100.0,
            }],
        };
        let text = render_result(&CommandResult::FunctionExpand(expand), &FormatOptions::default());
        assert!(text.contains(&name));
        assert!(text.contains("(none)"));
        assert!(text.contains("paint"));
    }

    #[test]
    fn test_context_header() {
        let output = CommandOutput::structured(
            CommandResult::Status(StatusInfo {
                selected_threads: "t-0".into(),
                thread_names: vec!["GeckoMain".into()],
                root_range: RangeLabel {
                    start: label("ts-0", 0.0),
                    end: label("ts-Z", 10.0),
                    duration_ms: 10.0,
                },
                zoom_stack: vec![],
            }),
            Some(SessionContext {
                selected_threads: "t-0".into(),
                thread_names: vec!["GeckoMain".into()],
                view_range: RangeLabel {
                    start: label("ts-0", 0.0),
                    end: label("ts-Z", 10.0),
                    duration_ms: 10.0,
                },
                zoom_depth: 0,
            }),
        );
        let text = render(&output, &FormatOptions::default());
        assert!(text.starts_with("[thread t-0 (GeckoMain) | view ts-0..ts-Z (10ms) | zoom depth 0]"));
        assert!(text.contains("Zoom:    none"));
    }
}
