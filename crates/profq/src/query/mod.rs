//! Handle-based queries over one loaded profile.
//!
//! `ProfileQuerier` owns the profile state, the handle maps, the timestamp
//! namer and the zoom stack for the lifetime of a daemon.

pub mod collector;
pub mod handles;
pub mod markers;
pub mod range;
pub mod slices;
pub mod timestamps;

use crate::error::{Error, Result};
use crate::profile::{CallTreeSource, CommittedRange, Marker, Profile, ProfileState};
use crate::protocol::{
    CallSite, Command, CommandOutput, CommandResult, FunctionExpand, FunctionInfo,
    FunctionSummary, MarkerField, MarkerInfo, MarkerStack, ProcessSummary, ProfileInfo,
    RangeLabel, SessionContext, SliceInfo, StackFrame, StatusInfo, ThreadCallTree, ThreadFunctions,
    ThreadInfo, ThreadMarkers, ThreadSamples, ThreadSummary, ViewRange, ZoomAction,
};
use collector::{CollectOptions, collect_call_tree};
use handles::{Handles, parse_thread_set, thread_set_handle};
use markers::{GroupKey, MarkerFilters, MarkerRef};
use range::{RangeSpec, resolve_bounds};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use timestamps::TimestampNamer;

/// Threads listed by `profile info` unless all are requested.
const PROFILE_INFO_THREADS: usize = 5;
/// Functions listed per table by `thread samples`.
const TOP_FUNCTIONS: usize = 20;
const DEFAULT_FUNCTION_LIMIT: usize = 50;
const EXPAND_CALL_SITES: usize = 10;

fn percentage(part: f64, total: f64) -> f64 {
    if total > 0.0 { part / total * 100.0 } else { 0.0 }
}

/// Per-function self and total weight over a sample set.
#[derive(Default)]
struct FunctionStats {
    self_weight: HashMap<usize, f64>,
    total_weight: HashMap<usize, f64>,
    total: f64,
}

impl FunctionStats {
    fn collect(state: &ProfileState, threads: &[usize]) -> Self {
        let profile = state.profile();
        let mut stats = FunctionStats::default();
        for (t, i) in state.samples_in_view(threads) {
            let table = &profile.threads[t].samples;
            let Some(stack) = table.stack[i] else {
                continue;
            };
            let weight = table.weight(i);
            let funcs = profile.stack_funcs(stack);
            stats.total += weight;
            if let Some(&leaf) = funcs.first() {
                *stats.self_weight.entry(leaf).or_default() += weight;
            }
            // Recursive frames count once per sample.
            let unique: HashSet<usize> = funcs.into_iter().collect();
            for func in unique {
                *stats.total_weight.entry(func).or_default() += weight;
            }
        }
        stats
    }

    fn self_of(&self, func: usize) -> f64 {
        self.self_weight.get(&func).copied().unwrap_or(0.0)
    }

    fn total_of(&self, func: usize) -> f64 {
        self.total_weight.get(&func).copied().unwrap_or(0.0)
    }
}

pub struct ProfileQuerier {
    state: ProfileState,
    handles: Handles,
    namer: TimestampNamer,
}

impl ProfileQuerier {
    pub fn new(profile: Arc<Profile>) -> Self {
        let state = ProfileState::new(profile);
        let root = state.root_range();
        let mut namer = TimestampNamer::new(root.start, root.end);
        // The root start is always addressable as `ts-0`.
        namer.name_for(root.start);
        ProfileQuerier {
            state,
            handles: Handles::default(),
            namer,
        }
    }

    pub fn profile(&self) -> &Profile {
        self.state.profile()
    }

    pub fn timestamp_name(&mut self, time: f64) -> String {
        self.namer.name_for(time)
    }

    /// Run one command. Every variant is handled here.
    pub fn execute(&mut self, command: Command) -> Result<CommandOutput> {
        let result = match command {
            Command::ProfileInfo => {
                return Ok(CommandOutput::structured(
                    CommandResult::ProfileInfo(self.profile_info(false)),
                    None,
                ));
            }
            Command::ProfileThreads => {
                return Ok(CommandOutput::structured(
                    CommandResult::ProfileInfo(self.profile_info(true)),
                    None,
                ));
            }
            Command::Status => {
                return Ok(CommandOutput::structured(
                    CommandResult::Status(self.status()),
                    None,
                ));
            }
            Command::ThreadSelect { thread } => {
                return self.thread_select(&thread).map(CommandOutput::Text);
            }
            Command::ThreadInfo { thread } => {
                CommandResult::ThreadInfo(self.thread_info(thread.as_deref())?)
            }
            Command::ThreadSamples { thread } => {
                CommandResult::ThreadSamples(self.thread_samples(thread.as_deref())?)
            }
            Command::ThreadSamplesTopDown { thread, options } => CommandResult::ThreadSamplesTopDown(
                self.thread_call_tree(thread.as_deref(), options, false)?,
            ),
            Command::ThreadSamplesBottomUp { thread, options } => {
                CommandResult::ThreadSamplesBottomUp(
                    self.thread_call_tree(thread.as_deref(), options, true)?,
                )
            }
            Command::ThreadMarkers {
                thread,
                filters,
                group_by,
                auto_group,
            } => CommandResult::ThreadMarkers(self.thread_markers(
                thread.as_deref(),
                filters,
                group_by,
                auto_group,
            )?),
            Command::ThreadFunctions {
                thread,
                search,
                min_self,
                limit,
            } => CommandResult::ThreadFunctions(self.thread_functions(
                thread.as_deref(),
                search.as_deref(),
                min_self,
                limit,
            )?),
            Command::MarkerInfo { marker } => CommandResult::MarkerInfo(self.marker_info(&marker)?),
            Command::MarkerStack { marker } => {
                CommandResult::MarkerStack(self.marker_stack(&marker)?)
            }
            Command::FunctionInfo { function } => {
                CommandResult::FunctionInfo(self.function_info(&function)?)
            }
            Command::FunctionExpand { function } => {
                CommandResult::FunctionExpand(self.function_expand(&function)?)
            }
            Command::ZoomPush { range } => CommandResult::ViewRange(self.zoom_push(&range)?),
            Command::ZoomPop => CommandResult::ViewRange(self.zoom_pop()?),
            Command::ZoomClear => CommandResult::ViewRange(self.zoom_clear()),
        };
        let context = self.context();
        Ok(CommandOutput::structured(result, Some(context)))
    }

    fn resolve_threads(&self, thread: Option<&str>) -> Result<Vec<usize>> {
        let threads = match thread {
            Some(handle) => parse_thread_set(handle)?,
            None => self.state.selected_threads().to_vec(),
        };
        if threads.is_empty() {
            return Err(Error::Query("No thread selected".to_string()));
        }
        let count = self.profile().threads.len();
        if let Some(&missing) = threads.iter().find(|&&t| t >= count) {
            return Err(Error::UnknownHandle(format!("t-{missing}")));
        }
        Ok(threads)
    }

    fn thread_names(&self, threads: &[usize]) -> Vec<String> {
        threads
            .iter()
            .filter_map(|&t| self.profile().threads.get(t))
            .map(|t| t.name.clone())
            .collect()
    }

    fn range_label(&mut self, range: CommittedRange) -> RangeLabel {
        RangeLabel {
            start: self.namer.label(range.start),
            end: self.namer.label(range.end),
            duration_ms: range.duration(),
        }
    }

    fn context(&mut self) -> SessionContext {
        let selected = self.state.selected_threads().to_vec();
        let view = self.state.current_range();
        SessionContext {
            selected_threads: thread_set_handle(&selected),
            thread_names: self.thread_names(&selected),
            view_range: self.range_label(view),
            zoom_depth: self.state.committed_ranges().len(),
        }
    }

    fn function_summary(
        &mut self,
        threads: &[usize],
        func: usize,
        stats: &FunctionStats,
    ) -> FunctionSummary {
        let profile = self.state.profile();
        FunctionSummary {
            handle: self.handles.function(threads, func),
            name: profile.func_name(func).to_string(),
            name_with_library: profile.func_name_with_library(func),
            self_samples: stats.self_of(func),
            self_percentage: percentage(stats.self_of(func), stats.total),
            total_samples: stats.total_of(func),
            total_percentage: percentage(stats.total_of(func), stats.total),
        }
    }

    pub fn profile_info(&mut self, show_all: bool) -> ProfileInfo {
        let root = self.state.root_range();
        let root_range = self.range_label(root);
        let profile = self.state.profile();
        let interval = profile.meta.interval;
        let mut threads: Vec<(usize, f64)> = profile
            .threads
            .iter()
            .enumerate()
            .map(|(i, t)| (i, t.cpu_ms(interval)))
            .collect();
        threads.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let process_cpu = |pid: &str| -> f64 {
            profile
                .threads
                .iter()
                .filter(|t| t.pid == pid)
                .map(|t| t.cpu_ms(interval))
                .sum()
        };

        let visible = if show_all {
            threads.len()
        } else {
            threads.len().min(PROFILE_INFO_THREADS)
        };
        let mut processes: Vec<ProcessSummary> = Vec::new();
        for &(index, cpu_ms) in &threads[..visible] {
            let thread = &profile.threads[index];
            let summary = ThreadSummary {
                handle: format!("t-{index}"),
                name: thread.name.clone(),
                tid: thread.tid.clone(),
                is_main_thread: thread.is_main_thread,
                sample_count: thread.samples.len(),
                cpu_ms,
            };
            match processes.iter_mut().find(|p| p.pid == thread.pid) {
                Some(process) => process.threads.push(summary),
                None => processes.push(ProcessSummary {
                    pid: thread.pid.clone(),
                    name: thread.process_name.clone(),
                    cpu_ms: process_cpu(&thread.pid),
                    threads: vec![summary],
                }),
            }
        }
        processes.sort_by(|a, b| b.cpu_ms.total_cmp(&a.cpu_ms));

        ProfileInfo {
            product: profile.meta.product.clone(),
            platform: profile.meta.platform.clone(),
            start_time: Some(profile.meta.start_time).filter(|t| *t > 0.0),
            interval_ms: interval,
            root_range,
            thread_count: threads.len(),
            processes,
            show_all,
            hidden_threads: threads.len() - visible,
        }
    }

    pub fn thread_select(&mut self, thread: &str) -> Result<String> {
        let threads = self.resolve_threads(Some(thread))?;
        let names = self.thread_names(&threads).join(", ");
        let handle = thread_set_handle(&threads);
        self.state.select_threads(threads);
        Ok(format!("Selected thread {handle} ({names})"))
    }

    pub fn thread_info(&mut self, thread: Option<&str>) -> Result<ThreadInfo> {
        let threads = self.resolve_threads(thread)?;
        let &[index] = threads.as_slice() else {
            return Err(Error::Query(format!(
                "thread info needs a single thread, got {}",
                thread_set_handle(&threads)
            )));
        };

        let profile = self.state.profile();
        let interval = profile.meta.interval;
        let data = &profile.threads[index];
        let in_view: Vec<usize> = self
            .state
            .samples_in_view(&[index])
            .into_iter()
            .map(|(_, i)| i)
            .collect();
        let times: Vec<f64> = in_view.iter().map(|&i| data.samples.time[i]).collect();
        let ratios: Vec<f64> = in_view.iter().map(|&i| data.samples.cpu_ratio(i)).collect();
        let durations: Vec<f64> = (0..times.len())
            .map(|k| match times.get(k + 1) {
                Some(next) => next - times[k],
                None => interval,
            })
            .collect();
        let end_time = times.last().map_or(0.0, |t| t + interval);
        let slices = slices::prune_slices(
            slices::extract_slices(&ratios, &durations, &slices::DEFAULT_THRESHOLDS),
            slices::MAX_SLICES,
        );

        fn convert(
            slice: &slices::Slice,
            times: &[f64],
            end_time: f64,
            namer: &mut TimestampNamer,
        ) -> SliceInfo {
            SliceInfo {
                start: namer.label(times.get(slice.start).copied().unwrap_or(end_time)),
                end: namer.label(times.get(slice.end).copied().unwrap_or(end_time)),
                avg_cpu_percentage: slice.avg * 100.0,
                cpu_ms: slice.sum,
                children: slice
                    .children
                    .iter()
                    .map(|c| convert(c, times, end_time, namer))
                    .collect(),
            }
        }

        let namer = &mut self.namer;
        let slices = slices
            .iter()
            .map(|s| convert(s, &times, end_time, namer))
            .collect();

        Ok(ThreadInfo {
            handle: format!("t-{index}"),
            name: data.name.clone(),
            process_name: data.process_name.clone(),
            pid: data.pid.clone(),
            tid: data.tid.clone(),
            is_main_thread: data.is_main_thread,
            registered: namer.label(data.register_time),
            unregistered: data.unregister_time.map(|t| namer.label(t)),
            sample_count: data.samples.len(),
            marker_count: data.markers.len(),
            cpu_ms: data.cpu_ms(interval),
            slices,
        })
    }

    pub fn thread_samples(&mut self, thread: Option<&str>) -> Result<ThreadSamples> {
        let threads = self.resolve_threads(thread)?;
        let stats = FunctionStats::collect(&self.state, &threads);

        let mut by_self: Vec<usize> = stats.self_weight.keys().copied().collect();
        by_self.sort_by(|&a, &b| stats.self_of(b).total_cmp(&stats.self_of(a)).then(a.cmp(&b)));
        let mut by_total: Vec<usize> = stats.total_weight.keys().copied().collect();
        by_total.sort_by(|&a, &b| {
            stats
                .total_of(b)
                .total_cmp(&stats.total_of(a))
                .then(a.cmp(&b))
        });

        let top_self = by_self
            .into_iter()
            .take(TOP_FUNCTIONS)
            .map(|f| self.function_summary(&threads, f, &stats))
            .collect();
        let top_total = by_total
            .into_iter()
            .take(TOP_FUNCTIONS)
            .map(|f| self.function_summary(&threads, f, &stats))
            .collect();

        let tree = self.state.call_tree(&threads, false);
        let heaviest_stack = tree
            .heaviest_path()
            .into_iter()
            .map(|node| {
                let data = tree.node_data(node);
                StackFrame {
                    handle: self.handles.function(&threads, tree.func(node)),
                    name: data.name,
                    name_with_library: self.state.profile().func_name_with_library(tree.func(node)),
                    total_samples: Some(data.total),
                }
            })
            .collect();

        Ok(ThreadSamples {
            thread: thread_set_handle(&threads),
            thread_names: self.thread_names(&threads),
            total_samples: stats.total,
            top_self,
            top_total,
            heaviest_stack,
        })
    }

    pub fn thread_call_tree(
        &mut self,
        thread: Option<&str>,
        options: CollectOptions,
        inverted: bool,
    ) -> Result<ThreadCallTree> {
        if options.max_nodes == 0 {
            return Err(Error::InvalidArgument("max nodes must be at least 1".to_string()));
        }
        let threads = self.resolve_threads(thread)?;
        let tree = self.state.call_tree(&threads, inverted);
        let handles = &mut self.handles;
        let root = collect_call_tree(&tree, &options, |func| handles.function(&threads, func));
        Ok(ThreadCallTree {
            thread: thread_set_handle(&threads),
            thread_names: self.thread_names(&threads),
            inverted,
            options,
            total_samples: tree.grand_total(),
            root,
        })
    }

    pub fn thread_markers(
        &mut self,
        thread: Option<&str>,
        filters: MarkerFilters,
        group_by: Option<Vec<GroupKey>>,
        auto_group: bool,
    ) -> Result<ThreadMarkers> {
        let threads = self.resolve_threads(thread)?;
        let thread_names = self.thread_names(&threads);
        let state = &self.state;
        let handles = &mut self.handles;
        let namer = &mut self.namer;

        let in_view = state.markers_in_view(&threads);
        let total_markers = in_view.len();
        let filtered = filters.apply(in_view);
        let mut labeler = |index: usize, marker: &Marker| MarkerRef {
            handle: handles.marker(&threads, index),
            name: marker.name.clone(),
            start: namer.label(marker.start),
            duration_ms: marker.duration(),
        };

        let groups = match &group_by {
            Some(keys) if !keys.is_empty() => markers::group_by_keys(&filtered, keys, &mut labeler),
            _ => markers::aggregate_by_type(&filtered, auto_group, &mut labeler),
        };
        let by_category = markers::category_breakdown(&filtered);

        Ok(ThreadMarkers {
            thread: thread_set_handle(&threads),
            thread_names,
            total_markers,
            filtered_markers: filtered.len(),
            filters,
            group_by,
            groups,
            by_category,
        })
    }

    pub fn thread_functions(
        &mut self,
        thread: Option<&str>,
        search: Option<&str>,
        min_self: Option<f64>,
        limit: Option<usize>,
    ) -> Result<ThreadFunctions> {
        let threads = self.resolve_threads(thread)?;
        let stats = FunctionStats::collect(&self.state, &threads);
        let needle = search.map(str::to_lowercase);
        let profile = self.state.profile();

        let mut funcs: Vec<usize> = stats.total_weight.keys().copied().collect();
        let total_functions = funcs.len();
        funcs.retain(|&f| {
            needle
                .as_deref()
                .is_none_or(|n| profile.func_name(f).to_lowercase().contains(n))
                && min_self.is_none_or(|min| percentage(stats.self_of(f), stats.total) >= min)
        });
        funcs.sort_by(|&a, &b| {
            stats
                .self_of(b)
                .total_cmp(&stats.self_of(a))
                .then(stats.total_of(b).total_cmp(&stats.total_of(a)))
                .then(a.cmp(&b))
        });
        funcs.truncate(limit.unwrap_or(DEFAULT_FUNCTION_LIMIT));

        let functions = funcs
            .into_iter()
            .map(|f| self.function_summary(&threads, f, &stats))
            .collect();
        Ok(ThreadFunctions {
            thread: thread_set_handle(&threads),
            thread_names: self.thread_names(&threads),
            total_samples: stats.total,
            total_functions,
            functions,
        })
    }

    /// The marker behind `handle` and the thread it belongs to.
    fn lookup_marker(&self, handle: &str) -> Result<(Vec<usize>, usize, usize)> {
        let (threads, index) = self.handles.markers.lookup(handle)?.clone();
        let profile = self.profile();
        let mut offset = 0;
        for &t in &threads {
            let count = profile.threads.get(t).map_or(0, |th| th.markers.len());
            if index < offset + count {
                return Ok((threads, t, index - offset));
            }
            offset += count;
        }
        Err(Error::UnknownHandle(handle.to_string()))
    }

    pub fn marker_info(&mut self, handle: &str) -> Result<MarkerInfo> {
        let (_, thread, local) = self.lookup_marker(handle)?;
        let profile = self.state.profile();
        let marker = &profile.threads[thread].markers[local];
        let fields = marker
            .data
            .iter()
            .flatten()
            .filter(|(key, _)| key.as_str() != "type")
            .map(|(key, value)| MarkerField {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        Ok(MarkerInfo {
            handle: handle.trim().to_string(),
            name: marker.name.clone(),
            marker_type: marker.marker_type().to_string(),
            category: marker.category.clone(),
            thread: format!("t-{thread}"),
            start: self.namer.label(marker.start),
            end: marker.end.map(|end| self.namer.label(end)),
            duration_ms: marker.duration(),
            has_stack: marker.stack.is_some(),
            fields,
        })
    }

    pub fn marker_stack(&mut self, handle: &str) -> Result<MarkerStack> {
        let (threads, thread, local) = self.lookup_marker(handle)?;
        let profile = self.state.profile();
        let marker = &profile.threads[thread].markers[local];
        let Some(stack) = marker.stack else {
            return Err(Error::Query(format!("Marker {handle} has no stack")));
        };
        let frames = profile
            .stack_funcs(stack)
            .into_iter()
            .map(|func| StackFrame {
                handle: self.handles.function(&threads, func),
                name: profile.func_name(func).to_string(),
                name_with_library: profile.func_name_with_library(func),
                total_samples: None,
            })
            .collect();
        Ok(MarkerStack {
            handle: handle.trim().to_string(),
            name: marker.name.clone(),
            frames,
        })
    }

    pub fn function_info(&mut self, handle: &str) -> Result<FunctionInfo> {
        let (threads, func) = self.handles.functions.lookup(handle)?.clone();
        let stats = FunctionStats::collect(&self.state, &threads);
        let profile = self.state.profile();
        let data = profile
            .funcs
            .get(func)
            .ok_or_else(|| Error::UnknownHandle(handle.to_string()))?;
        let lib = profile.func_lib(func);
        Ok(FunctionInfo {
            handle: handle.trim().to_string(),
            name: data.name.clone(),
            name_with_library: profile.func_name_with_library(func),
            library: lib.map(|l| l.name.clone()),
            library_path: lib.map(|l| l.path.clone()).filter(|p| !p.is_empty()),
            file: data.file.clone(),
            line: data.line,
            thread: thread_set_handle(&threads),
            self_samples: stats.self_of(func),
            self_percentage: percentage(stats.self_of(func), stats.total),
            total_samples: stats.total_of(func),
            total_percentage: percentage(stats.total_of(func), stats.total),
        })
    }

    pub fn function_expand(&mut self, handle: &str) -> Result<FunctionExpand> {
        let (threads, func) = self.handles.functions.lookup(handle)?.clone();
        let profile = self.state.profile();
        if func >= profile.funcs.len() {
            return Err(Error::UnknownHandle(handle.to_string()));
        }

        let mut total = 0.0;
        let mut callers: HashMap<usize, f64> = HashMap::new();
        let mut callees: HashMap<usize, f64> = HashMap::new();
        for (t, i) in self.state.samples_in_view(&threads) {
            let table = &profile.threads[t].samples;
            let Some(stack) = table.stack[i] else {
                continue;
            };
            let funcs = profile.stack_funcs(stack);
            if !funcs.contains(&func) {
                continue;
            }
            let weight = table.weight(i);
            total += weight;
            let mut seen_callers = HashSet::new();
            let mut seen_callees = HashSet::new();
            for (pos, &f) in funcs.iter().enumerate() {
                if f != func {
                    continue;
                }
                // Leaf-first order: the caller is one step toward the root.
                if let Some(&caller) = funcs.get(pos + 1) {
                    seen_callers.insert(caller);
                }
                if pos > 0 {
                    seen_callees.insert(funcs[pos - 1]);
                }
            }
            for caller in seen_callers {
                *callers.entry(caller).or_default() += weight;
            }
            for callee in seen_callees {
                *callees.entry(callee).or_default() += weight;
            }
        }

        let mut sites = |weights: HashMap<usize, f64>| -> Vec<CallSite> {
            let mut sorted: Vec<(usize, f64)> = weights.into_iter().collect();
            sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            sorted
                .into_iter()
                .take(EXPAND_CALL_SITES)
                .map(|(f, samples)| CallSite {
                    handle: self.handles.function(&threads, f),
                    name: profile.func_name(f).to_string(),
                    samples,
                    percentage: percentage(samples, total),
                })
                .collect()
        };
        let callers = sites(callers);
        let callees = sites(callees);

        Ok(FunctionExpand {
            handle: handle.trim().to_string(),
            full_name: profile.func_name(func).to_string(),
            library: profile.func_lib(func).map(|l| l.name.clone()),
            total_samples: total,
            callers,
            callees,
        })
    }

    pub fn zoom_push(&mut self, range: &str) -> Result<ViewRange> {
        let range = match RangeSpec::parse(range)? {
            RangeSpec::Bounds(start, end) => {
                resolve_bounds(&start, &end, self.state.root_range(), &self.namer)?
            }
            RangeSpec::Marker(handle) => {
                let (_, thread, local) = self.lookup_marker(&handle)?;
                let marker = &self.profile().threads[thread].markers[local];
                let Some(end) = marker.end else {
                    return Err(Error::Query(format!(
                        "Marker {handle} is an instant marker and cannot be zoomed into"
                    )));
                };
                CommittedRange {
                    start: marker.start,
                    end,
                }
            }
        };
        self.state.push_range(range);
        Ok(ViewRange {
            action: ZoomAction::Push,
            range: self.range_label(range),
            depth: self.state.committed_ranges().len(),
            popped: None,
        })
    }

    pub fn zoom_pop(&mut self) -> Result<ViewRange> {
        let popped = self
            .state
            .pop_range()
            .ok_or_else(|| Error::Query("No zoom range to pop".to_string()))?;
        let current = self.state.current_range();
        Ok(ViewRange {
            action: ZoomAction::Pop,
            range: self.range_label(current),
            depth: self.state.committed_ranges().len(),
            popped: Some(self.range_label(popped)),
        })
    }

    pub fn zoom_clear(&mut self) -> ViewRange {
        self.state.clear_ranges();
        let root = self.state.root_range();
        ViewRange {
            action: ZoomAction::Clear,
            range: self.range_label(root),
            depth: 0,
            popped: None,
        }
    }

    pub fn status(&mut self) -> StatusInfo {
        let selected = self.state.selected_threads().to_vec();
        let root = self.state.root_range();
        let stack = self.state.committed_ranges().to_vec();
        StatusInfo {
            selected_threads: thread_set_handle(&selected),
            thread_names: self.thread_names(&selected),
            root_range: self.range_label(root),
            zoom_stack: stack.into_iter().map(|r| self.range_label(r)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::fixtures::sample_profile;
    use crate::protocol::ContextualResult;

    fn querier() -> ProfileQuerier {
        ProfileQuerier::new(Arc::new(sample_profile()))
    }

    fn structured(output: CommandOutput) -> ContextualResult {
        match output {
            CommandOutput::Structured(result) => *result,
            CommandOutput::Text(text) => panic!("expected structured output, got {text}"),
        }
    }

    #[test]
    fn test_zoom_stack_scenario() {
        let mut q = querier();
        let first = q.zoom_push("10%,50%").unwrap();
        assert_eq!(first.depth, 1);
        assert_eq!(first.range.start.ms, 1.0);
        assert_eq!(first.range.end.ms, 5.0);

        let five = q.timestamp_name(5.0);
        let second = q.zoom_push(&format!("ts-0,{five}")).unwrap();
        assert_eq!(second.depth, 2);
        assert_eq!(second.range.start.name, "ts-0");

        let popped = q.zoom_pop().unwrap();
        assert_eq!(popped.depth, 1);
        assert_eq!(popped.popped.map(|p| p.start.ms), Some(0.0));
        let status = q.status();
        assert_eq!(status.zoom_stack.len(), 1);
        assert_eq!(status.zoom_stack[0].start.ms, 1.0);
        assert_eq!(status.zoom_stack[0].end.ms, 5.0);

        q.zoom_push("1ms,2ms").unwrap();
        q.zoom_push("1.5ms,2ms").unwrap();
        let cleared = q.zoom_clear();
        assert_eq!(cleared.depth, 0);
        assert!(q.status().zoom_stack.is_empty());
        assert!(q.zoom_pop().is_err());
    }

    #[test]
    fn test_zoom_far_outside_the_profile() {
        let mut q = querier();
        let view = q.zoom_push("-1e300,1").unwrap();
        assert!(view.range.start.name.starts_with("ts<"));
        let start = view.range.start.ms;
        assert_eq!(q.timestamp_name(start), view.range.start.name);
        assert_eq!(q.status().zoom_stack.len(), 1);
        assert_eq!(q.zoom_pop().unwrap().depth, 0);
    }

    #[test]
    fn test_zoom_into_markers() {
        let mut q = querier();
        let markers = q.thread_markers(None, MarkerFilters::default(), None, false).unwrap();
        let dom = &markers.groups[0];
        assert_eq!(dom.group_name, "DOMEvent");
        let longest = dom.top_markers[0].handle.clone();
        let view = q.zoom_push(&longest).unwrap();
        assert_eq!((view.range.start.ms, view.range.end.ms), (4.0, 8.0));

        let paint = markers.groups[1].top_markers[0].handle.clone();
        assert!(matches!(q.zoom_push(&paint), Err(Error::Query(_))));
        assert!(matches!(q.zoom_push("m-99"), Err(Error::UnknownHandle(_))));
    }

    #[test]
    fn test_call_tree_handles_resolve_to_functions() {
        let mut q = querier();
        let tree = q
            .thread_call_tree(None, CollectOptions::default(), false)
            .unwrap();
        assert_eq!(tree.total_samples, 9.0);
        let main = &tree.root.children[0];
        assert_eq!(main.name, "main");
        let handle = main.function_handle.clone().unwrap();

        let info = q.function_info(&handle).unwrap();
        assert_eq!(info.name, "main");
        assert_eq!(info.total_samples, 9.0);
        assert_eq!(info.self_samples, 1.0);

        // Asking again yields the same handle.
        let again = q
            .thread_call_tree(Some("t-0"), CollectOptions::default(), false)
            .unwrap();
        assert_eq!(again.root.children[0].function_handle, Some(handle));
    }

    #[test]
    fn test_function_expand_lists_callers_and_callees() {
        let mut q = querier();
        let functions = q.thread_functions(None, Some("LAYOUT"), None, None).unwrap();
        assert_eq!(functions.functions.len(), 1);
        let layout = functions.functions[0].handle.clone();

        let expand = q.function_expand(&layout).unwrap();
        assert_eq!(expand.full_name, "layout");
        assert_eq!(expand.total_samples, 5.0);
        assert_eq!(expand.callers.len(), 1);
        assert_eq!(expand.callers[0].name, "main");
        assert_eq!(expand.callers[0].percentage, 100.0);
        assert_eq!(expand.callees[0].name, "paint");
        assert_eq!(expand.callees[0].samples, 4.0);
    }

    #[test]
    fn test_thread_functions_filters() {
        let mut q = querier();
        let all = q.thread_functions(None, None, None, None).unwrap();
        assert_eq!(all.total_functions, 5);
        assert_eq!(all.functions[0].name, "paint");

        let hot = q.thread_functions(None, None, Some(40.0), None).unwrap();
        assert_eq!(hot.functions.len(), 1);
        let limited = q.thread_functions(None, None, None, Some(2)).unwrap();
        assert_eq!(limited.functions.len(), 2);
    }

    #[test]
    fn test_thread_select_changes_default() {
        let mut q = querier();
        let text = q.thread_select("t-1").unwrap();
        assert_eq!(text, "Selected thread t-1 (DOM Worker)");
        let samples = q.thread_samples(None).unwrap();
        assert_eq!(samples.thread, "t-1");
        assert!(q.thread_select("t-7").is_err());
    }

    #[test]
    fn test_thread_samples_heaviest_stack() {
        let mut q = querier();
        let samples = q.thread_samples(None).unwrap();
        let path: Vec<&str> = samples
            .heaviest_stack
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(path, vec!["main", "layout", "paint"]);
        assert_eq!(samples.top_self[0].name, "paint");
        assert_eq!(samples.top_total[0].name, "main");
    }

    #[test]
    fn test_marker_info_and_stack() {
        let mut q = querier();
        let markers = q.thread_markers(None, MarkerFilters::default(), None, false).unwrap();
        let click = markers.groups[0]
            .top_markers
            .iter()
            .find(|m| m.start.ms == 1.0)
            .unwrap()
            .handle
            .clone();
        let info = q.marker_info(&click).unwrap();
        assert_eq!(info.marker_type, "DOMEvent");
        assert_eq!(info.duration_ms, Some(2.0));
        assert!(info.fields.iter().any(|f| f.key == "eventType"));

        let stack = q.marker_stack(&click).unwrap();
        let frames: Vec<&str> = stack.frames.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(frames, vec!["parse", "main"]);

        let keydown = markers.groups[0]
            .top_markers
            .iter()
            .find(|m| m.start.ms == 4.0)
            .unwrap()
            .handle
            .clone();
        assert!(q.marker_stack(&keydown).is_err());
    }

    #[test]
    fn test_execute_attaches_context() {
        let mut q = querier();
        let output = q
            .execute(Command::ThreadInfo { thread: None })
            .unwrap();
        let result = structured(output);
        let context = result.context.unwrap();
        assert_eq!(context.selected_threads, "t-0");
        assert_eq!(context.thread_names, vec!["GeckoMain".to_string()]);
        assert_eq!(context.zoom_depth, 0);
        let CommandResult::ThreadInfo(info) = result.result else {
            panic!("wrong result");
        };
        assert_eq!(info.sample_count, 10);
        assert_eq!(info.marker_count, 3);

        let profile = structured(q.execute(Command::ProfileInfo).unwrap());
        assert!(profile.context.is_none());
        let CommandResult::ProfileInfo(info) = profile.result else {
            panic!("wrong result");
        };
        assert_eq!(info.thread_count, 2);
        assert_eq!(info.processes.len(), 1);
        assert_eq!(info.processes[0].threads.len(), 2);
        assert_eq!(info.start_time, Some(1_700_000_000_000.0));
        assert_eq!(info.hidden_threads, 0);
    }

    #[test]
    fn test_merged_thread_view() {
        let mut q = querier();
        let merged = q
            .thread_call_tree(Some("t-1,t-0"), CollectOptions::default(), false)
            .unwrap();
        assert_eq!(merged.thread, "t-0,t-1");
        assert_eq!(merged.total_samples, 12.0);
        assert!(q.thread_info(Some("t-0,t-1")).is_err());
    }
}
