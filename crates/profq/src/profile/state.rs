use super::{CallTree, Marker, Profile};
use std::sync::Arc;

/// A committed time range in absolute profile milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommittedRange {
    pub start: f64,
    pub end: f64,
}

impl CommittedRange {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

/// Versioned view over a loaded profile: the selected thread set and the
/// stack of committed ranges. Every mutation bumps `version`.
#[derive(Debug, Clone)]
pub struct ProfileState {
    profile: Arc<Profile>,
    root: CommittedRange,
    selected: Vec<usize>,
    committed: Vec<CommittedRange>,
    version: u64,
}

impl ProfileState {
    pub fn new(profile: Arc<Profile>) -> Self {
        let (start, end) = profile.root_range();
        let selected = default_thread(&profile).into_iter().collect();
        ProfileState {
            profile,
            root: CommittedRange { start, end },
            selected,
            committed: Vec::new(),
            version: 0,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root_range(&self) -> CommittedRange {
        self.root
    }

    /// Top of the committed stack, or the root range when empty.
    pub fn current_range(&self) -> CommittedRange {
        self.committed.last().copied().unwrap_or(self.root)
    }

    pub fn committed_ranges(&self) -> &[CommittedRange] {
        &self.committed
    }

    pub fn selected_threads(&self) -> &[usize] {
        &self.selected
    }

    pub fn select_threads(&mut self, threads: Vec<usize>) {
        self.selected = threads;
        self.version += 1;
    }

    pub fn push_range(&mut self, range: CommittedRange) {
        self.committed.push(range);
        self.version += 1;
    }

    pub fn pop_range(&mut self) -> Option<CommittedRange> {
        let popped = self.committed.pop();
        if popped.is_some() {
            self.version += 1;
        }
        popped
    }

    pub fn clear_ranges(&mut self) {
        self.committed.clear();
        self.version += 1;
    }

    /// `(thread, sample index)` pairs inside the current range, in time order.
    pub fn samples_in_view(&self, threads: &[usize]) -> Vec<(usize, usize)> {
        let range = self.current_range();
        let mut samples: Vec<(usize, usize)> = threads
            .iter()
            .filter_map(|&t| self.profile.threads.get(t).map(|thread| (t, thread)))
            .flat_map(|(t, thread)| {
                let times = &thread.samples.time;
                let first = times.partition_point(|&time| time < range.start);
                let last = times.partition_point(|&time| time < range.end);
                (first..last).map(move |i| (t, i))
            })
            .collect();
        if threads.len() > 1 {
            samples.sort_by(|a, b| {
                let ta = self.profile.threads[a.0].samples.time[a.1];
                let tb = self.profile.threads[b.0].samples.time[b.1];
                ta.total_cmp(&tb)
            });
        }
        samples
    }

    /// Markers of the thread set in concatenation order, paired with their
    /// merged index, restricted to those overlapping the current range.
    pub fn markers_in_view<'a>(&'a self, threads: &[usize]) -> Vec<(usize, &'a Marker)> {
        let range = self.current_range();
        merged_markers(&self.profile, threads)
            .into_iter()
            .filter(|(_, m)| {
                let end = m.end.unwrap_or(m.start);
                end >= range.start && m.start < range.end
            })
            .collect()
    }

    pub fn call_tree(&self, threads: &[usize], inverted: bool) -> CallTree {
        let samples = self.samples_in_view(threads).into_iter().filter_map(|(t, i)| {
            let table = &self.profile.threads[t].samples;
            table.stack[i].map(|stack| (stack, table.weight(i)))
        });
        CallTree::build(&self.profile, samples, inverted)
    }
}

/// All markers of the thread set, indexed by position in the concatenated list.
pub fn merged_markers<'a>(profile: &'a Profile, threads: &[usize]) -> Vec<(usize, &'a Marker)> {
    threads
        .iter()
        .filter_map(|&t| profile.threads.get(t))
        .flat_map(|thread| thread.markers.iter())
        .enumerate()
        .collect()
}

/// The main thread with the most samples, else the busiest thread.
fn default_thread(profile: &Profile) -> Option<usize> {
    let busiest = |main_only: bool| {
        profile
            .threads
            .iter()
            .enumerate()
            .filter(|(_, t)| !main_only || t.is_main_thread)
            .max_by_key(|(i, t)| (t.samples.len(), std::cmp::Reverse(*i)))
            .map(|(i, _)| i)
    };
    busiest(true).or_else(|| busiest(false))
}
