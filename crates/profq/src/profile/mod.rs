//! In-memory profile model and the versioned view state derived from it.
//!
//! A profile holds shared function and stack tables plus per-thread sample
//! and marker tables. Times are milliseconds on a single timeline.

pub mod call_tree;
mod state;

pub use call_tree::{CallNodeData, CallTree, CallTreeSource};
pub use state::{CommittedRange, ProfileState, merged_markers};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMeta {
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub platform: Option<String>,
    /// Wall-clock start of the recording, epoch milliseconds.
    #[serde(default)]
    pub start_time: f64,
    /// Sampling interval in milliseconds.
    #[serde(default = "default_interval")]
    pub interval: f64,
    #[serde(default)]
    pub version: u32,
}

fn default_interval() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lib {
    pub name: String,
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Func {
    pub name: String,
    #[serde(default)]
    pub lib: Option<usize>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackEntry {
    #[serde(default)]
    pub prefix: Option<usize>,
    pub func: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleTable {
    pub time: Vec<f64>,
    pub stack: Vec<Option<usize>>,
    #[serde(default)]
    pub weight: Option<Vec<f64>>,
    #[serde(default, rename = "threadCPUDelta")]
    pub thread_cpu_delta: Option<Vec<f64>>,
}

impl SampleTable {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn weight(&self, index: usize) -> f64 {
        self.weight
            .as_ref()
            .and_then(|w| w.get(index).copied())
            .unwrap_or(1.0)
    }

    /// Fraction of wall time the thread spent on CPU for the sample at `index`.
    pub fn cpu_ratio(&self, index: usize) -> f64 {
        match &self.thread_cpu_delta {
            Some(deltas) => {
                if index == 0 {
                    return if self.stack[0].is_some() { 1.0 } else { 0.0 };
                }
                let elapsed = self.time[index] - self.time[index - 1];
                let delta = deltas.get(index).copied().unwrap_or(0.0);
                if elapsed <= 0.0 {
                    0.0
                } else {
                    (delta / elapsed).clamp(0.0, 1.0)
                }
            }
            None => {
                if self.stack[index].is_some() {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Marker {
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub start: f64,
    #[serde(default)]
    pub end: Option<f64>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub stack: Option<usize>,
}

impl Marker {
    /// Payload `type` if present, otherwise the marker name.
    pub fn marker_type(&self) -> &str {
        self.data
            .as_ref()
            .and_then(|d| d.get("type"))
            .and_then(Value::as_str)
            .unwrap_or(&self.name)
    }

    pub fn duration(&self) -> Option<f64> {
        self.end.map(|end| end - self.start)
    }

    pub fn is_interval(&self) -> bool {
        self.end.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub name: String,
    #[serde(default)]
    pub process_name: String,
    #[serde(default)]
    pub pid: String,
    #[serde(default)]
    pub tid: String,
    #[serde(default)]
    pub is_main_thread: bool,
    #[serde(default)]
    pub register_time: f64,
    #[serde(default)]
    pub unregister_time: Option<f64>,
    #[serde(default)]
    pub samples: SampleTable,
    #[serde(default)]
    pub markers: Vec<Marker>,
}

impl Thread {
    /// CPU milliseconds attributed to this thread across the whole recording.
    pub fn cpu_ms(&self, interval: f64) -> f64 {
        match &self.samples.thread_cpu_delta {
            Some(deltas) => deltas.iter().sum(),
            None => (0..self.samples.len())
                .filter(|&i| self.samples.stack[i].is_some())
                .count() as f64
                * interval,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub meta: ProfileMeta,
    #[serde(default)]
    pub libs: Vec<Lib>,
    #[serde(default)]
    pub funcs: Vec<Func>,
    #[serde(default)]
    pub stacks: Vec<StackEntry>,
    #[serde(default)]
    pub threads: Vec<Thread>,
}

impl Profile {
    /// Earliest sample or marker start to the latest sample (plus one
    /// interval) or marker end.
    pub fn root_range(&self) -> (f64, f64) {
        let mut start = f64::INFINITY;
        let mut end = f64::NEG_INFINITY;
        for thread in &self.threads {
            if let (Some(first), Some(last)) =
                (thread.samples.time.first(), thread.samples.time.last())
            {
                start = start.min(*first);
                end = end.max(*last + self.meta.interval);
            }
            for marker in &thread.markers {
                start = start.min(marker.start);
                end = end.max(marker.end.unwrap_or(marker.start));
            }
        }
        if !start.is_finite() || !end.is_finite() {
            return (0.0, 0.0);
        }
        (start, end)
    }

    /// Function indices from leaf to root for the given stack.
    pub fn stack_funcs(&self, stack: usize) -> Vec<usize> {
        let mut funcs = Vec::new();
        let mut current = Some(stack);
        while let Some(index) = current {
            let Some(entry) = self.stacks.get(index) else {
                break;
            };
            funcs.push(entry.func);
            current = entry.prefix;
        }
        funcs
    }

    pub fn func_name(&self, func: usize) -> &str {
        self.funcs
            .get(func)
            .map(|f| f.name.as_str())
            .unwrap_or("<unknown>")
    }

    pub fn func_lib(&self, func: usize) -> Option<&Lib> {
        self.funcs
            .get(func)
            .and_then(|f| f.lib)
            .and_then(|lib| self.libs.get(lib))
    }

    /// `name [lib]` when the function belongs to a library.
    pub fn func_name_with_library(&self, func: usize) -> String {
        match self.func_lib(func) {
            Some(lib) => format!("{} [{}]", self.func_name(func), lib.name),
            None => self.func_name(func).to_string(),
        }
    }

    /// Check table references so later queries can index without bounds checks
    /// failing on a corrupt file.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (i, func) in self.funcs.iter().enumerate() {
            if let Some(lib) = func.lib
                && lib >= self.libs.len()
            {
                return Err(format!("function {i} references missing library {lib}"));
            }
        }
        for (i, entry) in self.stacks.iter().enumerate() {
            if entry.func >= self.funcs.len() {
                return Err(format!("stack {i} references missing function {}", entry.func));
            }
            if let Some(prefix) = entry.prefix
                && prefix >= i
            {
                return Err(format!("stack {i} has non-preceding prefix {prefix}"));
            }
        }
        for thread in &self.threads {
            let samples = &thread.samples;
            if samples.stack.len() != samples.time.len() {
                return Err(format!(
                    "thread '{}' has {} sample times but {} stacks",
                    thread.name,
                    samples.time.len(),
                    samples.stack.len()
                ));
            }
            let stacks_ok = samples
                .stack
                .iter()
                .flatten()
                .chain(thread.markers.iter().filter_map(|m| m.stack.as_ref()))
                .all(|&s| s < self.stacks.len());
            if !stacks_ok {
                return Err(format!("thread '{}' references a missing stack", thread.name));
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::sample_profile;

    #[test]
    fn test_root_range_covers_samples_and_markers() {
        let profile = sample_profile();
        assert_eq!(profile.root_range(), (0.0, 10.0));
    }

    #[test]
    fn test_stack_funcs_walks_leaf_to_root() {
        let profile = sample_profile();
        assert_eq!(profile.stack_funcs(3), vec![3, 2, 0]);
        assert_eq!(profile.func_name_with_library(4), "alloc [libc.so]");
    }

    #[test]
    fn test_cpu_ratio_uses_thread_cpu_delta() {
        let profile = sample_profile();
        let worker = &profile.threads[1].samples;
        assert_eq!(worker.cpu_ratio(1), 0.5);
        assert_eq!(worker.cpu_ratio(2), 0.25);
        let main = &profile.threads[0].samples;
        assert_eq!(main.cpu_ratio(8), 0.0);
        assert_eq!(main.cpu_ratio(0), 1.0);
    }

    #[test]
    fn test_validate_rejects_dangling_stack() {
        let mut profile = sample_profile();
        assert!(profile.validate().is_ok());
        profile.threads[0].samples.stack[0] = Some(99);
        assert!(profile.validate().is_err());
    }
}
