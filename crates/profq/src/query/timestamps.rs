//! Short, stable names for points in time.
//!
//! Names are handed out lazily. The root range is covered by one tree of
//! nodes, each node holding an index into a 62-character alphabet. A new
//! timestamp gets a name by interpolating an unused index between the two
//! nodes that bracket it; when the bracketing indices are adjacent the search
//! drills into the left node's sub-range and the name grows by a character.
//! Timestamps outside the root range live in exponentially growing buckets
//! before the start (`ts<`) or after the end (`ts>`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const RIGHT_SENTINEL: u8 = 62;

fn index_char(index: u8) -> char {
    ALPHABET[index as usize] as char
}

#[derive(Debug)]
struct NameNode {
    index: u8,
    time: f64,
    /// Sorted by `time`; lazily seeded with index 0 at the node's own time.
    children: Vec<NameNode>,
}

impl NameNode {
    fn new(index: u8, time: f64) -> Self {
        NameNode {
            index,
            time,
            children: Vec::new(),
        }
    }

    /// Name `time` inside this node's bracket `[self.time, right]`.
    fn name(&mut self, prefix: &mut String, right: f64, time: f64) {
        if self.children.is_empty() {
            self.children.push(NameNode::new(0, self.time));
        }

        // children[0].time == self.time <= time, so pos >= 1
        let pos = self.children.partition_point(|c| c.time <= time);
        let left = pos - 1;
        let (left_index, left_time) = (self.children[left].index, self.children[left].time);

        if left_time == time {
            prefix.push(index_char(left_index));
            return;
        }

        let (right_index, right_time) = match self.children.get(pos) {
            Some(next) => (next.index, next.time),
            None => (RIGHT_SENTINEL, right),
        };

        if right_index - left_index > 1 {
            let span = (right_index - left_index - 1) as f64;
            let fraction = if right_time > left_time {
                (time - left_time) / (right_time - left_time)
            } else {
                0.0
            };
            let offset = (fraction * span).floor().clamp(0.0, span - 1.0) as u8;
            let index = left_index + 1 + offset;
            self.children.insert(pos, NameNode::new(index, time));
            prefix.push(index_char(index));
            return;
        }

        prefix.push(index_char(left_index));
        self.children[left].name(prefix, right_time, time);
    }
}

#[derive(Debug)]
struct Zone {
    root: NameNode,
    end: f64,
}

impl Zone {
    fn new(start: f64, end: f64) -> Self {
        Zone {
            root: NameNode::new(0, start),
            end,
        }
    }

    fn name(&mut self, time: f64) -> String {
        let mut name = String::new();
        self.root.name(&mut name, self.end, time);
        name
    }
}

/// A named timestamp as it appears in results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampLabel {
    pub name: String,
    /// Milliseconds since the profile's zero.
    pub ms: f64,
}

/// Assigns `ts-…` names within the root range and `ts<…`/`ts>…` names outside it.
#[derive(Debug)]
pub struct TimestampNamer {
    start: f64,
    end: f64,
    length: f64,
    main: Zone,
    before: HashMap<u32, Zone>,
    after: HashMap<u32, Zone>,
    by_time: HashMap<u64, String>,
    by_name: HashMap<String, f64>,
}

impl TimestampNamer {
    pub fn new(start: f64, end: f64) -> Self {
        let end = end.max(start);
        // A zero-length root still needs a positive bucket unit.
        let length = if end > start { end - start } else { 1.0 };
        TimestampNamer {
            start,
            end,
            length,
            main: Zone::new(start, end),
            before: HashMap::new(),
            after: HashMap::new(),
            by_time: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn root_start(&self) -> f64 {
        self.start
    }

    pub fn root_end(&self) -> f64 {
        self.end
    }

    /// Stable name for `time`; the same input always yields the same name.
    pub fn name_for(&mut self, time: f64) -> String {
        // -0.0 and 0.0 share a name, so they share a cache entry.
        let time = match time {
            t if t.is_nan() => self.start,
            t if t == 0.0 => 0.0,
            t => t,
        };
        let key = time.to_bits();
        if let Some(name) = self.by_time.get(&key) {
            return name.clone();
        }

        let name = if time < self.start {
            let mut bucket = bucket_for(self.start - time, self.length);
            while bucket < MAX_BUCKET && time < self.before_bounds(bucket).0 {
                bucket += 1;
            }
            let (lower, upper) = self.before_bounds(bucket);
            let zone = self
                .before
                .entry(bucket)
                .or_insert_with(|| Zone::new(lower, upper));
            format!("ts<{}{}", bucket_code(bucket), zone.name(time))
        } else if time > self.end {
            let mut bucket = bucket_for(time - self.end, self.length);
            while bucket > 0 && time < self.after_bounds(bucket).0 {
                bucket -= 1;
            }
            let (lower, upper) = self.after_bounds(bucket);
            let zone = self
                .after
                .entry(bucket)
                .or_insert_with(|| Zone::new(lower, upper));
            format!("ts>{}{}", bucket_code(bucket), zone.name(time))
        } else {
            format!("ts-{}", self.main.name(time))
        };

        self.by_time.insert(key, name.clone());
        self.by_name.insert(name.clone(), time);
        name
    }

    pub fn label(&mut self, time: f64) -> TimestampLabel {
        TimestampLabel {
            name: self.name_for(time),
            ms: time,
        }
    }

    /// Reverse lookup of a previously issued name.
    pub fn time_for(&self, name: &str) -> Option<f64> {
        self.by_name.get(name).copied()
    }

    fn before_bounds(&self, bucket: u32) -> (f64, f64) {
        let lower = self.start - 2f64.powi(bucket as i32) * self.length;
        let upper = if bucket == 0 {
            self.start
        } else {
            self.start - 2f64.powi(bucket as i32 - 1) * self.length
        };
        (lower, upper)
    }

    fn after_bounds(&self, bucket: u32) -> (f64, f64) {
        let lower = if bucket == 0 {
            self.end
        } else {
            self.end + 2f64.powi(bucket as i32 - 1) * self.length
        };
        let upper = self.end + 2f64.powi(bucket as i32) * self.length;
        (lower, upper)
    }
}

/// Buckets 0..=60 take one character; the last alphabet character escapes
/// two more, so bucket codes never prefix one another.
const ESCAPED_BUCKETS: u32 = 62 * 62;
const MAX_BUCKET: u32 = 61 + ESCAPED_BUCKETS - 1;

/// `ceil(log2(distance / length))`, 0 when within one root length.
fn bucket_for(distance: f64, length: f64) -> u32 {
    if distance <= length {
        return 0;
    }
    (distance / length).log2().ceil().min(MAX_BUCKET as f64) as u32
}

fn bucket_code(bucket: u32) -> String {
    if bucket < 61 {
        return index_char(bucket as u8).to_string();
    }
    let escaped = bucket.min(MAX_BUCKET) - 61;
    [61, (escaped / 62) as u8, (escaped % 62) as u8]
        .into_iter()
        .map(index_char)
        .collect()
}
