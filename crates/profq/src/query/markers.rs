//! Marker filtering, grouping and statistics.

use super::timestamps::TimestampLabel;
use crate::error::{Error, Result};
use crate::profile::Marker;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Deepest nesting of custom groups.
pub const MAX_GROUP_DEPTH: usize = 3;
/// Example markers kept per group.
pub const TOP_MARKERS: usize = 3;

/// Field names that usually make good sub-groupings.
const PREFERRED_FIELDS: &[&str] = &[
    "name",
    "kind",
    "category",
    "operation",
    "op",
    "method",
    "phase",
    "status",
    "state",
    "reason",
    "source",
    "event",
    "eventType",
    "cause",
    "target",
];

/// Filters applied in order: search, category, duration bounds, stack, limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<f64>,
    #[serde(default)]
    pub has_stack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl MarkerFilters {
    pub fn is_empty(&self) -> bool {
        *self == MarkerFilters::default()
    }

    fn matches_search(marker: &Marker, needle: &str) -> bool {
        let contains = |s: &str| s.to_lowercase().contains(needle);
        contains(&marker.name)
            || contains(marker.marker_type())
            || marker.data.as_ref().is_some_and(|data| {
                data.values()
                    .any(|v| v.as_str().is_some_and(|s| contains(s)))
            })
    }

    pub fn apply<'a>(&self, markers: Vec<(usize, &'a Marker)>) -> Vec<(usize, &'a Marker)> {
        let search = self.search.as_ref().map(|s| s.to_lowercase());
        let category = self.category.as_ref().map(|s| s.to_lowercase());
        let mut out: Vec<(usize, &Marker)> = markers
            .into_iter()
            .filter(|(_, m)| {
                search
                    .as_deref()
                    .is_none_or(|needle| Self::matches_search(m, needle))
            })
            .filter(|(_, m)| {
                category
                    .as_deref()
                    .is_none_or(|c| m.category.to_lowercase().contains(c))
            })
            .filter(|(_, m)| match self.min_duration {
                Some(min) => m.duration().is_some_and(|d| d >= min),
                None => true,
            })
            .filter(|(_, m)| match self.max_duration {
                Some(max) => m.duration().unwrap_or(0.0) <= max,
                None => true,
            })
            .filter(|(_, m)| !self.has_stack || m.stack.is_some())
            .collect();
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Statistics over the given durations; `None` when empty.
pub fn compute_duration_stats(durations: &[f64]) -> Option<DurationStats> {
    if durations.is_empty() {
        return None;
    }
    let mut sorted = durations.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let percentile = |p: f64| sorted[((n as f64 * p).floor() as usize).min(n - 1)];
    Some(DurationStats {
        min: sorted[0],
        max: sorted[n - 1],
        avg: sorted.iter().sum::<f64>() / n as f64,
        median: percentile(0.5),
        p95: percentile(0.95),
        p99: percentile(0.99),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateStats {
    pub markers_per_second: f64,
    pub min_gap: f64,
    pub avg_gap: f64,
    pub max_gap: f64,
}

/// Density and inter-marker gaps over start times; all zero below two markers.
pub fn compute_rate_stats(starts: &[f64]) -> RateStats {
    if starts.len() < 2 {
        return RateStats::default();
    }
    let mut sorted = starts.to_vec();
    sorted.sort_by(f64::total_cmp);
    let span = sorted[sorted.len() - 1] - sorted[0];
    let gaps: Vec<f64> = sorted.windows(2).map(|w| w[1] - w[0]).collect();
    RateStats {
        markers_per_second: if span > 0.0 {
            sorted.len() as f64 / span * 1000.0
        } else {
            0.0
        },
        min_gap: gaps.iter().copied().fold(f64::INFINITY, f64::min),
        avg_gap: gaps.iter().sum::<f64>() / gaps.len() as f64,
        max_gap: gaps.iter().copied().fold(0.0, f64::max),
    }
}

/// What to group markers by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GroupKey {
    Type,
    Name,
    Category,
    Field(String),
}

impl GroupKey {
    fn value_of(&self, marker: &Marker) -> String {
        match self {
            GroupKey::Type => marker.marker_type().to_string(),
            GroupKey::Name => marker.name.clone(),
            GroupKey::Category => marker.category.clone(),
            GroupKey::Field(field) => marker
                .data
                .as_ref()
                .and_then(|d| d.get(field))
                .and_then(scalar_string)
                .unwrap_or_else(|| "(no value)".to_string()),
        }
    }

    /// Parse a comma-separated list such as `type,field:eventType`.
    pub fn parse_list(list: &str) -> Result<Vec<GroupKey>> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Type => f.write_str("type"),
            GroupKey::Name => f.write_str("name"),
            GroupKey::Category => f.write_str("category"),
            GroupKey::Field(field) => write!(f, "field:{field}"),
        }
    }
}

impl FromStr for GroupKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "type" => Ok(GroupKey::Type),
            "name" => Ok(GroupKey::Name),
            "category" => Ok(GroupKey::Category),
            _ => match s.strip_prefix("field:") {
                Some(field) if !field.is_empty() => Ok(GroupKey::Field(field.to_string())),
                _ => Err(Error::InvalidArgument(format!(
                    "invalid group key '{s}' (expected type, name, category or field:<name>)"
                ))),
            },
        }
    }
}

impl TryFrom<String> for GroupKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<GroupKey> for String {
    fn from(value: GroupKey) -> Self {
        value.to_string()
    }
}

/// An example marker shown for a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerRef {
    pub handle: String,
    pub name: String,
    pub start: TimestampLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkerGroup {
    pub group_name: String,
    pub count: usize,
    pub is_interval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_stats: Option<DurationStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_stats: Option<RateStats>,
    pub top_markers: Vec<MarkerRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_group_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_groups: Option<Vec<MarkerGroup>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub category: String,
    pub count: usize,
    pub percentage: f64,
}

type Entry<'a> = (usize, &'a Marker);

/// Turns a marker into its display reference (handle plus named start time).
pub trait MarkerLabeler {
    fn label(&mut self, index: usize, marker: &Marker) -> MarkerRef;
}

impl<F> MarkerLabeler for F
where
    F: FnMut(usize, &Marker) -> MarkerRef,
{
    fn label(&mut self, index: usize, marker: &Marker) -> MarkerRef {
        self(index, marker)
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Groups in first-seen order, then sorted by count (desc) and name.
fn partition<'a>(markers: &[Entry<'a>], key: &GroupKey) -> Vec<(String, Vec<Entry<'a>>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Entry<'a>>> = HashMap::new();
    for &(index, marker) in markers {
        let value = key.value_of(marker);
        groups
            .entry(value.clone())
            .or_insert_with(|| {
                order.push(value);
                Vec::new()
            })
            .push((index, marker));
    }
    let mut out: Vec<(String, Vec<Entry<'a>>)> = order
        .into_iter()
        .filter_map(|name| groups.remove(&name).map(|members| (name, members)))
        .collect();
    out.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    out
}

fn top_markers(markers: &[Entry<'_>], labeler: &mut dyn MarkerLabeler) -> Vec<MarkerRef> {
    let mut intervals: Vec<&Entry<'_>> = markers.iter().filter(|(_, m)| m.is_interval()).collect();
    let picked: Vec<&Entry<'_>> = if intervals.is_empty() {
        let mut instants: Vec<&Entry<'_>> = markers.iter().collect();
        instants.sort_by(|a, b| a.1.start.total_cmp(&b.1.start).then(a.0.cmp(&b.0)));
        instants.into_iter().take(TOP_MARKERS).collect()
    } else {
        intervals.sort_by(|a, b| {
            let da = a.1.duration().unwrap_or(0.0);
            let db = b.1.duration().unwrap_or(0.0);
            db.total_cmp(&da).then(a.0.cmp(&b.0))
        });
        intervals.into_iter().take(TOP_MARKERS).collect()
    };
    picked
        .into_iter()
        .map(|&(index, marker)| labeler.label(index, marker))
        .collect()
}

fn summarize(name: String, markers: &[Entry<'_>], labeler: &mut dyn MarkerLabeler) -> MarkerGroup {
    let durations: Vec<f64> = markers.iter().filter_map(|(_, m)| m.duration()).collect();
    let starts: Vec<f64> = markers.iter().map(|(_, m)| m.start).collect();
    MarkerGroup {
        group_name: name,
        count: markers.len(),
        is_interval: !durations.is_empty(),
        duration_stats: compute_duration_stats(&durations),
        rate_stats: Some(compute_rate_stats(&starts)),
        top_markers: top_markers(markers, labeler),
        sub_group_key: None,
        sub_groups: None,
    }
}

/// Flat grouping by marker type, optionally with one auto-discovered
/// sub-grouping per type.
pub fn aggregate_by_type(
    markers: &[Entry<'_>],
    auto_group: bool,
    labeler: &mut dyn MarkerLabeler,
) -> Vec<MarkerGroup> {
    partition(markers, &GroupKey::Type)
        .into_iter()
        .map(|(name, members)| {
            let mut group = summarize(name, &members, labeler);
            if auto_group && let Some(field) = pick_group_field(&members) {
                let key = GroupKey::Field(field);
                group.sub_groups = Some(
                    partition(&members, &key)
                        .into_iter()
                        .map(|(sub, sub_members)| summarize(sub, &sub_members, labeler))
                        .collect(),
                );
                group.sub_group_key = Some(key.to_string());
            }
            group
        })
        .collect()
}

/// Hierarchical grouping by the given keys, at most three levels deep.
pub fn group_by_keys(
    markers: &[Entry<'_>],
    keys: &[GroupKey],
    labeler: &mut dyn MarkerLabeler,
) -> Vec<MarkerGroup> {
    fn level(
        markers: &[Entry<'_>],
        keys: &[GroupKey],
        depth: usize,
        labeler: &mut dyn MarkerLabeler,
    ) -> Vec<MarkerGroup> {
        let Some(key) = keys.first() else {
            return Vec::new();
        };
        partition(markers, key)
            .into_iter()
            .map(|(name, members)| {
                let mut group = summarize(name, &members, labeler);
                if let Some(next) = keys.get(1)
                    && depth + 1 < MAX_GROUP_DEPTH
                {
                    group.sub_group_key = Some(next.to_string());
                    group.sub_groups = Some(level(&members, &keys[1..], depth + 1, labeler));
                }
                group
            })
            .collect()
    }
    level(markers, keys, 0, labeler)
}

pub fn category_breakdown(markers: &[Entry<'_>]) -> Vec<CategoryCount> {
    let total = markers.len();
    partition(markers, &GroupKey::Category)
        .into_iter()
        .map(|(category, members)| CategoryCount {
            category,
            count: members.len(),
            percentage: if total > 0 {
                members.len() as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        })
        .collect()
}

/// Score a candidate field from its coverage, number of distinct values and name.
fn score_field(name: &str, coverage: f64, unique: usize) -> Option<f64> {
    if coverage < 0.8 || unique < 2 {
        return None;
    }
    let mut score = match unique {
        2 => 60.0,
        3..=20 => 100.0,
        21..=50 => 100.0 - (unique - 20) as f64 * 2.0,
        _ => (20.0 - (unique - 50) as f64 / 10.0).max(5.0),
    };
    if PREFERRED_FIELDS.contains(&name) {
        score += 20.0;
    }
    if coverage >= 1.0 {
        score += 10.0;
    }
    Some(score)
}

/// The scalar payload field that best splits these markers, if any.
pub fn pick_group_field(markers: &[Entry<'_>]) -> Option<String> {
    if markers.is_empty() {
        return None;
    }
    let mut fields: BTreeMap<&str, (usize, HashSet<String>)> = BTreeMap::new();
    for (_, marker) in markers {
        let Some(data) = marker.data.as_ref() else {
            continue;
        };
        for (key, value) in data {
            if key == "type" {
                continue;
            }
            if let Some(v) = scalar_string(value) {
                let entry = fields.entry(key.as_str()).or_default();
                entry.0 += 1;
                entry.1.insert(v);
            }
        }
    }

    let mut best: Option<(&str, f64)> = None;
    for (name, (present, values)) in &fields {
        let coverage = *present as f64 / markers.len() as f64;
        if let Some(score) = score_field(name, coverage, values.len())
            && best.is_none_or(|(_, s)| score > s)
        {
            best = Some((*name, score));
        }
    }
    best.map(|(name, _)| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn marker(name: &str, category: &str, start: f64, end: Option<f64>, data: Value) -> Marker {
        Marker {
            name: name.into(),
            category: category.into(),
            start,
            end,
            data: data.as_object().cloned(),
            stack: None,
        }
    }

    fn labeler() -> impl FnMut(usize, &Marker) -> MarkerRef {
        |index, marker: &Marker| MarkerRef {
            handle: format!("m-{}", index + 1),
            name: marker.name.clone(),
            start: TimestampLabel {
                name: format!("ts-{index}"),
                ms: marker.start,
            },
            duration_ms: marker.duration(),
        }
    }

    fn network_markers() -> Vec<Marker> {
        (0..10)
            .map(|i: usize| {
                let status = ["START", "DATA", "STOP"][i % 3];
                marker(
                    "Load",
                    "Network",
                    i as f64 * 10.0,
                    Some(i as f64 * 10.0 + (i + 1) as f64),
                    json!({
                        "type": "Network",
                        "status": status,
                        "URI": format!("https://example.com/{i}"),
                        "priority": i % 4,
                    }),
                )
            })
            .collect()
    }

    #[test]
    fn test_duration_stats() {
        let stats = compute_duration_stats(&[5.0, 3.0, 1.0, 4.0, 2.0]).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.avg, 3.0);
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.p95, 5.0);
        assert!(compute_duration_stats(&[]).is_none());
    }

    #[test]
    fn test_rate_stats() {
        assert_eq!(compute_rate_stats(&[5.0]), RateStats::default());
        let rate = compute_rate_stats(&[30.0, 0.0, 10.0]);
        assert_eq!(rate.min_gap, 10.0);
        assert_eq!(rate.max_gap, 20.0);
        assert_eq!(rate.avg_gap, 15.0);
        assert_eq!(rate.markers_per_second, 100.0);
    }

    #[test]
    fn test_filters_apply_in_order_with_limit_last() {
        let mut markers = network_markers();
        markers.push(marker("Paint", "Graphics", 3.0, None, json!(null)));
        let entries: Vec<Entry<'_>> = markers.iter().enumerate().collect();

        let filters = MarkerFilters {
            min_duration: Some(5.0),
            limit: Some(2),
            ..Default::default()
        };
        let out = filters.apply(entries.clone());
        assert_eq!(out.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![4, 5]);

        let filters = MarkerFilters {
            search: Some("example.com/7".into()),
            ..Default::default()
        };
        assert_eq!(filters.apply(entries.clone()).len(), 1);

        let filters = MarkerFilters {
            category: Some("graph".into()),
            ..Default::default()
        };
        assert_eq!(filters.apply(entries.clone())[0].1.name, "Paint");

        let filters = MarkerFilters {
            has_stack: true,
            ..Default::default()
        };
        assert!(filters.apply(entries).is_empty());
    }

    #[test]
    fn test_aggregate_by_type_picks_longest_examples() {
        let mut markers = network_markers();
        markers.push(marker("Paint", "Graphics", 3.0, None, json!(null)));
        markers.push(marker("Paint", "Graphics", 1.0, None, json!(null)));
        let entries: Vec<Entry<'_>> = markers.iter().enumerate().collect();
        let mut label = labeler();
        let groups = aggregate_by_type(&entries, false, &mut label);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_name, "Network");
        assert_eq!(groups[0].count, 10);
        assert!(groups[0].is_interval);
        let longest: Vec<&str> = groups[0].top_markers.iter().map(|m| m.handle.as_str()).collect();
        assert_eq!(longest, vec!["m-10", "m-9", "m-8"]);

        let paint = &groups[1];
        assert!(!paint.is_interval);
        assert!(paint.duration_stats.is_none());
        // Instant markers list the earliest first.
        assert_eq!(paint.top_markers[0].handle, "m-12");
    }

    #[test]
    fn test_auto_group_prefers_low_cardinality_named_field() {
        let markers = network_markers();
        let entries: Vec<Entry<'_>> = markers.iter().enumerate().collect();
        assert_eq!(pick_group_field(&entries).as_deref(), Some("status"));

        let mut label = labeler();
        let groups = aggregate_by_type(&entries, true, &mut label);
        let subs = groups[0].sub_groups.as_ref().unwrap();
        assert_eq!(groups[0].sub_group_key.as_deref(), Some("field:status"));
        assert_eq!(subs.len(), 3);
        assert_eq!(subs[0].group_name, "START");
        assert_eq!(subs[0].count, 4);
        // Equal counts fall back to name order.
        assert_eq!(subs[1].group_name, "DATA");
        assert_eq!(subs[2].group_name, "STOP");
    }

    #[test]
    fn test_custom_grouping_nests_three_levels() {
        let markers = network_markers();
        let entries: Vec<Entry<'_>> = markers.iter().enumerate().collect();
        let keys = GroupKey::parse_list("category,field:status,field:priority,name").unwrap();
        let mut label = labeler();
        let groups = group_by_keys(&entries, &keys, &mut label);
        assert_eq!(groups.len(), 1);
        let level2 = groups[0].sub_groups.as_ref().unwrap();
        assert_eq!(level2.len(), 3);
        let level3 = level2[0].sub_groups.as_ref().unwrap();
        assert!(!level3.is_empty());
        assert!(level3.iter().all(|g| g.sub_groups.is_none()));
    }

    #[test]
    fn test_group_key_parsing() {
        assert_eq!(
            GroupKey::parse_list("type, field:eventType").unwrap(),
            vec![GroupKey::Type, GroupKey::Field("eventType".into())]
        );
        assert!(GroupKey::parse_list("colour").is_err());
        assert!(GroupKey::parse_list("field:").is_err());
    }

    #[test]
    fn test_category_breakdown() {
        let mut markers = network_markers();
        markers.push(marker("Paint", "Graphics", 3.0, None, json!(null)));
        let entries: Vec<Entry<'_>> = markers.iter().enumerate().collect();
        let categories = category_breakdown(&entries);
        assert_eq!(categories[0].category, "Network");
        assert_eq!(categories[0].count, 10);
        assert_eq!(categories[1].count, 1);
    }
}
