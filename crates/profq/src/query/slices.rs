//! Busy-period detection over a per-sample CPU ratio series.

/// Default thresholds, ascending.
pub const DEFAULT_THRESHOLDS: [f64; 5] = [0.05, 0.2, 0.4, 0.6, 0.8];

/// Number of slices kept for display.
pub const MAX_SLICES: usize = 20;

/// Samples on each side of a point that contribute to its windowed average.
const WINDOW_RADIUS: usize = 2;

/// A contiguous run of samples `[start, end)` whose smoothed CPU ratio stays
/// at or above `threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub start: usize,
    pub end: usize,
    pub threshold: f64,
    /// Mean raw ratio over the slice.
    pub avg: f64,
    /// CPU time contributed by the slice (ratio times sample duration).
    pub sum: f64,
    pub children: Vec<Slice>,
}

impl Slice {
    fn count(&self) -> usize {
        1 + self.children.iter().map(Slice::count).sum::<usize>()
    }
}

struct Series<'a> {
    ratios: &'a [f64],
    durations: &'a [f64],
    smoothed: Vec<f64>,
}

impl<'a> Series<'a> {
    fn new(ratios: &'a [f64], durations: &'a [f64]) -> Self {
        let mut prefix = Vec::with_capacity(ratios.len() + 1);
        prefix.push(0.0);
        for r in ratios {
            prefix.push(prefix.last().copied().unwrap_or(0.0) + r);
        }
        let smoothed = (0..ratios.len())
            .map(|i| {
                let lo = i.saturating_sub(WINDOW_RADIUS);
                let hi = (i + WINDOW_RADIUS + 1).min(ratios.len());
                (prefix[hi] - prefix[lo]) / (hi - lo) as f64
            })
            .collect();
        Series {
            ratios,
            durations,
            smoothed,
        }
    }

    fn make_slice(&self, start: usize, end: usize, threshold: f64) -> Slice {
        let avg = self.ratios[start..end].iter().sum::<f64>() / (end - start) as f64;
        let sum = (start..end)
            .map(|i| self.ratios[i] * self.durations.get(i).copied().unwrap_or(0.0))
            .sum();
        Slice {
            start,
            end,
            threshold,
            avg,
            sum,
            children: Vec::new(),
        }
    }

    /// Maximal runs inside `[start, end)` with smoothed ratio >= threshold.
    fn runs(&self, start: usize, end: usize, threshold: f64) -> Vec<(usize, usize)> {
        let mut runs = Vec::new();
        let mut run_start = None;
        for i in start..end {
            match (self.smoothed[i] >= threshold, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(s)) => {
                    runs.push((s, i));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = run_start {
            runs.push((s, end));
        }
        runs
    }

    fn extract(&self, start: usize, end: usize, threshold: f64, thresholds: &[f64]) -> Vec<Slice> {
        self.runs(start, end, threshold)
            .into_iter()
            .map(|(s, e)| {
                let mut slice = self.make_slice(s, e, threshold);
                // Runs come from the smoothed series, so the raw average may sit
                // below `threshold`; only ever descend to a stricter threshold.
                let floor = slice.avg.max(threshold);
                if let Some(&next) = thresholds.iter().find(|&&t| t > floor) {
                    slice.children = self
                        .extract(s, e, next, thresholds)
                        .into_iter()
                        .filter(|child| (child.start, child.end) != (s, e))
                        .collect();
                }
                slice
            })
            .collect()
    }
}

/// Build the busy-period tree. `durations[i]` is the wall time covered by
/// sample `i`.
pub fn extract_slices(ratios: &[f64], durations: &[f64], thresholds: &[f64]) -> Vec<Slice> {
    let Some(&first) = thresholds.first() else {
        return Vec::new();
    };
    if ratios.is_empty() {
        return Vec::new();
    }
    let series = Series::new(ratios, durations);
    series.extract(0, ratios.len(), first, thresholds)
}

/// Keep the `limit` slices with the largest `sum`, re-parenting each kept
/// slice under its nearest kept ancestor.
pub fn prune_slices(slices: Vec<Slice>, limit: usize) -> Vec<Slice> {
    if limit == 0 {
        return Vec::new();
    }
    let total: usize = slices.iter().map(Slice::count).sum();
    if total <= limit {
        return slices;
    }

    let mut sums = Vec::with_capacity(total);
    fn collect(slices: &[Slice], out: &mut Vec<f64>) {
        for s in slices {
            out.push(s.sum);
            collect(&s.children, out);
        }
    }
    collect(&slices, &mut sums);
    let mut sorted = sums.clone();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let cutoff = sorted[limit - 1];

    // Ties at the cutoff are admitted in tree order until the limit is hit.
    let mut budget = limit;
    let mut above = sums.iter().filter(|&&s| s > cutoff).count();
    fn keep(slices: Vec<Slice>, cutoff: f64, budget: &mut usize, above: &mut usize) -> Vec<Slice> {
        let mut kept = Vec::new();
        for mut slice in slices {
            let children = std::mem::take(&mut slice.children);
            let admit = if slice.sum > cutoff {
                *above -= 1;
                true
            } else {
                slice.sum == cutoff && *budget > *above
            };
            if admit {
                *budget -= 1;
                slice.children = keep(children, cutoff, budget, above);
                kept.push(slice);
            } else {
                kept.extend(keep(children, cutoff, budget, above));
            }
        }
        kept
    }
    keep(slices, cutoff, &mut budget, &mut above)
}
