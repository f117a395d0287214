//! Zoom range literals: `m-12`, or `<start>,<end>` where each side is a
//! timestamp name, seconds, `<n>ms`, `<n>s` or `<n>%` of the root range.

use super::handles::{HandleKind, parse_handle};
use super::timestamps::TimestampNamer;
use crate::error::{Error, Result};
use crate::profile::CommittedRange;

#[derive(Debug, Clone, PartialEq)]
pub enum RangeBound {
    Timestamp(String),
    /// Milliseconds after the root start.
    Offset(f64),
    /// Fraction of the root duration, `0.0..=1.0` for in-range values.
    Fraction(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RangeSpec {
    Marker(String),
    Bounds(RangeBound, RangeBound),
}

fn parse_number(text: &str, whole: &str) -> Result<f64> {
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid range bound '{whole}'")))?;
    if !value.is_finite() {
        return Err(Error::InvalidArgument(format!("invalid range bound '{whole}'")));
    }
    Ok(value)
}

impl RangeBound {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.starts_with("ts-") || text.starts_with("ts<") || text.starts_with("ts>") {
            return Ok(RangeBound::Timestamp(text.to_string()));
        }
        if let Some(ms) = text.strip_suffix("ms") {
            return Ok(RangeBound::Offset(parse_number(ms, text)?));
        }
        if let Some(pct) = text.strip_suffix('%') {
            return Ok(RangeBound::Fraction(parse_number(pct, text)? / 100.0));
        }
        let seconds = text.strip_suffix('s').unwrap_or(text);
        Ok(RangeBound::Offset(parse_number(seconds, text)? * 1000.0))
    }

    /// Absolute time for this bound.
    pub fn resolve(&self, root: CommittedRange, namer: &TimestampNamer) -> Result<f64> {
        match self {
            RangeBound::Timestamp(name) => namer
                .time_for(name)
                .ok_or_else(|| Error::Query(format!("unknown timestamp name '{name}'"))),
            RangeBound::Offset(ms) => Ok(root.start + ms),
            RangeBound::Fraction(f) => Ok(root.start + root.duration() * f),
        }
    }
}

impl RangeSpec {
    /// Syntax check only; resolving needs the loaded profile.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidArgument("empty range".to_string()));
        }
        match text.split_once(',') {
            Some((start, end)) => Ok(RangeSpec::Bounds(
                RangeBound::parse(start)?,
                RangeBound::parse(end)?,
            )),
            None => {
                parse_handle(HandleKind::Marker, text).map_err(|_| {
                    Error::InvalidArgument(format!(
                        "invalid range '{text}' (expected a marker handle or <start>,<end>)"
                    ))
                })?;
                Ok(RangeSpec::Marker(text.to_string()))
            }
        }
    }
}

/// Resolve both bounds and check ordering.
pub fn resolve_bounds(
    start: &RangeBound,
    end: &RangeBound,
    root: CommittedRange,
    namer: &TimestampNamer,
) -> Result<CommittedRange> {
    let range = CommittedRange {
        start: start.resolve(root, namer)?,
        end: end.resolve(root, namer)?,
    };
    if !range.start.is_finite() || !range.end.is_finite() {
        return Err(Error::InvalidArgument(
            "range bounds must be finite times".to_string(),
        ));
    }
    if range.end <= range.start {
        return Err(Error::InvalidArgument(format!(
            "range end ({:.3}ms) must be after its start ({:.3}ms)",
            range.end, range.start
        )));
    }
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            RangeSpec::parse("10%,50%").unwrap(),
            RangeSpec::Bounds(RangeBound::Fraction(0.1), RangeBound::Fraction(0.5))
        );
        assert_eq!(
            RangeSpec::parse("1.5, 250ms").unwrap(),
            RangeSpec::Bounds(RangeBound::Offset(1500.0), RangeBound::Offset(250.0))
        );
        assert_eq!(
            RangeSpec::parse("2s,ts-a").unwrap(),
            RangeSpec::Bounds(
                RangeBound::Offset(2000.0),
                RangeBound::Timestamp("ts-a".into())
            )
        );
        assert_eq!(
            RangeSpec::parse("m-12").unwrap(),
            RangeSpec::Marker("m-12".into())
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "f-1", "abc,1", "1,", "5x,6", "inf,1"] {
            assert!(
                matches!(RangeSpec::parse(bad), Err(Error::InvalidArgument(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve() {
        let root = CommittedRange {
            start: 100.0,
            end: 300.0,
        };
        let mut namer = TimestampNamer::new(root.start, root.end);
        let name = namer.name_for(150.0);

        let range = resolve_bounds(
            &RangeBound::Fraction(0.1),
            &RangeBound::Timestamp(name),
            root,
            &namer,
        )
        .unwrap();
        assert_eq!(range, CommittedRange { start: 120.0, end: 150.0 });

        assert!(
            resolve_bounds(
                &RangeBound::Offset(50.0),
                &RangeBound::Offset(10.0),
                root,
                &namer
            )
            .is_err()
        );
        assert!(RangeBound::Timestamp("ts-Z".into()).resolve(root, &namer).is_err());
    }

    #[test]
    fn test_overflowing_bounds_are_rejected() {
        let root = CommittedRange {
            start: 0.0,
            end: 10.0,
        };
        let namer = TimestampNamer::new(root.start, root.end);
        let RangeSpec::Bounds(start, end) = RangeSpec::parse("0,1e308").unwrap() else {
            panic!("expected bounds");
        };
        assert!(matches!(
            resolve_bounds(&start, &end, root, &namer),
            Err(Error::InvalidArgument(_))
        ));
    }
}
