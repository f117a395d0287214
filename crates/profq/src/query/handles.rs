//! Compact string handles for thread sets, functions and markers.
//!
//! Thread handles are derived directly from thread indices (`t-3`) and sets
//! are sorted, comma-joined lists of them. Function and marker handles are
//! minted on first use and stay stable for the lifetime of the daemon.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::hash::Hash;

/// Kinds of handle, by prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Thread,
    Function,
    Marker,
}

impl HandleKind {
    pub fn prefix(self) -> &'static str {
        match self {
            HandleKind::Thread => "t",
            HandleKind::Function => "f",
            HandleKind::Marker => "m",
        }
    }

    fn label(self) -> &'static str {
        match self {
            HandleKind::Thread => "thread",
            HandleKind::Function => "function",
            HandleKind::Marker => "marker",
        }
    }
}

/// Parse `<prefix>-<n>` into `n`, checking the kind.
pub fn parse_handle(kind: HandleKind, handle: &str) -> Result<u32> {
    let invalid = || {
        Error::InvalidArgument(format!(
            "'{handle}' is not a {} handle (expected {}-<number>)",
            kind.label(),
            kind.prefix()
        ))
    };
    let (prefix, number) = handle.trim().split_once('-').ok_or_else(invalid)?;
    if prefix != kind.prefix() {
        return Err(invalid());
    }
    number.parse().map_err(|_| invalid())
}

/// Parse `t-1` or `t-2,t-4` into sorted, deduplicated thread indices.
pub fn parse_thread_set(handle: &str) -> Result<Vec<usize>> {
    let mut threads = handle
        .split(',')
        .map(|part| parse_handle(HandleKind::Thread, part).map(|n| n as usize))
        .collect::<Result<Vec<_>>>()?;
    threads.sort_unstable();
    threads.dedup();
    if threads.is_empty() {
        return Err(Error::InvalidArgument("empty thread handle".to_string()));
    }
    Ok(threads)
}

pub fn thread_set_handle(threads: &[usize]) -> String {
    let mut sorted = threads.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
        .iter()
        .map(|t| format!("t-{t}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Bidirectional map from keys to minted `<prefix>-<n>` handles, starting at 1.
#[derive(Debug)]
pub struct HandleMap<K> {
    kind: HandleKind,
    next: u32,
    by_key: HashMap<K, String>,
    by_handle: HashMap<String, K>,
}

impl<K: Clone + Eq + Hash> HandleMap<K> {
    pub fn new(kind: HandleKind) -> Self {
        HandleMap {
            kind,
            next: 1,
            by_key: HashMap::new(),
            by_handle: HashMap::new(),
        }
    }

    /// Existing handle for `key`, or a freshly minted one.
    pub fn handle_for(&mut self, key: K) -> String {
        if let Some(handle) = self.by_key.get(&key) {
            return handle.clone();
        }
        let handle = format!("{}-{}", self.kind.prefix(), self.next);
        self.next += 1;
        self.by_key.insert(key.clone(), handle.clone());
        self.by_handle.insert(handle.clone(), key);
        handle
    }

    pub fn lookup(&self, handle: &str) -> Result<&K> {
        parse_handle(self.kind, handle)?;
        self.by_handle
            .get(handle.trim())
            .ok_or_else(|| Error::UnknownHandle(handle.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Key for function and marker handles: the thread set plus the index inside it.
pub type ScopedIndex = (Vec<usize>, usize);

/// The three handle spaces owned by one querier.
#[derive(Debug)]
pub struct Handles {
    pub functions: HandleMap<ScopedIndex>,
    pub markers: HandleMap<ScopedIndex>,
}

impl Default for Handles {
    fn default() -> Self {
        Handles {
            functions: HandleMap::new(HandleKind::Function),
            markers: HandleMap::new(HandleKind::Marker),
        }
    }
}

impl Handles {
    pub fn function(&mut self, threads: &[usize], func: usize) -> String {
        self.functions.handle_for((threads.to_vec(), func))
    }

    pub fn marker(&mut self, threads: &[usize], marker: usize) -> String {
        self.markers.handle_for((threads.to_vec(), marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_same_handle() {
        let mut handles = Handles::default();
        let a = handles.function(&[0], 5);
        let b = handles.function(&[0], 5);
        assert_eq!(a, "f-1");
        assert_eq!(a, b);
        assert_eq!(handles.functions.len(), 1);
    }

    #[test]
    fn test_distinct_keys_distinct_handles() {
        let mut handles = Handles::default();
        let mut seen = std::collections::HashSet::new();
        for threads in [vec![0], vec![1], vec![0, 1]] {
            for index in 0..5 {
                assert!(seen.insert(handles.marker(&threads, index)));
            }
        }
        assert_eq!(seen.len(), 15);
        assert_eq!(handles.markers.lookup("m-15").unwrap(), &(vec![0, 1], 4));
    }

    #[test]
    fn test_lookup_errors() {
        let handles = Handles::default();
        assert!(matches!(
            handles.functions.lookup("f-9"),
            Err(Error::UnknownHandle(_))
        ));
        assert!(matches!(
            handles.functions.lookup("m-1"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_thread_sets() {
        assert_eq!(parse_thread_set("t-4,t-2,t-2").unwrap(), vec![2, 4]);
        assert_eq!(thread_set_handle(&[4, 2]), "t-2,t-4");
        assert!(parse_thread_set("t-x").is_err());
        assert!(parse_thread_set("f-1").is_err());
    }
}
