//! Deletion records and the per-segment journal that stores them.

pub mod journal;

pub use journal::TombstoneJournal;

use crate::codec::{put_string, PayloadReader};
use crate::error::Result;
use crate::segment::{TimeRange, Timestamp, Version};
use std::fmt;

/// Dot separated series path pattern.
///
/// `*` matches exactly one node, `**` matches one or more nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    raw: String,
    nodes: Vec<String>,
}

impl PathPattern {
    /// Parses a pattern such as `root.sg.*.s1` or `root.**`.
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let nodes = raw.split('.').map(str::to_string).collect();
        Self { raw, nodes }
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the pattern has no wildcard.
    pub fn is_concrete(&self) -> bool {
        self.nodes.iter().all(|n| n != "*" && n != "**")
    }

    /// Returns true if the concrete series `path` is selected.
    pub fn matches(&self, path: &str) -> bool {
        let path: Vec<&str> = path.split('.').collect();
        match_nodes(&self.nodes, &path)
    }

    /// Returns true if some path starting with the nodes of `prefix` could be selected.
    pub fn may_match_prefix(&self, prefix: &str) -> bool {
        let prefix: Vec<&str> = prefix.split('.').collect();
        match_prefix(&self.nodes, &prefix)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for PathPattern {
    fn from(value: &str) -> Self {
        PathPattern::new(value)
    }
}

impl From<String> for PathPattern {
    fn from(value: String) -> Self {
        PathPattern::new(value)
    }
}

fn match_nodes(pattern: &[String], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((head, rest)) if head == "**" => {
            (1..=path.len()).any(|taken| match_nodes(rest, &path[taken..]))
        }
        Some((head, rest)) => match path.split_first() {
            Some((node, path_rest)) if head == "*" || head == node => {
                match_nodes(rest, path_rest)
            }
            _ => false,
        },
    }
}

fn match_prefix(pattern: &[String], prefix: &[&str]) -> bool {
    if prefix.is_empty() {
        return true;
    }
    match pattern.split_first() {
        None => false,
        Some((head, _)) if head == "**" => true,
        Some((head, rest)) => {
            (head == "*" || head == prefix[0]) && match_prefix(rest, &prefix[1..])
        }
    }
}

/// One deletion over a path pattern and a closed time range.
///
/// Issued at `version`, it removes matching points from segments sealed at a version
/// less than or equal to it. Later segments are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tombstone {
    /// Selected series.
    pub pattern: PathPattern,
    /// Deleted timestamps.
    pub range: TimeRange,
    /// Segment state version at issue time.
    pub version: Version,
}

impl Tombstone {
    /// Creates a tombstone.
    pub fn new(pattern: impl Into<PathPattern>, range: TimeRange, version: Version) -> Self {
        Self {
            pattern: pattern.into(),
            range,
            version,
        }
    }

    /// Returns true if this tombstone removes the point `ts` of a segment sealed at
    /// `segment_version`. The caller checks the path.
    pub fn deletes(&self, ts: Timestamp, segment_version: Version) -> bool {
        self.version >= segment_version && self.range.contains(ts)
    }

    /// Fails for patterns longer than the u16 length prefix allows.
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(26 + self.pattern.as_str().len());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.range.start.to_le_bytes());
        out.extend_from_slice(&self.range.end.to_le_bytes());
        put_string(&mut out, self.pattern.as_str())?;
        Ok(out)
    }

    pub(crate) fn decode(payload: &[u8]) -> Option<Self> {
        let mut reader = PayloadReader::new(payload);
        let version = reader.u64()?;
        let start = reader.i64()?;
        let end = reader.i64()?;
        let pattern = reader.string()?;
        if !reader.is_empty() {
            return None;
        }
        Some(Self::new(PathPattern::new(pattern), TimeRange::new(start, end), version))
    }
}

/// Returns true if any tombstone in `tombstones` removes `ts` from a segment sealed at
/// `segment_version`. Every tombstone must already apply to the series being read.
pub fn is_deleted(tombstones: &[Tombstone], ts: Timestamp, segment_version: Version) -> bool {
    tombstones.iter().any(|t| t.deletes(ts, segment_version))
}
