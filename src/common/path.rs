//! Series paths and path patterns
//!
//! Paths are dot-separated node lists rooted at `root`, e.g. `root.sg1.d1.s1`.
//! Patterns may use `*` (exactly one node) and `**` (one or more nodes).

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const ROOT: &str = "root";
pub const ONE_LEVEL_WILDCARD: &str = "*";
pub const MULTI_LEVEL_WILDCARD: &str = "**";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartialPath {
    nodes: Vec<String>,
}

impl PartialPath {
    /// Parse a path or pattern.
    pub fn parse(s: &str) -> Result<Self> {
        let nodes: Vec<String> = s.trim().split('.').map(str::to_string).collect();
        if nodes.first().map(String::as_str) != Some(ROOT) {
            return Err(Error::InvalidPlan(format!(
                "path must start with '{}': {}",
                ROOT, s
            )));
        }
        for node in &nodes {
            if node.is_empty() || node.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(Error::InvalidPlan(format!("illegal path node in {}", s)));
            }
            if node.contains('*') && node != ONE_LEVEL_WILDCARD && node != MULTI_LEVEL_WILDCARD {
                return Err(Error::InvalidPlan(format!(
                    "partial wildcards are not supported: {}",
                    s
                )));
            }
        }
        Ok(Self { nodes })
    }

    /// Parse a concrete path; wildcards are rejected.
    pub fn parse_concrete(s: &str) -> Result<Self> {
        let path = Self::parse(s)?;
        if path.has_wildcard() {
            return Err(Error::InvalidPlan(format!(
                "wildcards not allowed here: {}",
                s
            )));
        }
        Ok(path)
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn has_wildcard(&self) -> bool {
        self.nodes
            .iter()
            .any(|n| n == ONE_LEVEL_WILDCARD || n == MULTI_LEVEL_WILDCARD)
    }

    /// `self` is equal to `other` or one of its ancestors (node-wise).
    pub fn is_prefix_of(&self, other: &PartialPath) -> bool {
        self.nodes.len() <= other.nodes.len() && other.nodes[..self.nodes.len()] == self.nodes[..]
    }

    /// True when some path equal to or below `prefix` matches this pattern.
    pub fn overlaps_subtree(&self, prefix: &PartialPath) -> bool {
        overlaps(&self.nodes, &prefix.nodes)
    }

    /// True when this pattern matches `path` exactly.
    pub fn matches(&self, path: &PartialPath) -> bool {
        matches_full(&self.nodes, &path.nodes)
    }

    /// True when this pattern matches `path` or one of its ancestors, i.e. a
    /// privilege granted on this pattern extends to `path`.
    pub fn covers(&self, path: &PartialPath) -> bool {
        let accept = self.nodes.len();
        let mut states = initial_states(&self.nodes);
        for node in &path.nodes {
            states = advance(&self.nodes, &states, node);
            if states[accept] {
                return true;
            }
            if !states.contains(&true) {
                return false;
            }
        }
        false
    }
}

// Pattern matching runs the pattern as an NFA over the path: `states[i]` is
// true when the first `i` pattern nodes can consume the nodes seen so far.
// Every check is a single pass, O(|pattern| * |path|).

fn initial_states(pattern: &[String]) -> Vec<bool> {
    let mut states = vec![false; pattern.len() + 1];
    states[0] = true;
    states
}

fn advance(pattern: &[String], states: &[bool], node: &str) -> Vec<bool> {
    let mut next = vec![false; pattern.len() + 1];
    for (i, p) in pattern.iter().enumerate() {
        if !states[i] {
            continue;
        }
        if p == MULTI_LEVEL_WILDCARD {
            // `**` takes one node and may keep going
            next[i] = true;
            next[i + 1] = true;
        } else if p == ONE_LEVEL_WILDCARD || p == node {
            next[i + 1] = true;
        }
    }
    next
}

// Any live state after the prefix can still be completed by some extension.
fn overlaps(pattern: &[String], prefix: &[String]) -> bool {
    let mut states = initial_states(pattern);
    for node in prefix {
        states = advance(pattern, &states, node);
        if !states.contains(&true) {
            return false;
        }
    }
    true
}

fn matches_full(pattern: &[String], path: &[String]) -> bool {
    let mut states = initial_states(pattern);
    for node in path {
        states = advance(pattern, &states, node);
    }
    states[pattern.len()]
}

impl fmt::Display for PartialPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nodes.join("."))
    }
}

impl TryFrom<String> for PartialPath {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<PartialPath> for String {
    fn from(p: PartialPath) -> Self {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PartialPath {
        PartialPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse() {
        assert_eq!(p("root.sg1.d1").len(), 3);
        assert!(PartialPath::parse("sg1.d1").is_err());
        assert!(PartialPath::parse("root..d1").is_err());
        assert!(PartialPath::parse("root.d*").is_err());
        assert!(PartialPath::parse_concrete("root.sg.*").is_err());
    }

    #[test]
    fn test_overlaps_subtree() {
        let sg = p("root.sg1");
        assert!(p("root.sg1.*").overlaps_subtree(&sg));
        assert!(p("root.sg1").overlaps_subtree(&sg));
        assert!(p("root.**").overlaps_subtree(&sg));
        assert!(p("root.*.d1.s1").overlaps_subtree(&sg));
        assert!(!p("root.sg2.*").overlaps_subtree(&sg));
        assert!(!p("root").overlaps_subtree(&sg));
        assert!(p("root.**.s1").overlaps_subtree(&p("root.a.b.c")));
    }

    #[test]
    fn test_matches_and_covers() {
        assert!(p("root.**").matches(&p("root.a.b")));
        assert!(!p("root.*").matches(&p("root.a.b")));
        assert!(p("root.*.b").matches(&p("root.a.b")));
        assert!(p("root.sg").covers(&p("root.sg.d1.s1")));
        assert!(!p("root.sg.d2").covers(&p("root.sg.d1.s1")));
        assert!(p("root.sg").is_prefix_of(&p("root.sg.d1")));
        assert!(!p("root.sg.d1").is_prefix_of(&p("root.sg")));
    }

    #[test]
    fn test_many_multi_level_wildcards() {
        let pattern = format!("root{}.zzz", ".**".repeat(12));
        let pattern = p(&pattern);
        let nodes: Vec<String> = (0..30).map(|i| format!("n{}", i)).collect();
        let miss = p(&format!("root.{}", nodes.join(".")));
        let hit = p(&format!("root.{}.zzz.s1", nodes.join(".")));

        let start = std::time::Instant::now();
        assert!(!pattern.covers(&miss));
        assert!(!pattern.matches(&miss));
        assert!(pattern.overlaps_subtree(&miss));
        assert!(pattern.covers(&hit));
        assert!(!pattern.matches(&hit));
        assert!(start.elapsed() < std::time::Duration::from_secs(1));

        // Twelve `**` need at least twelve nodes before `zzz`
        assert!(!pattern.covers(&p("root.a.b.zzz")));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&p("root.sg1.d1")).unwrap();
        assert_eq!(json, "\"root.sg1.d1\"");
        let back: PartialPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p("root.sg1.d1"));
        assert!(serde_json::from_str::<PartialPath>("\"nope\"").is_err());
    }
}
