//! Node eligibility for a WorkItem fan-out.

use prune_core::config::{FilterKind, NodeFilter};
use prune_core::Node;

/// Label selector: `key` matches when the label is present, `key=value`
/// when it is present with that value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Selector {
    Exists(String),
    Equals(String, String),
}

impl Selector {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.split_once('=') {
            Some((key, value)) => Some(Selector::Equals(
                key.trim().to_string(),
                value.trim().to_string(),
            )),
            None => Some(Selector::Exists(raw.to_string())),
        }
    }

    fn matches(&self, node: &Node) -> bool {
        match self {
            Selector::Exists(key) => node.labels.contains_key(key),
            Selector::Equals(key, value) => node.labels.get(key) == Some(value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeFilterPolicy {
    kind: FilterKind,
    selectors: Vec<Selector>,
}

impl NodeFilterPolicy {
    pub fn new(filter: &NodeFilter) -> Self {
        Self {
            kind: filter.kind,
            selectors: filter
                .selectors
                .iter()
                .filter_map(|s| Selector::parse(s))
                .collect(),
        }
    }

    pub fn is_eligible(&self, node: &Node) -> bool {
        let matched = self.selectors.iter().any(|s| s.matches(node));
        match self.kind {
            FilterKind::Exclude => !matched,
            FilterKind::Include => matched,
        }
    }

    /// Split nodes into (eligible, skipped)
    pub fn partition(&self, nodes: Vec<Node>) -> (Vec<Node>, Vec<Node>) {
        nodes.into_iter().partition(|n| self.is_eligible(n))
    }
}

impl Default for NodeFilterPolicy {
    fn default() -> Self {
        Self::new(&NodeFilter::default())
    }
}
