//! Planned-to-actual id reconciliation
//!
//! The planner predicts clone ids as `{templateId}-{suffix}`; the cloner may assign a
//! different suffix (uniqueness retry). The map exists for one run only.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::plan::planned_id;

/// Trailing `-N` of a clone id.
static SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-(\d+)$").expect("valid suffix pattern"));

/// Outcome of resolving a planned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    /// Unregistered; the literal planned id is used as-is.
    Fallback(String),
}

impl Resolution {
    pub fn id(&self) -> &str {
        match self {
            Resolution::Resolved(id) | Resolution::Fallback(id) => id,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::Fallback(_))
    }
}

/// Run-scoped `plannedId -> actualId` map.
#[derive(Debug, Default)]
pub struct ReconciliationMap {
    entries: HashMap<String, String>,
}

impl ReconciliationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Numeric suffix from a trailing `-N`, if any.
    pub fn parse_suffix(&self, id: &str) -> Option<u32> {
        SUFFIX_RE
            .captures(id)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Suffix priority: stored metadata, trailing `-N` of the actual id, plan-forced, default.
    pub fn resolve_suffix(
        &self,
        stored: Option<u32>,
        actual_id: &str,
        forced: Option<u32>,
        default: u32,
    ) -> u32 {
        stored
            .or_else(|| self.parse_suffix(actual_id))
            .or(forced)
            .unwrap_or(default)
    }

    pub fn register(&mut self, planned: impl Into<String>, actual: impl Into<String>) {
        self.entries.insert(planned.into(), actual.into());
    }

    /// Register a clone root and every `(old, new)` pair of its subtree under `suffix`.
    pub fn register_clone(
        &mut self,
        template_id: &str,
        actual_root_id: &str,
        suffix: u32,
        id_map: &BTreeMap<String, String>,
    ) {
        self.register(planned_id(template_id, suffix), actual_root_id);
        self.register_pairs(id_map, suffix);
    }

    /// Register `(old, new)` id pairs (nodes, rules or tables) cloned under `suffix`.
    pub fn register_pairs(&mut self, pairs: &BTreeMap<String, String>, suffix: u32) {
        for (old, new) in pairs {
            self.register(planned_id(old, suffix), new.clone());
        }
    }

    pub fn resolve(&self, planned: &str) -> Option<&str> {
        self.entries.get(planned).map(String::as_str)
    }

    pub fn resolve_or_literal(&self, planned: &str) -> Resolution {
        match self.resolve(planned) {
            Some(actual) => Resolution::Resolved(actual.to_string()),
            None => Resolution::Fallback(planned.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("T1-2", Some(2))]
    #[case("node-abc-17", Some(17))]
    #[case("T1", None)]
    #[case("T1-", None)]
    #[case("T1-x", None)]
    fn given_id_when_parsing_suffix_then_trailing_number_is_extracted(
        #[case] id: &str,
        #[case] expected: Option<u32>,
    ) {
        assert_eq!(ReconciliationMap::new().parse_suffix(id), expected);
    }

    #[rstest]
    #[case(Some(4), "T1-3", Some(2), 4)]
    #[case(None, "T1-3", Some(2), 3)]
    #[case(None, "T1", Some(2), 2)]
    #[case(None, "T1", None, 1)]
    fn given_suffix_sources_when_resolving_then_priority_order_applies(
        #[case] stored: Option<u32>,
        #[case] actual: &str,
        #[case] forced: Option<u32>,
        #[case] expected: u32,
    ) {
        let map = ReconciliationMap::new();
        assert_eq!(map.resolve_suffix(stored, actual, forced, 1), expected);
    }

    #[test]
    fn given_registered_clone_when_resolving_children_then_child_suffix_ids_resolve() {
        let mut map = ReconciliationMap::new();
        let id_map: BTreeMap<String, String> = [
            ("T1".to_string(), "T1-3".to_string()),
            ("C1".to_string(), "C1-3".to_string()),
        ]
        .into_iter()
        .collect();

        map.register_clone("T1", "T1-3", 3, &id_map);

        assert_eq!(map.resolve("T1-3"), Some("T1-3"));
        assert_eq!(map.resolve("C1-3"), Some("C1-3"));
        assert_eq!(map.resolve("C1-2"), None);
    }

    #[test]
    fn given_drifted_clone_when_resolving_planned_id_then_actual_id_returned() {
        let mut map = ReconciliationMap::new();
        map.register("T1-2", "T1-5");

        assert_eq!(
            map.resolve_or_literal("T1-2"),
            Resolution::Resolved("T1-5".into())
        );
    }

    #[test]
    fn given_unregistered_id_when_resolving_then_falls_back_to_literal() {
        let map = ReconciliationMap::new();

        assert_eq!(map.resolve("ghost-1"), None);
        let resolution = map.resolve_or_literal("ghost-1");
        assert!(resolution.is_fallback());
        assert_eq!(resolution.id(), "ghost-1");
    }
}
