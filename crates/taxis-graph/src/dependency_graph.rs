// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A keyed dependency graph with declarative `after`/`before` constraints.
//!
//! Entries are cheap to add; all ordering analysis happens in
//! [`DependencyGraph::sorted`], whose result is cached until a mutation
//! actually changes the constraint picture. Constraints may reference keys
//! that are never added as entries; such placeholders shape the order but
//! are omitted from the output.

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{self, Debug, Write as _};
use std::hash::Hash;

use indexmap::map::Entry;
use indexmap::IndexMap;

use crate::topological_sort::{topological_sort, NotADagError};

/// Error returned by [`DependencyGraph::sorted`] when the declared
/// constraints admit no valid order.
///
/// Recoverable: the graph itself is left intact, so the caller may `remove`
/// an offending entry and retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// Human-readable rendering of one offending key chain followed by
    /// every constraint declaration involved.
    pub trace: String,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.trace)
    }
}

impl Error for CycleError {}

/// A payload bundled with the ordering constraints declared for its key.
#[derive(Debug, Clone)]
struct DepNode<K, P> {
    payload: P,
    after: BTreeSet<K>,
    before: BTreeSet<K>,
}

/// A collection of keyed payloads, each carrying two constraint sets:
/// `after` (keys that must precede it in the output) and `before` (keys
/// that must follow it).
///
/// Ordering is deterministic for a given insertion history: entries with no
/// constraints between them come out in the order they were added.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K, P = ()> {
    nodes: IndexMap<K, DepNode<K, P>>,
    cache: Option<Vec<K>>,
}

impl<K, P> Default for DependencyGraph<K, P> {
    fn default() -> Self {
        Self {
            nodes: IndexMap::new(),
            cache: None,
        }
    }
}

impl<K, P> DependencyGraph<K, P>
where
    K: Clone + Debug + Eq + Hash + Ord,
{
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the entry for `key`, returning a mutable handle
    /// to its stored payload.
    ///
    /// The payload is always replaced. The constraint sets are compared
    /// against any existing ones: if both are unchanged the cached order
    /// (if any) stays valid, otherwise the next [`sorted`] call recomputes.
    ///
    /// `after` keys must precede this entry in the output; `before` keys
    /// must follow it. Either may name keys that are never added.
    ///
    /// [`sorted`]: DependencyGraph::sorted
    pub fn add<A, B>(&mut self, key: K, payload: P, after: A, before: B) -> &mut P
    where
        A: IntoIterator<Item = K>,
        B: IntoIterator<Item = K>,
    {
        let after: BTreeSet<K> = after.into_iter().collect();
        let before: BTreeSet<K> = before.into_iter().collect();
        match self.nodes.entry(key) {
            Entry::Occupied(entry) => {
                let node = entry.into_mut();
                if node.after != after || node.before != before {
                    node.after = after;
                    node.before = before;
                    self.cache = None;
                }
                node.payload = payload;
                &mut node.payload
            }
            Entry::Vacant(entry) => {
                // A fresh key always changes the output.
                self.cache = None;
                let node = entry.insert(DepNode {
                    payload,
                    after,
                    before,
                });
                &mut node.payload
            }
        }
    }

    /// Returns the payload stored under `key` without triggering any sort.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&P> {
        self.nodes.get(key).map(|node| &node.payload)
    }

    /// Mutable access to the payload stored under `key`.
    ///
    /// Payload edits never affect ordering, so the cache stays valid.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut P> {
        self.nodes.get_mut(key).map(|node| &mut node.payload)
    }

    /// Removes the entry for `key`, reporting whether anything was removed.
    ///
    /// Constraints held by other entries may still name the removed key; it
    /// simply reverts to a placeholder.
    pub fn remove(&mut self, key: &K) -> bool {
        if self.nodes.shift_remove(key).is_some() {
            self.cache = None;
            true
        } else {
            false
        }
    }

    /// Returns `true` if an entry was added under `key`.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    /// Number of stored entries (placeholders excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no entries were added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Entry keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.nodes.keys()
    }

    /// `(key, payload)` pairs in insertion order, without sorting.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &P)> + '_ {
        self.nodes.iter().map(|(key, node)| (key, &node.payload))
    }

    /// Returns every entry as `(key, payload)` pairs in an order satisfying
    /// all declared constraints.
    ///
    /// The computed order is cached, so repeated calls without intervening
    /// constraint changes cost a lookup. On failure the entries and any
    /// prior cache state are left untouched; offending entries can be
    /// removed and the sort retried.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] when the constraints contradict each other.
    pub fn sorted(&mut self) -> Result<Vec<(&K, &P)>, CycleError> {
        if self.cache.is_none() {
            self.cache = Some(self.compute_order()?);
        }
        let keys = self.cache.as_deref().unwrap_or(&[]);
        Ok(keys
            .iter()
            .filter_map(|key| self.nodes.get_key_value(key))
            .map(|(key, node)| (key, &node.payload))
            .collect())
    }

    /// Renders the constraint declarations, one entry per line, as
    /// `after (a, b) -> key -> before (c)`.
    ///
    /// With `full` set every entry is listed; otherwise entries without
    /// constraints are omitted. Intended for diagnostics and cycle reports.
    #[must_use]
    pub fn describe(&self, full: bool) -> String {
        let mut out = String::new();
        let mut sep = "";
        for (key, node) in &self.nodes {
            if !full && node.after.is_empty() && node.before.is_empty() {
                continue;
            }
            out.push_str(sep);
            sep = "\n";
            if !node.after.is_empty() {
                let _ = write!(out, "after {} -> ", describe_set(&node.after));
            }
            let _ = write!(out, "{key:?}");
            if !node.before.is_empty() {
                let _ = write!(out, " -> before {}", describe_set(&node.before));
            }
        }
        out
    }

    /// Runs the full analysis: dense vertex ids in first-seen order, one
    /// edge per constraint, then the topological sort. Only reads `self`;
    /// the caller commits the result to the cache on success.
    fn compute_order(&self) -> Result<Vec<K>, CycleError> {
        let mut ids: IndexMap<&K, usize> = IndexMap::new();
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (key, node) in &self.nodes {
            let this = intern(&mut ids, key);
            for other in &node.after {
                let other = intern(&mut ids, other);
                edges.push((other, this));
            }
            for other in &node.before {
                let other = intern(&mut ids, other);
                edges.push((this, other));
            }
        }

        match topological_sort(ids.len(), &edges) {
            Ok(order) => {
                let mut keys = Vec::with_capacity(self.nodes.len());
                for vertex in order {
                    if let Some((&key, _)) = ids.get_index(vertex) {
                        // Constraint-only placeholders are dropped here.
                        if self.nodes.contains_key(key) {
                            keys.push(key.clone());
                        }
                    }
                }
                Ok(keys)
            }
            Err(err) => Err(self.cycle_error(&ids, &err)),
        }
    }

    /// Maps the sorter's vertex-level report back to keys and renders the
    /// failure for humans.
    fn cycle_error(&self, ids: &IndexMap<&K, usize>, err: &NotADagError) -> CycleError {
        let mut chain = String::new();
        // Repeat the first vertex at the end to show the loop closing.
        for vertex in err.cycle.iter().chain(err.cycle.first()) {
            if let Some((key, _)) = ids.get_index(*vertex) {
                if !chain.is_empty() {
                    chain.push_str(" -> ");
                }
                let _ = write!(chain, "{key:?}");
            }
        }
        CycleError {
            trace: format!("cycle: {chain}\n{}", self.describe(false)),
        }
    }
}

/// Returns the dense vertex id for `key`, assigning the next id on first
/// sight.
fn intern<'a, K>(ids: &mut IndexMap<&'a K, usize>, key: &'a K) -> usize
where
    K: Eq + Hash,
{
    let next = ids.len();
    *ids.entry(key).or_insert(next)
}

/// Renders a constraint set as `(a, b, c)`.
fn describe_set<K: Debug>(set: &BTreeSet<K>) -> String {
    let mut out = String::from("(");
    let mut sep = "";
    for key in set {
        let _ = write!(out, "{sep}{key:?}");
        sep = ", ";
    }
    out.push(')');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted_keys(graph: &mut DependencyGraph<&'static str>) -> Vec<&'static str> {
        graph
            .sorted()
            .expect("constraints are satisfiable")
            .into_iter()
            .map(|(key, _)| *key)
            .collect()
    }

    #[test]
    fn test_empty_graph_sorts_to_nothing() {
        let mut graph: DependencyGraph<String> = DependencyGraph::new();
        assert!(graph.sorted().unwrap().is_empty());
    }

    #[test]
    fn test_unconstrained_entries_keep_insertion_order() {
        let mut graph = DependencyGraph::new();
        graph.add("lazy", (), [], []);
        graph.add("jumps", (), [], []);
        assert_eq!(sorted_keys(&mut graph), ["lazy", "jumps"]);
    }

    #[test]
    fn test_incremental_adds_follow_declared_constraints() {
        let mut graph = DependencyGraph::new();
        graph.add("lazy", (), [], []);
        graph.add("jumps", (), [], []);
        assert_eq!(sorted_keys(&mut graph), ["lazy", "jumps"]);

        // "fox" and "dog." are only referenced so far; nothing constrains
        // "The" relative to the existing entries.
        graph.add("The", (), [], ["fox", "dog."]);
        assert_eq!(sorted_keys(&mut graph), ["lazy", "jumps", "The"]);

        graph.add("fox", (), ["The"], ["jumps"]);
        assert_eq!(sorted_keys(&mut graph), ["lazy", "The", "fox", "jumps"]);
    }

    #[test]
    fn test_order_respects_after_and_before() {
        let mut graph = DependencyGraph::new();
        graph.add("physics", (), [], []);
        graph.add("render", (), ["physics"], []);
        graph.add("input", (), [], ["physics"]);
        let keys = sorted_keys(&mut graph);
        let position = |key: &str| keys.iter().position(|&k| k == key).unwrap();
        assert!(
            position("physics") < position("render"),
            "'render' declared after 'physics' but came out first: {keys:?}"
        );
        assert!(
            position("input") < position("physics"),
            "'input' declared before 'physics' but came out later: {keys:?}"
        );
    }

    #[test]
    fn test_constraint_only_keys_never_appear_in_output() {
        let mut graph = DependencyGraph::new();
        graph.add("loader", (), ["bootstrap"], []);
        assert_eq!(sorted_keys(&mut graph), ["loader"]);
        assert!(!graph.contains(&"bootstrap"));
    }

    #[test]
    fn test_same_insertion_history_sorts_identically() {
        let build = || {
            let mut graph = DependencyGraph::new();
            graph.add("d", (), ["b", "c"], []);
            graph.add("b", (), ["a"], []);
            graph.add("c", (), ["a"], []);
            graph.add("a", (), [], []);
            graph
        };
        assert_eq!(sorted_keys(&mut build()), ["a", "b", "c", "d"]);
        assert_eq!(sorted_keys(&mut build()), sorted_keys(&mut build()));
    }

    #[test]
    fn test_unchanged_re_add_keeps_cache() {
        let mut graph = DependencyGraph::new();
        graph.add("a", 1, ["b"], []);
        graph.add("b", 2, [], []);
        graph.sorted().unwrap();
        assert!(graph.cache.is_some());

        // Same constraint sets: the cached order stays valid, but the
        // payload is still replaced.
        graph.add("a", 10, ["b"], []);
        assert!(graph.cache.is_some(), "matching constraints kept the cache");
        assert_eq!(graph.get(&"a"), Some(&10));

        graph.add("a", 10, [], []);
        assert!(graph.cache.is_none(), "changed constraints drop the cache");
    }

    #[test]
    fn test_payload_is_replaced_and_editable() {
        let mut graph: DependencyGraph<&str, u32> = DependencyGraph::new();
        graph.add("counter", 1, [], []);
        *graph.add("counter", 5, [], []) += 10;
        assert_eq!(graph.get(&"counter"), Some(&15));
        if let Some(value) = graph.get_mut(&"counter") {
            *value = 99;
        }
        assert_eq!(graph.get(&"counter"), Some(&99));
    }

    #[test]
    fn test_sorted_pairs_carry_payloads() {
        let mut graph: DependencyGraph<&str, u32> = DependencyGraph::new();
        graph.add("second", 2, ["first"], []);
        graph.add("first", 1, [], []);
        let pairs: Vec<(&str, u32)> = graph
            .sorted()
            .unwrap()
            .into_iter()
            .map(|(key, payload)| (*key, *payload))
            .collect();
        assert_eq!(pairs, [("first", 1), ("second", 2)]);
    }

    #[test]
    fn test_cycle_is_detected_and_recoverable() {
        let mut graph = DependencyGraph::new();
        graph.add("a", (), [], ["b"]);
        graph.add("b", (), [], ["a"]);
        let err = graph.sorted().unwrap_err();
        assert!(
            err.trace.starts_with("cycle: "),
            "unexpected trace: {}",
            err.trace
        );
        assert!(err.trace.contains("\"a\""));
        assert!(err.trace.contains("\"b\""));

        // The entries survived the failure; dropping one side recovers.
        assert!(graph.remove(&"b"));
        assert_eq!(sorted_keys(&mut graph), ["a"]);
    }

    #[test]
    fn test_self_constraint_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add("ouroboros", (), ["ouroboros"], []);
        assert!(graph.sorted().is_err());
    }

    #[test]
    fn test_cycle_error_display_matches_trace() {
        let mut graph: DependencyGraph<String> = DependencyGraph::new();
        graph.add("x".to_string(), (), ["y".to_string()], []);
        graph.add("y".to_string(), (), ["x".to_string()], []);
        let err = graph.sorted().unwrap_err();
        assert_eq!(err.to_string(), err.trace);
    }

    #[test]
    fn test_describe_renders_constraints() {
        let mut graph = DependencyGraph::new();
        graph.add("solo", (), [], []);
        graph.add("mid", (), ["low"], ["high"]);
        assert_eq!(
            graph.describe(false),
            "after (\"low\") -> \"mid\" -> before (\"high\")"
        );
        assert_eq!(
            graph.describe(true),
            "\"solo\"\nafter (\"low\") -> \"mid\" -> before (\"high\")"
        );
    }

    #[test]
    fn test_remove_reports_whether_anything_was_removed() {
        let mut graph = DependencyGraph::new();
        graph.add("only", (), [], []);
        graph.sorted().unwrap();
        assert!(!graph.remove(&"ghost"));
        assert!(graph.cache.is_some(), "removing nothing keeps the cache");
        assert!(graph.remove(&"only"));
        assert!(graph.cache.is_none(), "removal invalidates the cache");
        assert!(graph.is_empty());
    }

    #[test]
    fn test_iteration_follows_insertion_order() {
        let mut graph: DependencyGraph<&str, char> = DependencyGraph::new();
        graph.add("z", 'z', [], []);
        graph.add("a", 'a', [], []);
        let keys: Vec<&str> = graph.keys().copied().collect();
        assert_eq!(keys, ["z", "a"]);
        let pairs: Vec<(&str, char)> = graph.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(pairs, [("z", 'z'), ("a", 'a')]);
        assert_eq!(graph.len(), 2);
    }
}
