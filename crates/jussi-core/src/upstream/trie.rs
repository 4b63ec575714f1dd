//! Dot-segmented prefix trie used by the routing tables.
//!
//! Keys are split on `.`; empty segments are skipped, so `"a..b"` and
//! `"a.b"` address the same node. Lookup walks children greedily and returns
//! the deepest ancestor that carries a value, which is exactly the
//! longest-prefix-match the router needs for URL / TTL / timeout resolution.

use ahash::AHashMap;

#[derive(Debug)]
struct Node<T> {
    children: AHashMap<String, Node<T>>,
    value: Option<T>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self { children: AHashMap::new(), value: None }
    }
}

/// A prefix trie keyed by dot-separated segments.
///
/// Built once at startup and read-only afterwards; lookups are O(depth) and
/// lock-free.
#[derive(Debug)]
pub struct PrefixTrie<T> {
    root: Node<T>,
    len: usize,
}

impl<T> Default for PrefixTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PrefixTrie<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { root: Node::new(), len: 0 }
    }

    /// Number of keys carrying a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a value at `key`, overwriting any existing value there.
    pub fn insert(&mut self, key: &str, value: T) {
        let mut node = &mut self.root;
        for segment in segments(key) {
            node = node.children.entry(segment.to_owned()).or_insert_with(Node::new);
        }
        if node.value.replace(value).is_none() {
            self.len += 1;
        }
    }

    /// Finds the deepest prefix of `key` that carries a value.
    ///
    /// Returns the matched prefix (re-joined with `.`) and a reference to its
    /// value, or `None` when no prefix of `key` is present.
    #[must_use]
    pub fn longest_prefix(&self, key: &str) -> Option<(String, &T)> {
        let mut node = &self.root;
        let mut walked: Vec<&str> = Vec::new();
        let mut best: Option<(usize, &T)> = None;

        for segment in segments(key) {
            match node.children.get(segment) {
                Some(child) => {
                    node = child;
                    walked.push(segment);
                    if let Some(value) = &node.value {
                        best = Some((walked.len(), value));
                    }
                }
                None => break,
            }
        }

        best.map(|(depth, value)| (walked[..depth].join("."), value))
    }

    /// Looks up an exact key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        let mut node = &self.root;
        for segment in segments(key) {
            node = node.children.get(segment)?;
        }
        node.value.as_ref()
    }
}

fn segments(key: &str) -> impl Iterator<Item = &str> {
    key.split('.').filter(|s| !s.is_empty())
}
