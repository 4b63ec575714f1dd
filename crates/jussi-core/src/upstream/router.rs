//! URN-to-upstream resolution.
//!
//! The router is built once at startup from the declarative upstream
//! configuration and is immutable afterwards: three prefix tries (URLs, TTLs,
//! timeouts) plus the per-namespace `translate_to_appbase` flags. Resolution
//! is pure lookup, so the request hot path never takes a lock here.

use std::time::Duration;

use crate::{config::UpstreamDefinition, upstream::trie::PrefixTrie, urn::Urn};

/// TTL applied when no prefix table entry matches (seconds).
pub const DEFAULT_TTL: i64 = 3;

/// Timeout applied when no prefix table entry matches (seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Accepted upstream URL schemes.
const URL_SCHEMES: &[&str] = &["http://", "https://", "ws://", "wss://"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("no upstream configured for namespace {0}")]
    NoUpstream(String),
    #[error("invalid upstream url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid upstream configuration: {0}")]
    InvalidConfig(String),
}

/// The routing decision for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUpstream {
    pub url: String,
    /// Configured TTL code; see [`crate::cache::ttl`].
    pub ttl: i64,
    /// Per-call deadline. Zero means "use the driver default".
    pub timeout: Duration,
}

/// Immutable routing table built from the upstream configuration.
#[derive(Debug)]
pub struct Router {
    urls: PrefixTrie<String>,
    ttls: PrefixTrie<i64>,
    timeouts: PrefixTrie<u64>,
    namespaces: Vec<String>,
    translate_to_appbase: ahash::AHashSet<String>,
    steemd_urls: Vec<String>,
}

impl Router {
    /// Builds the routing tables from upstream blocks in declaration order.
    ///
    /// Duplicate prefixes are last-write-wins, both within a block and across
    /// blocks.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidConfig`] when a namespace name is
    /// reserved or malformed, or when no `steemd` block with at least one URL
    /// is present; [`RouterError::InvalidUrl`] when a configured URL carries
    /// an unsupported scheme.
    pub fn from_config(upstreams: &[UpstreamDefinition]) -> Result<Self, RouterError> {
        let mut router = Self {
            urls: PrefixTrie::new(),
            ttls: PrefixTrie::new(),
            timeouts: PrefixTrie::new(),
            namespaces: Vec::new(),
            translate_to_appbase: ahash::AHashSet::new(),
            steemd_urls: Vec::new(),
        };

        for upstream in upstreams {
            let name = upstream.name.as_str();
            if name.is_empty() {
                return Err(RouterError::InvalidConfig("upstream name cannot be empty".into()));
            }
            if name.ends_with("_api") {
                return Err(RouterError::InvalidConfig(format!(
                    "invalid namespace {name}: namespaces cannot end with \"_api\""
                )));
            }
            if name == "jsonrpc" {
                return Err(RouterError::InvalidConfig(
                    "invalid namespace jsonrpc: reserved".into(),
                ));
            }

            if !router.namespaces.iter().any(|n| n == name) {
                router.namespaces.push(name.to_owned());
            }
            if upstream.translate_to_appbase {
                router.translate_to_appbase.insert(name.to_owned());
            }

            for (prefix, url) in &upstream.urls {
                check_url_scheme(url)?;
                router.urls.insert(prefix, url.clone());
                if name == "steemd" && !router.steemd_urls.iter().any(|u| u == url) {
                    router.steemd_urls.push(url.clone());
                }
            }
            for (prefix, ttl) in &upstream.ttls {
                router.ttls.insert(prefix, *ttl);
            }
            for (prefix, timeout) in &upstream.timeouts {
                router.timeouts.insert(prefix, *timeout);
            }
        }

        if router.steemd_urls.is_empty() {
            return Err(RouterError::InvalidConfig(
                "a steemd upstream with at least one url is required".into(),
            ));
        }

        Ok(router)
    }

    /// Resolves a URN to `(url, ttl, timeout)`.
    ///
    /// Lookup cascade, applied independently to each trie:
    ///
    /// 1. longest prefix of the full URN string;
    /// 2. longest prefix of the bare namespace;
    /// 3. for namespaces other than `appbase`/`steemd`, fall back to
    ///    `appbase`, then `steemd`.
    ///
    /// TTL and timeout fall back to [`DEFAULT_TTL`] and
    /// [`DEFAULT_TIMEOUT_SECS`] when nothing matches.
    ///
    /// # Errors
    ///
    /// [`RouterError::NoUpstream`] when no URL resolves;
    /// [`RouterError::InvalidUrl`] when the resolved URL has an unsupported
    /// scheme.
    pub fn resolve(&self, urn: &Urn) -> Result<ResolvedUpstream, RouterError> {
        let key = urn.cache_key();

        let url = cascade(&self.urls, &key, &urn.namespace)
            .cloned()
            .ok_or_else(|| RouterError::NoUpstream(urn.namespace.clone()))?;
        check_url_scheme(&url)?;

        let ttl = cascade(&self.ttls, &key, &urn.namespace).copied().unwrap_or(DEFAULT_TTL);
        let timeout_secs = cascade(&self.timeouts, &key, &urn.namespace)
            .copied()
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(ResolvedUpstream { url, ttl, timeout: Duration::from_secs(timeout_secs) })
    }

    /// Every URL registered under the `steemd` block, deduplicated in
    /// insertion order. Guaranteed non-empty by [`Router::from_config`].
    #[must_use]
    pub fn steemd_urls(&self) -> &[String] {
        &self.steemd_urls
    }

    /// Configured namespaces, in declaration order.
    #[must_use]
    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    #[must_use]
    pub fn should_translate_to_appbase(&self, namespace: &str) -> bool {
        self.translate_to_appbase.contains(namespace)
    }
}

fn cascade<'a, T>(trie: &'a PrefixTrie<T>, key: &str, namespace: &str) -> Option<&'a T> {
    if let Some((_, value)) = trie.longest_prefix(key) {
        return Some(value);
    }
    if let Some((_, value)) = trie.longest_prefix(namespace) {
        return Some(value);
    }
    if namespace != "appbase" && namespace != "steemd" {
        for fallback in ["appbase", "steemd"] {
            if let Some((_, value)) = trie.longest_prefix(fallback) {
                return Some(value);
            }
        }
    }
    None
}

fn check_url_scheme(url: &str) -> Result<(), RouterError> {
    if URL_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        Ok(())
    } else {
        Err(RouterError::InvalidUrl { url: url.to_owned(), reason: "unsupported scheme".into() })
    }
}
