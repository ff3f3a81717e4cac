//! Request metadata carried alongside every call, stream, and publication.
//!
//! Keys are stored as given; lookups fall back to a case-insensitive match so
//! `authorization` and `Authorization` resolve to the same header.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Prefix for headers reserved by the framework.
pub const HEADER_PREFIX: &str = "Plexus-";

/// Name of the calling service, injected on every outbound call.
pub const FROM_SERVICE: &str = "Plexus-From-Service";

/// Auth namespace of the caller.
pub const NAMESPACE: &str = "Plexus-Namespace";

/// Bearer token header.
pub const AUTHORIZATION: &str = "Authorization";

/// Scheme prefix for `Authorization` values.
pub const BEARER_SCHEME: &str = "Bearer ";

/// Trace identifier propagated between services.
pub const TRACE_ID: &str = "Plexus-Trace-Id";

/// Identifier of the span that issued the call.
pub const SPAN_ID: &str = "Plexus-Span-Id";

/// Target service of a transport message.
pub const SERVICE: &str = "Plexus-Service";

/// Target endpoint of a transport message.
pub const ENDPOINT: &str = "Plexus-Endpoint";

/// Topic of a broker message.
pub const TOPIC: &str = "Plexus-Topic";

/// Body encoding.
pub const CONTENT_TYPE: &str = "Content-Type";

/// String header map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Creates empty metadata.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a header, trying the exact key first and then a
    /// case-insensitive match.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        if let Some(v) = self.0.get(key) {
            return Some(v.as_str());
        }
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if the header is present under any casing.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets a header, replacing any existing value under any casing.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.0.retain(|k, _| !k.eq_ignore_ascii_case(&key));
        self.0.insert(key, value.into());
    }

    /// Removes a header under any casing.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let found = self
            .0
            .keys()
            .find(|k| k.eq_ignore_ascii_case(key))
            .cloned()?;
        self.0.remove(&found)
    }

    /// Merges `patch` into `self`.
    ///
    /// With `overwrite == false` keys already present are left untouched.
    pub fn merge(&mut self, patch: &Metadata, overwrite: bool) {
        for (k, v) in &patch.0 {
            if overwrite || !self.contains(k) {
                self.set(k.clone(), v.clone());
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut md = Metadata::new();
        for (k, v) in iter {
            md.set(k, v);
        }
        md
    }
}

impl From<BTreeMap<String, String>> for Metadata {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<Metadata> for BTreeMap<String, String> {
    fn from(md: Metadata) -> Self {
        md.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_is_case_insensitive() {
        let md: Metadata = [("Authorization", "Bearer abc")].into_iter().collect();
        assert_eq!(md.get("authorization"), Some("Bearer abc"));
        assert_eq!(md.get("AUTHORIZATION"), Some("Bearer abc"));
        assert!(md.get("missing").is_none());
    }

    #[test]
    fn set_replaces_other_casing() {
        let mut md = Metadata::new();
        md.set("plexus-from-service", "a");
        md.set(FROM_SERVICE, "b");
        assert_eq!(md.len(), 1);
        assert_eq!(md.get(FROM_SERVICE), Some("b"));
    }

    #[test]
    fn merge_without_overwrite_keeps_existing_keys() {
        let mut md: Metadata = [(FROM_SERVICE, "caller")].into_iter().collect();
        let patch: Metadata = [(FROM_SERVICE, "injected"), (NAMESPACE, "prod")]
            .into_iter()
            .collect();

        md.merge(&patch, false);

        assert_eq!(md.get(FROM_SERVICE), Some("caller"));
        assert_eq!(md.get(NAMESPACE), Some("prod"));
    }

    #[test]
    fn merge_with_overwrite_replaces_keys() {
        let mut md: Metadata = [(FROM_SERVICE, "caller")].into_iter().collect();
        let patch: Metadata = [(FROM_SERVICE, "forced")].into_iter().collect();

        md.merge(&patch, true);

        assert_eq!(md.get(FROM_SERVICE), Some("forced"));
    }

    #[test]
    fn remove_ignores_case() {
        let mut md: Metadata = [("X-Custom", "1")].into_iter().collect();
        assert_eq!(md.remove("x-custom").as_deref(), Some("1"));
        assert!(md.is_empty());
    }
}
