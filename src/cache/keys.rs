//! Cache key derivation and invalidation pattern resolution.
//!
//! Keys have the shape `api:<path>[:k1=v1&k2=v2]`. Query parameters are
//! sorted so that two requests differing only in parameter order share an
//! entry. Both the path and the query are percent-decoded, matching the
//! route parameter values used to resolve invalidation patterns.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use axum::{extract::Query, http::Uri};

/// Prefix shared by every key produced by this crate.
pub const KEY_PREFIX: &str = "api";

/// Identity of a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Derive the default key for a request URI.
pub fn default_key(uri: &Uri, excluded: &BTreeSet<String>) -> CacheKey {
    scoped_key(uri, excluded, None)
}

/// Derive a key, optionally namespaced under a principal scope
/// (`api:user:<scope>:<path>...`).
pub fn scoped_key(uri: &Uri, excluded: &BTreeSet<String>, scope: Option<&str>) -> CacheKey {
    let mut key = String::from(KEY_PREFIX);
    if let Some(scope) = scope {
        key.push_str(":user:");
        key.push_str(scope);
    }
    key.push(':');
    key.push_str(&decoded_path(uri));

    let query = canonical_query(uri, excluded);
    if !query.is_empty() {
        key.push(':');
        key.push_str(&query);
    }

    CacheKey(key)
}

/// Percent-decoded request path; invalid UTF-8 keeps the raw form.
pub fn decoded_path(uri: &Uri) -> Cow<'_, str> {
    urlencoding::decode(uri.path()).unwrap_or(Cow::Borrowed(uri.path()))
}

/// Render the non-excluded query pairs of `uri` sorted by name, then value.
pub fn canonical_query(uri: &Uri, excluded: &BTreeSet<String>) -> String {
    let mut pairs: Vec<(String, String)> = query_pairs(uri)
        .into_iter()
        .filter(|(name, _)| !excluded.contains(name))
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn query_pairs(uri: &Uri) -> Vec<(String, String)> {
    if uri.query().is_none_or(str::is_empty) {
        return Vec::new();
    }

    match Query::<Vec<(String, String)>>::try_from_uri(uri) {
        Ok(Query(pairs)) => pairs,
        // Undecodable input still has to produce a stable key.
        Err(_) => uri
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect(),
    }
}

/// Substitute `:name` placeholders with route parameter values.
///
/// A placeholder starts a path segment (`/:userId`). Placeholders without a
/// matching parameter are kept verbatim.
pub fn resolve_pattern(pattern: &str, params: &HashMap<String, String>) -> String {
    let mut resolved = String::with_capacity(pattern.len());
    let mut cursor = 0;

    for (start, name) in placeholder_spans(pattern) {
        resolved.push_str(&pattern[cursor..start]);
        match params.get(name) {
            Some(value) => resolved.push_str(value),
            None => {
                resolved.push(':');
                resolved.push_str(name);
            }
        }
        cursor = start + 1 + name.len();
    }

    resolved.push_str(&pattern[cursor..]);
    resolved
}

/// Names referenced by `:name` placeholders, in order of appearance.
pub fn placeholders(pattern: &str) -> Vec<&str> {
    placeholder_spans(pattern)
        .into_iter()
        .map(|(_, name)| name)
        .collect()
}

fn placeholder_spans(pattern: &str) -> Vec<(usize, &str)> {
    let bytes = pattern.as_bytes();
    let mut spans = Vec::new();

    for (index, byte) in bytes.iter().enumerate() {
        if *byte != b':' || index == 0 || bytes[index - 1] != b'/' {
            continue;
        }
        let name_len = bytes[index + 1..]
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
            .count();
        if name_len > 0 {
            spans.push((index, &pattern[index + 1..index + 1 + name_len]));
        }
    }

    spans
}

/// Expand a resolved pattern into the globs handed to the store.
///
/// A trailing `/*` also covers the subtree root, both bare and with a query
/// suffix, so `api:/users/1/*` clears the cached `GET /users/1` as well.
pub fn expand_subtree(pattern: &str) -> Vec<String> {
    match pattern.strip_suffix("/*") {
        Some(root) if !root.is_empty() => vec![
            pattern.to_string(),
            root.to_string(),
            format!("{root}:*"),
        ],
        _ => vec![pattern.to_string()],
    }
}
