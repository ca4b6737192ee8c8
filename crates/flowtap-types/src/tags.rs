//! Key/value tags attached to every exchange for downstream correlation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An ordered, deduplicated set of `key=value` tags.
///
/// Tags are stored in a `BTreeMap` so serialized output (and test
/// assertions) are stable regardless of the order flags were parsed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceTags(BTreeMap<String, String>);

impl TraceTags {
    /// An empty tag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `--tag key=value` command-line arguments. A value containing
    /// `=` keeps everything after the first `=` as part of the value.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry has no `=` separator.
    pub fn parse_cli_args(args: &[String]) -> Result<Self, String> {
        let mut tags = BTreeMap::new();
        for arg in args {
            let (key, value) = arg
                .split_once('=')
                .ok_or_else(|| format!("tag '{arg}' is not in key=value form"))?;
            if key.is_empty() {
                return Err(format!("tag '{arg}' has an empty key"));
            }
            tags.insert(key.to_string(), value.to_string());
        }
        Ok(Self(tags))
    }

    /// Merges `other` into `self`, with `other` winning on key collisions.
    #[must_use]
    pub fn merge(mut self, other: &Self) -> Self {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
        self
    }

    /// Returns a copy with standard environment-derived defaults applied
    /// (currently just `host`), without overriding any tag the caller
    /// already set explicitly.
    #[must_use]
    pub fn with_environment_defaults(mut self) -> Self {
        if !self.0.contains_key("host") {
            if let Ok(hostname) = std::env::var("HOSTNAME") {
                self.0.insert("host".to_string(), hostname);
            }
        }
        self
    }

    /// Iterates tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True if no tags are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_pairs() {
        let tags =
            TraceTags::parse_cli_args(&["env=prod".to_string(), "team=ingest".to_string()])
                .unwrap();
        assert_eq!(tags.iter().count(), 2);
    }

    #[test]
    fn value_may_contain_equals_signs() {
        let tags = TraceTags::parse_cli_args(&["filter=a=b".to_string()]).unwrap();
        assert_eq!(tags.iter().next(), Some(("filter", "a=b")));
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(TraceTags::parse_cli_args(&["bogus".to_string()]).is_err());
    }

    #[test]
    fn merge_prefers_other() {
        let base = TraceTags::parse_cli_args(&["env=dev".to_string()]).unwrap();
        let overlay = TraceTags::parse_cli_args(&["env=prod".to_string()]).unwrap();
        let merged = base.merge(&overlay);
        assert_eq!(merged.iter().next(), Some(("env", "prod")));
    }
}
