//! The capture configuration assembled by the CLI and consumed by the
//! supervisor to build one pipeline per interface.

use crate::error::{Error, Result};
use crate::tags::TraceTags;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_gap_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_body_cap_bytes() -> usize {
    1024 * 1024
}

/// Where captured exchanges ultimately go.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SinkConfig {
    /// Write newline-delimited HAR-shaped JSON per interface under this
    /// directory.
    LocalArchive {
        /// Output directory. Created if missing.
        directory: PathBuf,
    },
    /// POST each exchange to a remote ingest endpoint.
    RemoteIngest {
        /// Base URI of the ingest service.
        uri: String,
    },
    /// Send every exchange to both a local archive and a remote endpoint,
    /// independently.
    Tee {
        /// Output directory for the local archive half.
        directory: PathBuf,
        /// Base URI of the remote ingest half.
        uri: String,
    },
    /// Drop every exchange. Used to exercise the rest of the chain (e.g. a
    /// negation pipeline that only exists to count) without writing
    /// anything.
    Discard,
}

/// Full capture configuration for one supervisor run. Shared across all
/// interfaces the run captures on; per-interface pipelines differ only in
/// their [`crate::InterfaceDescriptor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Interfaces to capture on. Empty means "the platform default".
    #[serde(default)]
    pub interfaces: Vec<String>,

    /// Raw BPF filter expression, compiled once per pipeline.
    #[serde(default)]
    pub bpf_filter: Option<String>,

    /// Regexes a request path must match at least one of, or every exchange
    /// is dropped. Empty means "allow all paths".
    #[serde(default)]
    pub path_allow: Vec<String>,

    /// Regexes the `Host` header must match at least one of.
    #[serde(default)]
    pub host_allow: Vec<String>,

    /// Regexes that drop a request path on match.
    #[serde(default)]
    pub path_exclude: Vec<String>,

    /// Regexes that drop a `Host` header on match.
    #[serde(default)]
    pub host_exclude: Vec<String>,

    /// Keep only this fraction of exchanges that survive filtering, chosen
    /// independently per exchange. Mutually exclusive with
    /// [`Self::witnesses_per_minute`].
    #[serde(default)]
    pub sample_rate: Option<f64>,

    /// Process-wide ceiling on the number of exchanges (witnesses) that may
    /// reach a terminal sink in any rolling 60s window. Mutually exclusive
    /// with [`Self::sample_rate`].
    #[serde(default)]
    pub witnesses_per_minute: Option<u32>,

    /// Terminal sink for surviving exchanges.
    pub sink: SinkConfig,

    /// Tags merged onto every exchange.
    #[serde(default)]
    pub tags: TraceTags,

    /// How long a flow may sit idle before its half-streams are torn down.
    #[serde(default = "default_idle_timeout", with = "duration_secs")]
    pub idle_timeout: Duration,

    /// How long the reassembler waits for an out-of-order segment before
    /// declaring a gap and resyncing.
    #[serde(default = "default_gap_timeout", with = "duration_secs")]
    pub gap_timeout: Duration,

    /// Maximum bytes buffered per message body before truncation.
    #[serde(default = "default_body_cap_bytes")]
    pub body_cap_bytes: usize,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl CaptureConfig {
    /// Validates cross-field invariants and drops empty filter patterns,
    /// logging a warning for each one dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if `sample_rate` and `witnesses_per_minute` are
    /// both set, or if `sample_rate` is outside `(0.0, 1.0]`.
    pub fn sanitize(mut self) -> Result<Self> {
        if self.sample_rate.is_some() && self.witnesses_per_minute.is_some() {
            return Err(Error::configuration(
                "sample_rate and witnesses_per_minute are mutually exclusive",
            ));
        }
        if let Some(rate) = self.sample_rate {
            if !(0.0..=1.0).contains(&rate) || rate <= 0.0 {
                return Err(Error::invalid_argument(
                    "sample_rate",
                    "must be in (0.0, 1.0]",
                ));
            }
        }
        if let Some(cap) = self.witnesses_per_minute {
            if cap == 0 {
                return Err(Error::invalid_argument(
                    "witnesses_per_minute",
                    "must be nonzero",
                ));
            }
        }

        self.path_allow = drop_empty_patterns(self.path_allow, "path_allow");
        self.host_allow = drop_empty_patterns(self.host_allow, "host_allow");
        self.path_exclude = drop_empty_patterns(self.path_exclude, "path_exclude");
        self.host_exclude = drop_empty_patterns(self.host_exclude, "host_exclude");

        Ok(self)
    }
}

fn drop_empty_patterns(patterns: Vec<String>, field: &str) -> Vec<String> {
    let (kept, dropped): (Vec<_>, Vec<_>) = patterns.into_iter().partition(|p| !p.trim().is_empty());
    if !dropped.is_empty() {
        tracing::warn!(field, dropped = dropped.len(), "dropped empty filter pattern(s)");
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> CaptureConfig {
        CaptureConfig {
            interfaces: vec![],
            bpf_filter: None,
            path_allow: vec![],
            host_allow: vec![],
            path_exclude: vec![],
            host_exclude: vec![],
            sample_rate: None,
            witnesses_per_minute: None,
            sink: SinkConfig::Discard,
            tags: TraceTags::new(),
            idle_timeout: default_idle_timeout(),
            gap_timeout: default_gap_timeout(),
            body_cap_bytes: default_body_cap_bytes(),
        }
    }

    #[test]
    fn rejects_sample_rate_and_rate_limit_together() {
        let mut config = base_config();
        config.sample_rate = Some(0.5);
        config.witnesses_per_minute = Some(100);
        assert!(config.sanitize().is_err());
    }

    #[test]
    fn rejects_sample_rate_out_of_range() {
        let mut config = base_config();
        config.sample_rate = Some(1.5);
        assert!(config.sanitize().is_err());
    }

    #[test]
    fn drops_empty_patterns() {
        let mut config = base_config();
        config.path_allow = vec!["/api".to_string(), String::new(), "  ".to_string()];
        let sanitized = config.sanitize().unwrap();
        assert_eq!(sanitized.path_allow, vec!["/api".to_string()]);
    }
}
