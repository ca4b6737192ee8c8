//! Allow/exclude filtering and self-traffic suppression (spec.md §4.7
//! items 2-6), plus the pre/post-filter counters (items 1 and 9).

use crate::stage::{SharedStage, Stage};
use async_trait::async_trait;
use flowtap_types::counts::PipelineCounts;
use flowtap_types::exchange::Exchange;
use regex::Regex;
use std::net::IpAddr;

/// Counts every exchange that reaches the front of the chain, before any
/// filter has had a chance to drop it.
pub struct PreFilterCount {
    counts: PipelineCounts,
    next: SharedStage,
}

impl PreFilterCount {
    /// Wraps `next`, counting every exchange that passes through.
    #[must_use]
    pub fn new(counts: PipelineCounts, next: SharedStage) -> Self {
        Self { counts, next }
    }
}

#[async_trait]
impl Stage for PreFilterCount {
    async fn process(&self, exchange: Exchange) -> Option<Exchange> {
        self.counts.record_pre_filter();
        self.next.process(exchange).await
    }
}

/// Counts every exchange that survives every filter stage ahead of the
/// terminal sink.
pub struct PostFilterCount {
    counts: PipelineCounts,
    next: SharedStage,
}

impl PostFilterCount {
    /// Wraps `next`, counting every exchange that survives to it.
    #[must_use]
    pub fn new(counts: PipelineCounts, next: SharedStage) -> Self {
        Self { counts, next }
    }
}

#[async_trait]
impl Stage for PostFilterCount {
    async fn process(&self, exchange: Exchange) -> Option<Exchange> {
        self.counts.record_post_filter();
        self.next.process(exchange).await
    }
}

/// Drops exchanges whose destination is the tool's own configured ingest
/// endpoint, so a remote sink does not capture its own uploads. Skipped
/// entirely in dogfood mode (spec.md §4.7 item 2, §9's global-option-store
/// note: the flag is read once at chain-construction time).
pub struct SelfTrafficSuppressor {
    ingest_addr: IpAddr,
    next: SharedStage,
}

impl SelfTrafficSuppressor {
    /// Wraps `next`, dropping exchanges destined for `ingest_addr`.
    #[must_use]
    pub fn new(ingest_addr: IpAddr, next: SharedStage) -> Self {
        Self { ingest_addr, next }
    }
}

#[async_trait]
impl Stage for SelfTrafficSuppressor {
    async fn process(&self, exchange: Exchange) -> Option<Exchange> {
        let matches_ingest = exchange
            .flow
            .server_addr
            .eq(&self.ingest_addr)
            .then_some(())
            .is_some();
        if matches_ingest {
            return None;
        }
        self.next.process(exchange).await
    }
}

/// Which field of an exchange a regex-based stage inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// The request path, stripped of query string.
    Path,
    /// The `Host` header.
    Host,
}

fn field_value<'a>(exchange: &'a Exchange, field: Field) -> &'a str {
    match field {
        Field::Path => exchange.request_path(),
        Field::Host => exchange.request_host(),
    }
}

/// Drops any exchange whose `field` does not match at least one of
/// `patterns`. An empty pattern list means "allow everything" (spec.md
/// §3's invariant that empty allow lists have no filtering effect).
pub struct AllowFilter {
    field: Field,
    patterns: Vec<Regex>,
    next: SharedStage,
}

impl AllowFilter {
    /// Wraps `next`.
    #[must_use]
    pub fn new(field: Field, patterns: Vec<Regex>, next: SharedStage) -> Self {
        Self { field, patterns, next }
    }
}

#[async_trait]
impl Stage for AllowFilter {
    async fn process(&self, exchange: Exchange) -> Option<Exchange> {
        if !self.patterns.is_empty() {
            let value = field_value(&exchange, self.field);
            if !self.patterns.iter().any(|re| re.is_match(value)) {
                return None;
            }
        }
        self.next.process(exchange).await
    }
}

/// Drops any exchange whose `field` matches any of `patterns`. An empty
/// pattern list means "exclude nothing".
pub struct ExcludeFilter {
    field: Field,
    patterns: Vec<Regex>,
    next: SharedStage,
}

impl ExcludeFilter {
    /// Wraps `next`.
    #[must_use]
    pub fn new(field: Field, patterns: Vec<Regex>, next: SharedStage) -> Self {
        Self { field, patterns, next }
    }
}

#[async_trait]
impl Stage for ExcludeFilter {
    async fn process(&self, exchange: Exchange) -> Option<Exchange> {
        if !self.patterns.is_empty() {
            let value = field_value(&exchange, self.field);
            if self.patterns.iter().any(|re| re.is_match(value)) {
                return None;
            }
        }
        self.next.process(exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Identity;
    use flowtap_types::exchange::HttpMessage;
    use flowtap_types::flow::FlowKey;
    use flowtap_types::tags::TraceTags;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn exchange(path: &str, host: &str) -> Exchange {
        let (flow, _) = FlowKey::from_endpoints(
            "eth0",
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            54321,
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
            80,
        );
        Exchange {
            flow,
            request: HttpMessage {
                start_line: format!("GET {path} HTTP/1.1"),
                headers: vec![("Host".to_string(), host.to_string())],
                body: Vec::new(),
                body_truncated: false,
                observed_at: chrono::Utc::now(),
            },
            response: None,
            tags: TraceTags::new(),
            metadata: std::collections::BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn path_allow_drops_non_matching() {
        let stage = AllowFilter::new(
            Field::Path,
            vec![Regex::new("^/api").unwrap()],
            Arc::new(Identity),
        );
        assert!(stage.process(exchange("/other", "h")).await.is_none());
        assert!(stage.process(exchange("/api/x", "h")).await.is_some());
    }

    #[tokio::test]
    async fn empty_allow_list_admits_everything() {
        let stage = AllowFilter::new(Field::Path, vec![], Arc::new(Identity));
        assert!(stage.process(exchange("/whatever", "h")).await.is_some());
    }

    #[tokio::test]
    async fn host_exclude_drops_matching() {
        let stage = ExcludeFilter::new(
            Field::Host,
            vec![Regex::new("internal\\.example\\.com$").unwrap()],
            Arc::new(Identity),
        );
        assert!(stage
            .process(exchange("/", "internal.example.com"))
            .await
            .is_none());
        assert!(stage.process(exchange("/", "api.example.com")).await.is_some());
    }

    #[tokio::test]
    async fn self_traffic_is_suppressed() {
        let stage = SelfTrafficSuppressor::new(
            IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
            Arc::new(Identity),
        );
        assert!(stage.process(exchange("/", "h")).await.is_none());
    }
}
