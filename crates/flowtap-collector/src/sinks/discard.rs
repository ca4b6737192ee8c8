//! A terminal sink that accepts and drops every exchange, used to cap the
//! negation pipeline (spec.md §4.2's self-traffic negation filter: matched
//! packets are reassembled and counted but never written anywhere).

use crate::stage::Stage;
use async_trait::async_trait;
use flowtap_types::counts::PipelineCounts;
use flowtap_types::exchange::Exchange;

/// Counts and discards every exchange handed to it.
pub struct DiscardSink {
    counts: PipelineCounts,
}

impl DiscardSink {
    /// Builds a discard sink recording into `counts`.
    #[must_use]
    pub fn new(counts: PipelineCounts) -> Self {
        Self { counts }
    }
}

#[async_trait]
impl Stage for DiscardSink {
    async fn process(&self, _exchange: Exchange) -> Option<Exchange> {
        self.counts.record_sunk();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowtap_types::exchange::HttpMessage;
    use flowtap_types::flow::FlowKey;
    use flowtap_types::tags::TraceTags;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn discards_and_still_counts() {
        let counts = PipelineCounts::new();
        let sink = DiscardSink::new(counts.clone());
        let (flow, _) = FlowKey::from_endpoints(
            "eth0",
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            1,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            2,
        );
        let exchange = Exchange {
            flow,
            request: HttpMessage {
                start_line: "GET / HTTP/1.1".to_string(),
                headers: vec![],
                body: vec![],
                body_truncated: false,
                observed_at: chrono::Utc::now(),
            },
            response: None,
            tags: TraceTags::new(),
            metadata: std::collections::BTreeMap::new(),
        };
        assert!(sink.process(exchange).await.is_none());
        assert_eq!(counts.snapshot().exchanges_sunk, 1);
    }
}
