//! Fans one exchange out to two terminal sinks independently, so a failure
//! in one (e.g. the remote endpoint is unreachable) does not stop the
//! other from recording it (spec.md §4.7's "local and remote sinks may run
//! together; each applies its own failure handling").

use crate::stage::{SharedStage, Stage};
use async_trait::async_trait;
use flowtap_types::exchange::Exchange;

/// Forwards a clone of each exchange to `first` and to `second`,
/// independently of one another.
pub struct TeeSink {
    first: SharedStage,
    second: SharedStage,
}

impl TeeSink {
    /// Builds a tee across two terminal stages.
    #[must_use]
    pub fn new(first: SharedStage, second: SharedStage) -> Self {
        Self { first, second }
    }
}

#[async_trait]
impl Stage for TeeSink {
    async fn process(&self, exchange: Exchange) -> Option<Exchange> {
        let (a, b) = tokio::join!(
            self.first.process(exchange.clone()),
            self.second.process(exchange)
        );
        debug_assert!(a.is_none() && b.is_none(), "terminal sinks never forward");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Identity;
    use flowtap_types::exchange::HttpMessage;
    use flowtap_types::flow::FlowKey;
    use flowtap_types::tags::TraceTags;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl Stage for CountingSink {
        async fn process(&self, _exchange: Exchange) -> Option<Exchange> {
            self.0.fetch_add(1, Ordering::SeqCst);
            None
        }
    }

    #[tokio::test]
    async fn both_branches_receive_the_exchange() {
        let a_count = Arc::new(AtomicUsize::new(0));
        let b_count = Arc::new(AtomicUsize::new(0));
        let tee = TeeSink::new(
            Arc::new(CountingSink(a_count.clone())),
            Arc::new(CountingSink(b_count.clone())),
        );

        let (flow, _) = FlowKey::from_endpoints(
            "eth0",
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            54321,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            80,
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

        assert!(tee.process(exchange).await.is_none());
        assert_eq!(a_count.load(Ordering::SeqCst), 1);
        assert_eq!(b_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn identity_branches_are_a_no_op_tee() {
        let tee = TeeSink::new(Arc::new(Identity), Arc::new(Identity));
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
        assert!(tee.process(exchange).await.is_none());
    }
}
