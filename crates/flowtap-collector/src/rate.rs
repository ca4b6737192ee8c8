//! Rate limiting and sampling (spec.md §4.7 items 7-8).
//!
//! The rate limiter uses `governor`'s lock-free token bucket behind a
//! single shared `Arc`, exactly the "single shared instance, lock-free if
//! possible" shape spec.md §5 and §9 call for — grounded in the pack's
//! `iHaydenzZ-NetGuard` dependency on the same crate for a comparable
//! per-window admission ceiling.

use crate::stage::{SharedStage, Stage};
use async_trait::async_trait;
use flowtap_types::counts::PipelineCounts;
use flowtap_types::exchange::Exchange;
use governor::{Quota, RateLimiter as GovernorLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type Limiter = GovernorLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A limiter instance shared across every pipeline in the run.
pub type SharedRateLimiter = Arc<Limiter>;

/// Enforces a process-wide witnesses-per-minute ceiling shared across
/// every pipeline in the run.
pub struct RateLimiterStage {
    limiter: SharedRateLimiter,
    counts: PipelineCounts,
    next: SharedStage,
}

impl RateLimiterStage {
    /// Builds a fresh, independent limiter admitting `per_minute` exchanges
    /// per rolling 60s window. Callers that want the limiter shared across
    /// pipelines should build one [`SharedRateLimiter`] and clone it into each
    /// [`RateLimiterStage`] via [`RateLimiterStage::with_limiter`] instead.
    #[must_use]
    pub fn new(per_minute: u32, counts: PipelineCounts, next: SharedStage) -> Self {
        Self::with_limiter(Self::build_limiter(per_minute), counts, next)
    }

    /// Builds the shared limiter instance once, so every pipeline's stage
    /// can be constructed with [`RateLimiterStage::with_limiter`] against
    /// the same reservoir (spec.md §5's "single shared instance").
    ///
    /// The quota replenishes at `per_minute` tokens per 60s window but
    /// carries a burst of exactly one, so admission tracks the line rate
    /// within one token rather than letting a whole minute's allowance
    /// land in a single instant (spec.md §8's rolling-window tolerance).
    #[must_use]
    pub fn build_limiter(per_minute: u32) -> SharedRateLimiter {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute.max(1)).expect("max(1) is nonzero"))
            .allow_burst(NonZeroU32::new(1).expect("1 is nonzero"));
        Arc::new(GovernorLimiter::direct(quota))
    }

    /// Wraps `next` using an already-built shared limiter.
    #[must_use]
    pub fn with_limiter(limiter: SharedRateLimiter, counts: PipelineCounts, next: SharedStage) -> Self {
        Self {
            limiter,
            counts,
            next,
        }
    }
}

#[async_trait]
impl Stage for RateLimiterStage {
    async fn process(&self, exchange: Exchange) -> Option<Exchange> {
        if self.limiter.check().is_err() {
            self.counts.record_rate_limited();
            return None;
        }
        self.next.process(exchange).await
    }
}

/// Admits each exchange independently with probability `rate`.
pub struct SamplerStage {
    rate: f64,
    counts: PipelineCounts,
    next: SharedStage,
}

impl SamplerStage {
    /// Wraps `next`. `rate` should already be validated into `(0.0, 1.0]`
    /// by [`flowtap_types::CaptureConfig::sanitize`].
    #[must_use]
    pub fn new(rate: f64, counts: PipelineCounts, next: SharedStage) -> Self {
        Self { rate, counts, next }
    }
}

#[async_trait]
impl Stage for SamplerStage {
    async fn process(&self, exchange: Exchange) -> Option<Exchange> {
        if self.rate < 1.0 && rand::random::<f64>() >= self.rate {
            self.counts.record_sampled_out();
            return None;
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
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    fn exchange() -> Exchange {
        let (flow, _) = FlowKey::from_endpoints(
            "eth0",
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            54321,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            80,
        );
        Exchange {
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
        }
    }

    #[tokio::test]
    async fn rate_limiter_admits_up_to_the_burst_then_drops() {
        let counts = PipelineCounts::new();
        let stage = RateLimiterStage::new(1, counts.clone(), Arc::new(Identity));
        assert!(stage.process(exchange()).await.is_some());
        assert!(stage.process(exchange()).await.is_none());
        assert_eq!(counts.snapshot().exchanges_rate_limited, 1);
    }

    #[tokio::test]
    async fn sample_rate_one_always_admits() {
        let stage = SamplerStage::new(1.0, PipelineCounts::new(), Arc::new(Identity));
        for _ in 0..20 {
            assert!(stage.process(exchange()).await.is_some());
        }
    }
}
