//! The composable collector chain: each stage wraps the next and forwards
//! after doing its own work, per spec.md §4.7 and the "composable stages
//! via wrapping" design note (spec.md §9).

use async_trait::async_trait;
use flowtap_types::exchange::Exchange;
use std::sync::Arc;

/// One stage of the collector chain. `process` returns `None` to drop the
/// exchange (the chain stops there) or `Some` to keep it flowing — a
/// terminal sink always returns `None` after accepting the exchange, since
/// there is nothing further to forward to.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Processes one exchange, forwarding to whatever this stage wraps.
    async fn process(&self, exchange: Exchange) -> Option<Exchange>;
}

/// A stage that always forwards, unconditionally. Used as the innermost
/// wrapped value by stages built without a further chain (mostly in
/// tests).
pub struct Identity;

#[async_trait]
impl Stage for Identity {
    async fn process(&self, exchange: Exchange) -> Option<Exchange> {
        Some(exchange)
    }
}

/// A boxed, shared stage — the type every chain-building helper passes
/// around, since the chain is constructed once and then shared across
/// however many exchanges flow through it concurrently.
pub type SharedStage = Arc<dyn Stage>;
