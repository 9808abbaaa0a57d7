//! Order execution abstraction for dry-run and live trading.
//!
//! The `Executor` trait is the capability set the trading core needs from a
//! venue: place a market order, read the latest depth snapshot. Two
//! implementations exist:
//!
//! - `DryExecutor`: synthesizes fills locally with configurable partial-fill
//!   and transient-failure injection
//! - `RealExecutor`: signs and submits market orders over HTTP
//!
//! Both variants share one `ThrottleGate`: a request limiter refilled at the
//! per-minute budget plus a short-burst orders-per-second ceiling. Order
//! calls consume both; snapshot reads only a request slot.
//!
//! Depth snapshots always come from the local store in both variants; the
//! streaming plane is authoritative for book state.

pub mod dry;
pub mod limiter;
pub mod real;
pub mod sign;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use arb_common::{OrderBook, OrderResult, Side};

/// Errors that can occur during order execution.
///
/// Venue-side rejections (error codes, under-fills) are not errors: they
/// come back as `OrderResult { success: false, .. }`. This enum covers
/// transport and schema failures only.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Venue response schema error: {0}")]
    Schema(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
}

/// Venue capability set, identical across variants.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Place a market order for `quantity_base` base units.
    ///
    /// Blocks on rate-limiter admission before submitting. Rejections are
    /// reported through `OrderResult::success`; `Err` means the venue could
    /// not be reached or answered gibberish.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity_base: Decimal,
    ) -> Result<OrderResult, ExecutorError>;

    /// Latest depth snapshot for `symbol`, throttled as a non-order request.
    async fn orderbook_snapshot(&self, symbol: &str) -> Result<OrderBook, ExecutorError>;

    /// Short variant name for logs.
    fn name(&self) -> &'static str;
}
