//! Dry-run executor with partial-fill and failure injection.
//!
//! Synthesizes fills without touching the venue: a configurable fraction of
//! orders fail outright, fills are scaled by a uniform partial factor, and
//! the fill price is nudged by a per-unit basis-point slippage model. The
//! slippage model is deliberately simple; it exists to exercise the
//! simulator's rejection paths, not to predict market impact.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::info;

use arb_common::{OrderBook, OrderResult, Side};
use arb_market::OrderBookStore;

use super::{limiter::ThrottleGate, Executor, ExecutorError};

/// Configuration for the dry-run executor.
#[derive(Debug, Clone)]
pub struct DryExecutorConfig {
    /// Base fraction of the requested quantity that fills.
    pub fill_ratio: Decimal,
    /// Baseline emulated latency in milliseconds; actual latency adds a
    /// uniform jitter of up to the same amount again.
    pub base_latency_ms: u64,
    /// Probability of a transient venue rejection.
    pub fail_probability: f64,
    /// Per-unit slippage injection in basis points.
    pub slippage_bps: Decimal,
    /// Fill price used when no book is available.
    pub mock_price: Decimal,
}

impl Default for DryExecutorConfig {
    fn default() -> Self {
        Self {
            fill_ratio: Decimal::ONE,
            base_latency_ms: 150,
            fail_probability: 0.10,
            slippage_bps: Decimal::new(5, 0), // 5 bps per unit of base
            mock_price: Decimal::new(28000, 0),
        }
    }
}

/// Executor that synthesizes fills locally.
pub struct DryExecutor {
    config: DryExecutorConfig,
    mock_price: Mutex<Decimal>,
    gate: Arc<ThrottleGate>,
    store: Arc<OrderBookStore>,
}

impl DryExecutor {
    /// Create a dry executor reading snapshots from `store`.
    pub fn new(
        config: DryExecutorConfig,
        gate: Arc<ThrottleGate>,
        store: Arc<OrderBookStore>,
    ) -> Self {
        let mock_price = Mutex::new(config.mock_price);
        Self {
            config,
            mock_price,
            gate,
            store,
        }
    }

    /// Override the synthetic fill price.
    pub fn set_mock_price(&self, price: Decimal) {
        *self.mock_price.lock() = price;
    }

    /// Sample the randomized parts of a fill: (latency, injected failure,
    /// partial-fill factor in [0.5, 1.0]).
    fn sample_fill(&self) -> (Duration, bool, Decimal) {
        let mut rng = rand::thread_rng();
        let jitter = rng.gen_range(0..=self.config.base_latency_ms);
        let latency = Duration::from_millis(self.config.base_latency_ms + jitter);
        let fail = rng.gen_bool(self.config.fail_probability.clamp(0.0, 1.0));
        let partial = Decimal::from(rng.gen_range(5000u32..=10000)) / Decimal::new(10000, 0);
        (latency, fail, partial)
    }
}

#[async_trait]
impl Executor for DryExecutor {
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity_base: Decimal,
    ) -> Result<OrderResult, ExecutorError> {
        self.gate.wait_for_order().await;

        let t0 = Instant::now();
        let (latency, fail, partial) = self.sample_fill();
        tokio::time::sleep(latency).await;

        if fail {
            info!(symbol = %symbol, side = %side, "Dry order: injected transient failure");
            return Ok(OrderResult::rejected("transient venue rejection (injected)"));
        }

        let filled = quantity_base * self.config.fill_ratio * partial;
        let slip_ratio = quantity_base * self.config.slippage_bps / Decimal::new(10000, 0);
        let mock_price = *self.mock_price.lock();
        let avg_price = match side {
            Side::Buy => mock_price * (Decimal::ONE + slip_ratio),
            Side::Sell => mock_price * (Decimal::ONE - slip_ratio),
        };
        let cost_or_proceeds = filled * avg_price;

        let result = OrderResult {
            success: true,
            filled_qty: filled,
            avg_price,
            cost_or_proceeds,
            message: format!("[DRY] {} {} {} @ {}", symbol, side, filled, avg_price),
        };

        info!(
            symbol = %symbol,
            side = %side,
            requested = %quantity_base,
            filled = %filled,
            avg_price = %avg_price,
            latency_ms = t0.elapsed().as_millis() as u64,
            "Dry order filled"
        );

        Ok(result)
    }

    async fn orderbook_snapshot(&self, symbol: &str) -> Result<OrderBook, ExecutorError> {
        self.gate.wait_for_request().await;
        self.store
            .get(symbol)
            .ok_or_else(|| ExecutorError::UnknownSymbol(symbol.to_string()))
    }

    fn name(&self) -> &'static str {
        "dry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_common::PriceLevel;
    use rust_decimal_macros::dec;

    fn executor(config: DryExecutorConfig) -> DryExecutor {
        let gate = Arc::new(ThrottleGate::new(100_000, 1000));
        let store = Arc::new(OrderBookStore::new(["BTCUSDT".to_string()]));
        DryExecutor::new(config, gate, store)
    }

    fn fast_config() -> DryExecutorConfig {
        DryExecutorConfig {
            base_latency_ms: 0,
            fail_probability: 0.0,
            slippage_bps: Decimal::ZERO,
            fill_ratio: Decimal::ONE,
            mock_price: dec!(30000),
        }
    }

    #[tokio::test]
    async fn test_full_fill_no_injection() {
        let exec = executor(fast_config());
        let res = exec
            .place_market_order("BTCUSDT", Side::Sell, dec!(0.5))
            .await
            .unwrap();
        assert!(res.success);
        // Partial factor is in [0.5, 1.0].
        assert!(res.filled_qty >= dec!(0.25));
        assert!(res.filled_qty <= dec!(0.5));
        assert_eq!(res.avg_price, dec!(30000));
        assert_eq!(res.cost_or_proceeds, res.filled_qty * res.avg_price);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mut config = fast_config();
        config.fail_probability = 1.0;
        let exec = executor(config);
        let res = exec
            .place_market_order("BTCUSDT", Side::Buy, dec!(1))
            .await
            .unwrap();
        assert!(!res.success);
        assert_eq!(res.filled_qty, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_slippage_direction() {
        let mut config = fast_config();
        config.slippage_bps = dec!(10); // 10 bps per unit
        let exec = executor(config);

        let buy = exec
            .place_market_order("BTCUSDT", Side::Buy, dec!(2))
            .await
            .unwrap();
        // 2 units * 10 bps = 0.2% above mock price.
        assert_eq!(buy.avg_price, dec!(30000) * dec!(1.002));

        let sell = exec
            .place_market_order("BTCUSDT", Side::Sell, dec!(2))
            .await
            .unwrap();
        assert_eq!(sell.avg_price, dec!(30000) * dec!(0.998));
    }

    #[tokio::test]
    async fn test_set_mock_price() {
        let exec = executor(fast_config());
        exec.set_mock_price(dec!(100));
        let res = exec
            .place_market_order("BTCUSDT", Side::Sell, dec!(1))
            .await
            .unwrap();
        assert_eq!(res.avg_price, dec!(100));
    }

    #[tokio::test]
    async fn test_snapshot_reads_local_store() {
        let exec = executor(fast_config());
        let mut book = OrderBook::new();
        book.apply_snapshot(
            vec![PriceLevel::new(dec!(99), dec!(1))],
            vec![PriceLevel::new(dec!(101), dec!(1))],
            7,
        );
        exec.store.publish("BTCUSDT", book);

        let snap = exec.orderbook_snapshot("BTCUSDT").await.unwrap();
        assert_eq!(snap.best_bid(), Some(dec!(99)));

        let err = exec.orderbook_snapshot("ETHUSDT").await.unwrap_err();
        assert!(matches!(err, ExecutorError::UnknownSymbol(_)));
    }
}
