//! Live executor: signed market orders over HTTP.
//!
//! Builds the canonical query string, signs it with HMAC-SHA256, and posts
//! to the venue's order endpoint with the API-key header. Depth snapshots
//! still come from the local store; the streaming plane is authoritative
//! and the REST depth endpoint is never consulted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use arb_common::{OrderBook, OrderResult, Side};
use arb_market::OrderBookStore;

use super::{limiter::ThrottleGate, sign, Executor, ExecutorError};

/// Configuration for the live executor.
#[derive(Debug, Clone)]
pub struct RealExecutorConfig {
    /// REST base URL (testnet or mainnet).
    pub base_url: String,
    /// `recvWindow` in milliseconds for signed requests.
    pub recv_window_ms: u64,
}

impl Default for RealExecutorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://testnet.binance.vision".to_string(),
            recv_window_ms: 5000,
        }
    }
}

/// Order response body (the fields we consume).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VenueOrderResponse {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    cummulative_quote_qty: Option<String>,
}

/// Executor submitting real market orders to the venue.
pub struct RealExecutor {
    config: RealExecutorConfig,
    api_key: String,
    api_secret: String,
    client: reqwest::Client,
    gate: Arc<ThrottleGate>,
    store: Arc<OrderBookStore>,
}

impl RealExecutor {
    /// Create a live executor. Individual HTTP calls carry a 10 s timeout.
    pub fn new(
        config: RealExecutorConfig,
        api_key: String,
        api_secret: String,
        gate: Arc<ThrottleGate>,
        store: Arc<OrderBookStore>,
    ) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            config,
            api_key,
            api_secret,
            client,
            gate,
            store,
        })
    }

    /// Canonical signed query for a market order.
    fn order_query(&self, symbol: &str, side: Side, quantity_base: Decimal) -> String {
        let query = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&recvWindow={}&timestamp={}",
            symbol,
            side,
            quantity_base.round_dp(8).normalize(),
            self.config.recv_window_ms,
            sign::timestamp_ms()
        );
        let signature = sign::sign_query(&self.api_secret, &query);
        format!("{}&signature={}", query, signature)
    }
}

/// Map the venue's response body onto an `OrderResult`.
fn parse_order_response(
    side: Side,
    response: VenueOrderResponse,
) -> Result<OrderResult, ExecutorError> {
    if let Some(code) = response.code {
        let msg = response.msg.unwrap_or_else(|| "unknown".to_string());
        return Ok(OrderResult::rejected(format!(
            "venue error code={} msg={}",
            code, msg
        )));
    }

    let executed_qty: Decimal = response
        .executed_qty
        .as_deref()
        .unwrap_or("0")
        .parse()
        .map_err(|e| ExecutorError::Schema(format!("executedQty: {e}")))?;
    let cumm_quote: Decimal = response
        .cummulative_quote_qty
        .as_deref()
        .unwrap_or("0")
        .parse()
        .map_err(|e| ExecutorError::Schema(format!("cummulativeQuoteQty: {e}")))?;

    let avg_price = if executed_qty > Decimal::ZERO {
        cumm_quote / executed_qty
    } else {
        Decimal::ZERO
    };

    Ok(OrderResult {
        success: true,
        filled_qty: executed_qty,
        avg_price,
        // Quote received if sell, quote spent if buy.
        cost_or_proceeds: cumm_quote,
        message: format!("order OK ({side})"),
    })
}

#[async_trait]
impl Executor for RealExecutor {
    async fn place_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity_base: Decimal,
    ) -> Result<OrderResult, ExecutorError> {
        self.gate.wait_for_order().await;

        let query = self.order_query(symbol, side, quantity_base);
        let url = format!("{}/api/v3/order", self.config.base_url);

        info!(symbol = %symbol, side = %side, qty = %quantity_base, "Submitting market order");

        let response: VenueOrderResponse = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(query)
            .send()
            .await?
            .json()
            .await?;

        let result = parse_order_response(side, response)?;
        if !result.success {
            warn!(symbol = %symbol, side = %side, "Order rejected: {}", result.message);
        }
        Ok(result)
    }

    async fn orderbook_snapshot(&self, symbol: &str) -> Result<OrderBook, ExecutorError> {
        self.gate.wait_for_request().await;
        self.store
            .get(symbol)
            .ok_or_else(|| ExecutorError::UnknownSymbol(symbol.to_string()))
    }

    fn name(&self) -> &'static str {
        "real"
    }
}
