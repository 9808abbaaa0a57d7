//! Account-sync worker.
//!
//! Live mode only: the local wallet drifts from the venue whenever a
//! reversal is partial or a fill report is lost, so a background worker
//! periodically refreshes wallet totals from the signed account endpoint.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::executor::{limiter::ThrottleGate, sign, ExecutorError};
use crate::wallet::Wallet;

/// Configuration for the account-sync worker.
#[derive(Debug, Clone)]
pub struct AccountSyncConfig {
    /// REST base URL (testnet or mainnet).
    pub base_url: String,
    /// `recvWindow` in milliseconds for signed requests.
    pub recv_window_ms: u64,
    /// Refresh cadence.
    pub interval: Duration,
}

impl Default for AccountSyncConfig {
    fn default() -> Self {
        Self {
            base_url: "https://testnet.binance.vision".to_string(),
            recv_window_ms: 5000,
            interval: Duration::from_secs(5),
        }
    }
}

/// Account response body (the fields we consume).
#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(default)]
    balances: Vec<AccountBalance>,
}

#[derive(Debug, Deserialize)]
struct AccountBalance {
    asset: String,
    free: String,
    locked: String,
}

/// Periodically refreshes wallet totals from the venue.
pub struct AccountSync {
    config: AccountSyncConfig,
    api_key: String,
    api_secret: String,
    wallet: Arc<Wallet>,
    gate: Arc<ThrottleGate>,
    client: reqwest::Client,
}

impl AccountSync {
    /// Create a sync worker sharing the executor's throttle gate.
    pub fn new(
        config: AccountSyncConfig,
        api_key: String,
        api_secret: String,
        wallet: Arc<Wallet>,
        gate: Arc<ThrottleGate>,
    ) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            config,
            api_key,
            api_secret,
            wallet,
            gate,
            client,
        })
    }

    /// Run until shutdown, refreshing on each tick. Individual failures are
    /// logged and retried on the next tick, never fatal.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval = ?self.config.interval, "Account sync started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.sync_once().await {
                        Ok(updated) => debug!(assets = updated, "Wallet balances refreshed"),
                        Err(e) => warn!("Account sync failed: {e}"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Account sync: shutdown signal received");
                    return;
                }
            }
        }
    }

    /// One signed account fetch; returns how many assets were updated.
    async fn sync_once(&self) -> Result<usize, ExecutorError> {
        self.gate.wait_for_request().await;

        let query = format!(
            "recvWindow={}&timestamp={}",
            self.config.recv_window_ms,
            sign::timestamp_ms()
        );
        let signature = sign::sign_query(&self.api_secret, &query);
        let url = format!(
            "{}/api/v3/account?{}&signature={}",
            self.config.base_url, query, signature
        );

        let response: AccountResponse = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?
            .json()
            .await?;

        Ok(apply_balances(&self.wallet, &response))
    }
}

/// Update the wallet from an account response, skipping dust-free assets
/// and unparseable rows.
fn apply_balances(wallet: &Wallet, response: &AccountResponse) -> usize {
    let mut updated = 0;
    for balance in &response.balances {
        let (Ok(free), Ok(locked)) = (
            balance.free.parse::<Decimal>(),
            balance.locked.parse::<Decimal>(),
        ) else {
            warn!(asset = %balance.asset, "Dropping unparseable balance row");
            continue;
        };
        let total = free + locked;
        if total > Decimal::ZERO && wallet.set_balance(&balance.asset, total) {
            updated += 1;
        }
    }
    updated
}
