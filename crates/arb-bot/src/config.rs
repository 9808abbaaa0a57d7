//! Configuration for arb-bot.
//!
//! Loaded from a TOML file, with environment-variable overrides for
//! credentials and CLI overrides for the run mode. Credentials never live
//! in the TOML file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Cycle scoring and execution thresholds.
    pub engine: EngineConfig,

    /// Catalog and market-data plane parameters.
    pub market: MarketConfig,

    /// Executor selection and rate limits.
    pub execution: ExecutionConfig,

    /// Wallet seeding and persistence.
    pub wallet: WalletConfig,

    /// Directory for the CSV sinks.
    pub logs_dir: PathBuf,

    /// Venue credentials (environment only, live mode only).
    pub credentials: Credentials,
}

/// Cycle scoring and execution thresholds.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-leg fee fraction (e.g. 0.001).
    pub fee: Decimal,
    /// Max tolerated per-leg slippage (`|avg - best| / best`).
    pub slippage: Decimal,
    /// Per-leg sizing as a fraction of the free balance.
    pub max_fraction_per_trade: Decimal,
    /// Minimum fill ratio vs. desired quantity.
    pub min_fill_ratio: Decimal,
    /// Cheap-profit percent that triggers the full re-check.
    pub profit_threshold_pct: Decimal,
    /// Minimum absolute profit (valuation asset) to accept a cycle.
    pub min_profit_usdt: Decimal,
    /// Seconds between two execution attempts of one cycle key.
    pub cooldown_secs: u64,
    /// Rolling failure-window length in seconds.
    pub fail_window_secs: u64,
    /// Failures within the window that blacklist a cycle.
    pub max_fails_in_window: usize,
    /// Cycles rescanned per symbol update, at most.
    pub top_n_per_symbol: usize,
    /// Concurrent scoring tasks.
    pub scan_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee: Decimal::new(1, 3),                  // 0.1%
            slippage: Decimal::new(1, 2),             // 1%
            max_fraction_per_trade: Decimal::new(25, 2), // 25%
            min_fill_ratio: Decimal::new(9, 1),       // 90%
            profit_threshold_pct: Decimal::new(2, 1), // 0.2%
            min_profit_usdt: Decimal::ONE,
            cooldown_secs: 10,
            fail_window_secs: 60,
            max_fails_in_window: 3,
            top_n_per_symbol: 50,
            scan_workers: 4,
        }
    }
}

/// Catalog and market-data plane parameters.
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Ordered list of quote assets for symbol decomposition.
    pub quote_assets: Vec<String>,
    /// Maximum symbols multiplexed onto one stream connection.
    pub max_symbols_per_stream: usize,
    /// Books older than this are not trusted for execution (ms).
    pub max_staleness_ms: i64,
    /// Force a reconnect when a symbol goes silent for this long (secs).
    pub idle_reconnect_secs: u64,
    /// REST base URL for the product catalog.
    pub rest_base_url: String,
    /// WebSocket base URL for the depth streams.
    pub ws_base_url: String,
    /// Optional static catalog fallback.
    pub pairs_file: Option<PathBuf>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            quote_assets: ["USDT", "BUSD", "USDC", "BTC", "ETH", "BNB"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_symbols_per_stream: 50,
            max_staleness_ms: 10_000,
            idle_reconnect_secs: 30,
            rest_base_url: "https://api.binance.com".to_string(),
            ws_base_url: "wss://stream.binance.com:9443".to_string(),
            pairs_file: None,
        }
    }
}

/// Executor selection and rate limits.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Execute through the venue instead of local fill simulation.
    pub live: bool,
    /// Route live orders to the testnet endpoint.
    pub use_testnet: bool,
    /// General request budget per minute.
    pub max_requests_per_minute: u32,
    /// Short-burst order ceiling per second.
    pub max_orders_per_second: u32,
    /// `recvWindow` for signed requests (ms).
    pub recv_window_ms: u64,
    /// Dry-run fill injection parameters.
    pub dry: DryRunConfig,
}

impl ExecutionConfig {
    /// Order/account endpoint base for the selected environment.
    pub fn venue_base_url(&self) -> &'static str {
        if self.use_testnet {
            "https://testnet.binance.vision"
        } else {
            "https://api.binance.com"
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            live: false,
            use_testnet: true,
            max_requests_per_minute: 1100,
            max_orders_per_second: 10,
            recv_window_ms: 5000,
            dry: DryRunConfig::default(),
        }
    }
}

/// Dry-run fill injection parameters.
#[derive(Debug, Clone)]
pub struct DryRunConfig {
    /// Base fraction of the requested quantity that fills.
    pub fill_ratio: Decimal,
    /// Baseline emulated latency (ms).
    pub base_latency_ms: u64,
    /// Probability of an injected transient failure.
    pub fail_probability: f64,
    /// Per-unit slippage injection (bps).
    pub slippage_bps: Decimal,
    /// Synthetic fill price.
    pub mock_price: Decimal,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            fill_ratio: Decimal::ONE,
            base_latency_ms: 150,
            fail_probability: 0.10,
            slippage_bps: Decimal::new(5, 0),
            mock_price: Decimal::new(28000, 0),
        }
    }
}

/// Wallet seeding and persistence.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Initial per-asset totals (dry mode; live mode syncs from the venue).
    pub initial: BTreeMap<String, Decimal>,
    /// Optional JSON state file persisted on shutdown.
    pub state_file: Option<PathBuf>,
    /// Account-sync cadence in seconds (live mode only).
    pub sync_interval_secs: u64,
}

impl WalletConfig {
    /// Sync cadence as a `Duration`.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        let mut initial = BTreeMap::new();
        initial.insert("USDT".to_string(), Decimal::new(1000, 0));
        Self {
            initial,
            state_file: None,
            sync_interval_secs: 5,
        }
    }
}

/// Venue credentials, environment-sourced.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl Credentials {
    /// Both halves present.
    pub fn is_complete(&self) -> bool {
        self.api_key.is_some() && self.api_secret.is_some()
    }
}

// ============================================================================
// TOML schema
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    log_level: Option<String>,
    logs_dir: Option<PathBuf>,
    #[serde(default)]
    engine: TomlEngine,
    #[serde(default)]
    market: TomlMarket,
    #[serde(default)]
    execution: TomlExecution,
    #[serde(default)]
    wallet: TomlWallet,
}

#[derive(Debug, Default, Deserialize)]
struct TomlEngine {
    fee: Option<Decimal>,
    slippage: Option<Decimal>,
    max_fraction_per_trade: Option<Decimal>,
    min_fill_ratio: Option<Decimal>,
    profit_threshold_pct: Option<Decimal>,
    min_profit_usdt: Option<Decimal>,
    cooldown_secs: Option<u64>,
    fail_window_secs: Option<u64>,
    max_fails_in_window: Option<usize>,
    top_n_per_symbol: Option<usize>,
    scan_workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlMarket {
    quote_assets: Option<Vec<String>>,
    max_symbols_per_stream: Option<usize>,
    max_staleness_ms: Option<i64>,
    idle_reconnect_secs: Option<u64>,
    rest_base_url: Option<String>,
    ws_base_url: Option<String>,
    pairs_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlExecution {
    live: Option<bool>,
    use_testnet: Option<bool>,
    max_requests_per_minute: Option<u32>,
    max_orders_per_second: Option<u32>,
    recv_window_ms: Option<u64>,
    dry_fill_ratio: Option<Decimal>,
    dry_base_latency_ms: Option<u64>,
    dry_fail_probability: Option<f64>,
    dry_slippage_bps: Option<Decimal>,
    dry_mock_price: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct TomlWallet {
    initial: Option<BTreeMap<String, Decimal>>,
    state_file: Option<PathBuf>,
    sync_interval_secs: Option<u64>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            engine: EngineConfig::default(),
            market: MarketConfig::default(),
            execution: ExecutionConfig::default(),
            wallet: WalletConfig::default(),
            logs_dir: PathBuf::from("logs"),
            credentials: Credentials::default(),
        }
    }
}

impl BotConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML content over the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: TomlConfig = toml::from_str(content).context("Failed to parse TOML config")?;
        let mut config = Self::default();

        if let Some(level) = file.log_level {
            config.log_level = level;
        }
        if let Some(dir) = file.logs_dir {
            config.logs_dir = dir;
        }

        let e = file.engine;
        let engine = &mut config.engine;
        engine.fee = e.fee.unwrap_or(engine.fee);
        engine.slippage = e.slippage.unwrap_or(engine.slippage);
        engine.max_fraction_per_trade =
            e.max_fraction_per_trade.unwrap_or(engine.max_fraction_per_trade);
        engine.min_fill_ratio = e.min_fill_ratio.unwrap_or(engine.min_fill_ratio);
        engine.profit_threshold_pct =
            e.profit_threshold_pct.unwrap_or(engine.profit_threshold_pct);
        engine.min_profit_usdt = e.min_profit_usdt.unwrap_or(engine.min_profit_usdt);
        engine.cooldown_secs = e.cooldown_secs.unwrap_or(engine.cooldown_secs);
        engine.fail_window_secs = e.fail_window_secs.unwrap_or(engine.fail_window_secs);
        engine.max_fails_in_window =
            e.max_fails_in_window.unwrap_or(engine.max_fails_in_window);
        engine.top_n_per_symbol = e.top_n_per_symbol.unwrap_or(engine.top_n_per_symbol);
        engine.scan_workers = e.scan_workers.unwrap_or(engine.scan_workers);

        let m = file.market;
        let market = &mut config.market;
        if let Some(quote_assets) = m.quote_assets {
            market.quote_assets = quote_assets;
        }
        market.max_symbols_per_stream =
            m.max_symbols_per_stream.unwrap_or(market.max_symbols_per_stream);
        market.max_staleness_ms = m.max_staleness_ms.unwrap_or(market.max_staleness_ms);
        market.idle_reconnect_secs =
            m.idle_reconnect_secs.unwrap_or(market.idle_reconnect_secs);
        if let Some(rest_base_url) = m.rest_base_url {
            market.rest_base_url = rest_base_url;
        }
        if let Some(ws_base_url) = m.ws_base_url {
            market.ws_base_url = ws_base_url;
        }
        if let Some(pairs_file) = m.pairs_file {
            market.pairs_file = Some(pairs_file);
        }

        let x = file.execution;
        let execution = &mut config.execution;
        execution.live = x.live.unwrap_or(execution.live);
        execution.use_testnet = x.use_testnet.unwrap_or(execution.use_testnet);
        execution.max_requests_per_minute =
            x.max_requests_per_minute.unwrap_or(execution.max_requests_per_minute);
        execution.max_orders_per_second =
            x.max_orders_per_second.unwrap_or(execution.max_orders_per_second);
        execution.recv_window_ms = x.recv_window_ms.unwrap_or(execution.recv_window_ms);
        execution.dry.fill_ratio = x.dry_fill_ratio.unwrap_or(execution.dry.fill_ratio);
        execution.dry.base_latency_ms =
            x.dry_base_latency_ms.unwrap_or(execution.dry.base_latency_ms);
        execution.dry.fail_probability =
            x.dry_fail_probability.unwrap_or(execution.dry.fail_probability);
        execution.dry.slippage_bps = x.dry_slippage_bps.unwrap_or(execution.dry.slippage_bps);
        execution.dry.mock_price = x.dry_mock_price.unwrap_or(execution.dry.mock_price);

        let w = file.wallet;
        let wallet = &mut config.wallet;
        if let Some(initial) = w.initial {
            wallet.initial = initial;
        }
        if let Some(state_file) = w.state_file {
            wallet.state_file = Some(state_file);
        }
        wallet.sync_interval_secs =
            w.sync_interval_secs.unwrap_or(wallet.sync_interval_secs);

        Ok(config)
    }

    /// Pull credentials (and an optional log-level override) from the
    /// environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("ARB_API_KEY") {
            self.credentials.api_key = Some(key);
        }
        if let Ok(secret) = std::env::var("ARB_API_SECRET") {
            self.credentials.api_secret = Some(secret);
        }
        if let Ok(level) = std::env::var("ARB_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Apply CLI overrides.
    pub fn apply_cli_overrides(&mut self, live: bool) {
        if live {
            self.execution.live = true;
        }
    }

    /// Reject configurations the engine cannot run with. Fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let e = &self.engine;
        if e.fee < Decimal::ZERO || e.fee >= Decimal::ONE {
            bail!("engine.fee must be in [0, 1), got {}", e.fee);
        }
        if e.slippage < Decimal::ZERO {
            bail!("engine.slippage must be non-negative");
        }
        if e.max_fraction_per_trade <= Decimal::ZERO || e.max_fraction_per_trade > Decimal::ONE {
            bail!(
                "engine.max_fraction_per_trade must be in (0, 1], got {}",
                e.max_fraction_per_trade
            );
        }
        if e.min_fill_ratio < Decimal::ZERO || e.min_fill_ratio > Decimal::ONE {
            bail!("engine.min_fill_ratio must be in [0, 1]");
        }
        if self.market.quote_assets.is_empty() {
            bail!("market.quote_assets must not be empty");
        }
        if self.market.max_symbols_per_stream == 0 {
            bail!("market.max_symbols_per_stream must be positive");
        }
        if !(0.0..=1.0).contains(&self.execution.dry.fail_probability) {
            bail!("execution.dry_fail_probability must be in [0, 1]");
        }
        if self.execution.live && !self.credentials.is_complete() {
            bail!("live mode requires ARB_API_KEY and ARB_API_SECRET in the environment");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.engine.fee, dec!(0.001));
        assert_eq!(config.engine.top_n_per_symbol, 50);
        assert_eq!(config.engine.scan_workers, 4);
        assert_eq!(config.market.max_symbols_per_stream, 50);
        assert!(!config.execution.live);
        assert!(config.execution.use_testnet);
        assert_eq!(config.wallet.sync_interval_secs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_str() {
        let toml = r#"
            log_level = "debug"
            logs_dir = "out"

            [engine]
            fee = 0.00075
            profit_threshold_pct = 0.5
            cooldown_secs = 30

            [market]
            quote_assets = ["USDT", "BTC"]
            max_symbols_per_stream = 25

            [execution]
            live = false
            use_testnet = false
            max_orders_per_second = 5
            dry_fail_probability = 0.25

            [wallet]
            sync_interval_secs = 15
            [wallet.initial]
            USDT = 5000
            BTC = 0.1
        "#;
        let config = BotConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.logs_dir, PathBuf::from("out"));
        assert_eq!(config.engine.fee, dec!(0.00075));
        assert_eq!(config.engine.profit_threshold_pct, dec!(0.5));
        assert_eq!(config.engine.cooldown_secs, 30);
        // Untouched keys keep their defaults.
        assert_eq!(config.engine.fail_window_secs, 60);
        assert_eq!(config.market.quote_assets, vec!["USDT", "BTC"]);
        assert_eq!(config.market.max_symbols_per_stream, 25);
        assert_eq!(config.execution.max_orders_per_second, 5);
        assert_eq!(config.execution.dry.fail_probability, 0.25);
        assert_eq!(config.execution.venue_base_url(), "https://api.binance.com");
        assert_eq!(config.wallet.initial.get("USDT"), Some(&dec!(5000)));
        assert_eq!(config.wallet.initial.get("BTC"), Some(&dec!(0.1)));
        assert_eq!(config.wallet.sync_interval_secs, 15);
    }

    #[test]
    fn test_cli_override_enables_live() {
        let mut config = BotConfig::default();
        config.apply_cli_overrides(true);
        assert!(config.execution.live);
        // --live without credentials is a fatal config error.
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fee() {
        let mut config = BotConfig::default();
        config.engine.fee = dec!(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_fraction() {
        let mut config = BotConfig::default();
        config.engine.max_fraction_per_trade = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fail_probability() {
        let mut config = BotConfig::default();
        config.execution.dry.fail_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_testnet_selects_base_url() {
        let mut config = BotConfig::default();
        assert_eq!(
            config.execution.venue_base_url(),
            "https://testnet.binance.vision"
        );
        config.execution.use_testnet = false;
        assert_eq!(config.execution.venue_base_url(), "https://api.binance.com");
    }

    #[test]
    fn test_malformed_toml_is_error() {
        assert!(BotConfig::from_toml_str("log_level = [broken").is_err());
    }
}
