//! arb-bot: triangular arbitrage engine.
//!
//! Usage:
//!   arb-bot [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>       Config file path (default: config/bot.toml)
//!   --live                    Execute through the venue instead of local
//!                             fill simulation (requires ARB_API_KEY and
//!                             ARB_API_SECRET in the environment)
//!   --export-cycles <PCT>     On shutdown, export cycles scoring at least
//!                             PCT percent to profitable_cycles.csv

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use arb_market::{
    DepthStreamConfig, DepthStreamPlane, OrderBookStore, ProductCatalog, TriangleCatalog,
};

use arb_bot::config::BotConfig;
use arb_bot::executor::{
    dry::{DryExecutor, DryExecutorConfig},
    limiter::ThrottleGate,
    real::{RealExecutor, RealExecutorConfig},
    Executor,
};
use arb_bot::logs::TradeLogs;
use arb_bot::scanner::{Scanner, ScannerConfig};
use arb_bot::simulator::{Simulator, SimulatorConfig};
use arb_bot::sync::{AccountSync, AccountSyncConfig};
use arb_bot::wallet::Wallet;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "arb-bot")]
#[command(about = "Triangular arbitrage engine for a centralized spot exchange")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/bot.toml")]
    config: PathBuf,

    /// Execute through the venue instead of local fill simulation
    #[arg(long)]
    live: bool,

    /// On shutdown, export cycles scoring at least this percent
    #[arg(long, value_name = "PCT")]
    export_cycles: Option<Decimal>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // Load environment variables from .env file (if present).
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        BotConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        eprintln!(
            "Config file not found at {:?}, using defaults",
            args.config
        );
        BotConfig::default()
    };
    config.apply_env_overrides();
    config.apply_cli_overrides(args.live);
    config.validate()?;

    init_tracing(&config.log_level)?;
    info!(
        mode = if config.execution.live { "live" } else { "dry" },
        testnet = config.execution.use_testnet,
        "Starting arb-bot"
    );

    // Product catalog: REST first, static pairs file as the fallback.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;
    let products = load_catalog(&http, &config).await?;

    let triangles = Arc::new(TriangleCatalog::build(&products));
    if triangles.is_empty() {
        bail!("No triangles discovered; nothing to trade");
    }
    let symbols = triangles.subscribed_symbols();
    info!(
        symbols = symbols.len(),
        triangles = triangles.len(),
        "Market structure ready"
    );

    // Shared state, sized once.
    let store = Arc::new(OrderBookStore::new(symbols.clone()));
    let wallet = Arc::new(load_wallet(&config));
    wallet.log_all();
    let gate = Arc::new(ThrottleGate::new(
        config.execution.max_requests_per_minute,
        config.execution.max_orders_per_second,
    ));
    let logs = Arc::new(TradeLogs::new(&config.logs_dir)?);

    let executor: Arc<dyn Executor> = if config.execution.live {
        let credentials = &config.credentials;
        let (api_key, api_secret) = match (&credentials.api_key, &credentials.api_secret) {
            (Some(k), Some(s)) => (k.clone(), s.clone()),
            _ => bail!("live mode requires ARB_API_KEY and ARB_API_SECRET"),
        };
        Arc::new(
            RealExecutor::new(
                RealExecutorConfig {
                    base_url: config.execution.venue_base_url().to_string(),
                    recv_window_ms: config.execution.recv_window_ms,
                },
                api_key,
                api_secret,
                gate.clone(),
                store.clone(),
            )
            .context("Failed to build live executor")?,
        )
    } else {
        Arc::new(DryExecutor::new(
            DryExecutorConfig {
                fill_ratio: config.execution.dry.fill_ratio,
                base_latency_ms: config.execution.dry.base_latency_ms,
                fail_probability: config.execution.dry.fail_probability,
                slippage_bps: config.execution.dry.slippage_bps,
                mock_price: config.execution.dry.mock_price,
            },
            gate.clone(),
            store.clone(),
        ))
    };
    info!(executor = executor.name(), "Executor ready");

    let simulator = Arc::new(Simulator::new(
        SimulatorConfig {
            fee: config.engine.fee,
            slippage_tolerance: config.engine.slippage,
            max_fraction_per_trade: config.engine.max_fraction_per_trade,
            min_fill_ratio: config.engine.min_fill_ratio,
            min_profit_usdt: config.engine.min_profit_usdt,
            valuation_asset: "USDT".to_string(),
            live: config.execution.live,
        },
        wallet.clone(),
        executor,
        &products,
        &triangles,
        logs.clone(),
    ));

    let scanner = Arc::new(Scanner::new(
        ScannerConfig {
            fee: config.engine.fee,
            profit_threshold_pct: config.engine.profit_threshold_pct,
            min_profit_usdt: config.engine.min_profit_usdt,
            cooldown: Duration::from_secs(config.engine.cooldown_secs),
            fail_window: Duration::from_secs(config.engine.fail_window_secs),
            max_fails_in_window: config.engine.max_fails_in_window,
            top_n_per_symbol: config.engine.top_n_per_symbol,
            scan_workers: config.engine.scan_workers,
            max_staleness_ms: config.market.max_staleness_ms,
        },
        triangles.clone(),
        store.clone(),
        simulator.clone(),
        logs.clone(),
    ));

    // Wire the plane to the scanner and start everything.
    let (shutdown_tx, _) = broadcast::channel::<()>(8);
    let (update_tx, update_rx) = mpsc::unbounded_channel::<String>();

    let plane = Arc::new(DepthStreamPlane::new(
        DepthStreamConfig {
            ws_base_url: config.market.ws_base_url.clone(),
            max_symbols_per_stream: config.market.max_symbols_per_stream,
            idle_reconnect: Duration::from_secs(config.market.idle_reconnect_secs),
            ..DepthStreamConfig::default()
        },
        store.clone(),
        update_tx,
    ));
    let mut handles = plane.spawn(symbols, &shutdown_tx);

    handles.push(tokio::spawn(
        scanner.clone().run(update_rx, shutdown_tx.subscribe()),
    ));

    if config.execution.live {
        let credentials = &config.credentials;
        if let (Some(api_key), Some(api_secret)) =
            (credentials.api_key.clone(), credentials.api_secret.clone())
        {
            let sync = AccountSync::new(
                AccountSyncConfig {
                    base_url: config.execution.venue_base_url().to_string(),
                    recv_window_ms: config.execution.recv_window_ms,
                    interval: config.wallet.sync_interval(),
                },
                api_key,
                api_secret,
                wallet.clone(),
                gate.clone(),
            )
            .context("Failed to build account sync")?;
            handles.push(tokio::spawn(sync.run(shutdown_tx.subscribe())));
        }
    }

    // Run until interrupted.
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    info!("Interrupt received, shutting down");
    let _ = shutdown_tx.send(());

    if let Some(min_pct) = args.export_cycles {
        if let Err(e) = scanner.export_profitable_cycles(min_pct).await {
            warn!("Cycle export failed: {e:#}");
        }
    }

    for handle in handles {
        let _ = handle.await;
    }

    if let Some(state_file) = &config.wallet.state_file {
        wallet
            .save(state_file)
            .with_context(|| format!("Failed to save wallet state to {:?}", state_file))?;
        info!(file = %state_file.display(), "Wallet state saved");
    }
    wallet.log_all();

    let stats = simulator.stats();
    info!(
        trades = stats.total_trades,
        cumulative_profit = %stats.cumulative_profit,
        "Shutdown complete"
    );
    Ok(())
}

/// REST catalog with a static pairs-file fallback.
async fn load_catalog(http: &reqwest::Client, config: &BotConfig) -> Result<ProductCatalog> {
    match ProductCatalog::fetch(http, &config.market.rest_base_url).await {
        Ok(catalog) => Ok(catalog),
        Err(e) => match &config.market.pairs_file {
            Some(path) => {
                warn!("Catalog fetch failed ({e}), falling back to {:?}", path);
                ProductCatalog::from_pairs_file(path, &config.market.quote_assets)
                    .context("Static pairs file fallback failed")
            }
            None => Err(e).context("Catalog fetch failed and no pairs_file configured"),
        },
    }
}

/// Wallet from the persisted state file when present, config seed otherwise.
fn load_wallet(config: &BotConfig) -> Wallet {
    if let Some(path) = &config.wallet.state_file {
        if path.exists() {
            match Wallet::load(path) {
                Ok(wallet) => {
                    info!(file = %path.display(), "Wallet state loaded");
                    return wallet;
                }
                Err(e) => warn!("Failed to load wallet state ({e}), seeding from config"),
            }
        }
    }
    Wallet::with_balances(
        config
            .wallet
            .initial
            .iter()
            .map(|(asset, amount)| (asset.clone(), *amount)),
    )
}

/// Initialize the global tracing subscriber.
fn init_tracing(level: &str) -> Result<()> {
    let level: Level = level
        .parse()
        .with_context(|| format!("Invalid log level {level:?}"))?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}
