//! Triangular arbitrage engine for a centralized spot exchange.
//!
//! Depth updates stream in over multiplexed WebSocket connections; every
//! update re-scores the cycles that reference the updated symbol; a cycle
//! whose estimate survives the cheap check, the full depth-walk re-check,
//! the cooldown, and the failure blacklist is executed atomically against
//! a transactional wallet, either as a local fill simulation or through
//! the live venue.
//!
//! ## Modules
//!
//! - `config`: TOML configuration with env and CLI overrides
//! - `wallet`: transactional balance store with rollback
//! - `scanner`: incremental cycle rescoring, cooldown, blacklist
//! - `simulator`: depth-walk pricing and atomic three-leg execution
//! - `executor`: venue capability trait, dry and live variants, throttling
//! - `sync`: live-mode wallet refresh from the venue
//! - `logs`: append-only CSV sinks

pub mod config;
pub mod executor;
pub mod logs;
pub mod scanner;
pub mod simulator;
pub mod sync;
pub mod wallet;

pub use config::{BotConfig, Credentials, EngineConfig, ExecutionConfig, MarketConfig, WalletConfig};
pub use executor::dry::{DryExecutor, DryExecutorConfig};
pub use executor::limiter::ThrottleGate;
pub use executor::real::{RealExecutor, RealExecutorConfig};
pub use executor::{Executor, ExecutorError};
pub use logs::{ProfitableCycleRow, TradeLogs};
pub use scanner::{cheap_profit, Scanner, ScannerConfig, SENTINEL_PROFIT};
pub use simulator::{
    FillFailure, FillPlan, Simulator, SimulatorConfig, TradeFailure, TradeReport, TradeStats,
};
pub use sync::{AccountSync, AccountSyncConfig};
pub use wallet::{Wallet, WalletError, WalletTransaction};
