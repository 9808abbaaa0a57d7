//! Incremental cycle scanner.
//!
//! Each book update re-scores only the cycles referencing the updated
//! symbol, through a semaphore-bounded scoring pool. Scores feed a
//! best-cycle priority queue whose stale entries are discarded lazily on
//! pop. A cycle whose cheap estimate clears the configured threshold gets
//! a full depth-walk re-check and, if that also clears, an execution
//! attempt gated by per-cycle cooldown and a rolling failure window.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use arb_market::{OrderBookStore, Triangle, TriangleCatalog};

use crate::logs::{ProfitableCycleRow, TradeLogs};
use crate::simulator::Simulator;

/// Sentinel profit for cycles with incomplete data or a blacklist hit.
pub const SENTINEL_PROFIT: Decimal = Decimal::from_parts(999, 0, 0, true, 0); // -999

/// Configuration for the scanner.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Per-leg fee fraction used by the cheap estimate.
    pub fee: Decimal,
    /// Cheap-profit percent that triggers the full re-check.
    pub profit_threshold_pct: Decimal,
    /// Minimum absolute profit (valuation asset) to attempt execution.
    pub min_profit_usdt: Decimal,
    /// Minimum interval between two execution attempts of one cycle key.
    pub cooldown: Duration,
    /// Rolling window for failure accounting.
    pub fail_window: Duration,
    /// Failures within the window that blacklist a cycle.
    pub max_fails_in_window: usize,
    /// Cycles rescanned per symbol update, at most.
    pub top_n_per_symbol: usize,
    /// Concurrent scoring tasks.
    pub scan_workers: usize,
    /// Books older than this are not trusted for execution.
    pub max_staleness_ms: i64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            fee: Decimal::new(1, 3),                  // 0.1%
            profit_threshold_pct: Decimal::new(2, 1), // 0.2%
            min_profit_usdt: Decimal::ONE,
            cooldown: Duration::from_secs(10),
            fail_window: Duration::from_secs(60),
            max_fails_in_window: 3,
            top_n_per_symbol: 50,
            scan_workers: 4,
            max_staleness_ms: 10_000,
        }
    }
}

/// Max-heap entry for the best-cycle queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TriPriority {
    profit: Decimal,
    cycle_id: usize,
}

impl Ord for TriPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.profit
            .cmp(&other.profit)
            .then_with(|| self.cycle_id.cmp(&other.cycle_id))
    }
}

impl PartialOrd for TriPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct QueueState {
    heap: BinaryHeap<TriPriority>,
    /// Latest score per cycle id; a popped entry whose stored profit no
    /// longer matches is stale and discarded.
    last_profits: Vec<Decimal>,
}

/// Scans cycles on book updates and hands qualifying ones to the simulator.
pub struct Scanner {
    config: ScannerConfig,
    triangles: Arc<TriangleCatalog>,
    store: Arc<OrderBookStore>,
    simulator: Arc<Simulator>,
    logs: Arc<TradeLogs>,
    pool: Arc<Semaphore>,
    queue: Mutex<QueueState>,
    /// Last execution attempt per cycle key (cooldown).
    attempts: Mutex<HashMap<String, Instant>>,
    /// Rolling failure timestamps per cycle key (blacklist).
    failures: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Scanner {
    /// Create a scanner over the given catalogs.
    pub fn new(
        config: ScannerConfig,
        triangles: Arc<TriangleCatalog>,
        store: Arc<OrderBookStore>,
        simulator: Arc<Simulator>,
        logs: Arc<TradeLogs>,
    ) -> Self {
        let workers = config.scan_workers.max(1);
        let cycle_count = triangles.len();
        Self {
            config,
            triangles,
            store,
            simulator,
            logs,
            pool: Arc::new(Semaphore::new(workers)),
            queue: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                last_profits: vec![SENTINEL_PROFIT; cycle_count],
            }),
            attempts: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Consume symbol-update notifications until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut updates: mpsc::UnboundedReceiver<String>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Scanner started");
        loop {
            tokio::select! {
                symbol = updates.recv() => {
                    match symbol {
                        Some(symbol) => self.on_symbol_update(&symbol).await,
                        None => {
                            info!("Update channel closed, scanner exiting");
                            return;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Scanner: shutdown signal received");
                    return;
                }
            }
        }
    }

    /// Rescan the cycles referencing `symbol` and act on the best one.
    pub async fn on_symbol_update(&self, symbol: &str) {
        let t0 = Instant::now();
        let ids = self.triangles.cycles_for_symbol(symbol);
        if ids.is_empty() {
            return;
        }
        let scan_ids = &ids[..ids.len().min(self.config.top_n_per_symbol)];

        let scores = self.score_cycles(scan_ids).await;

        let mut best: Option<(usize, Decimal)> = None;
        {
            let mut queue = self.queue.lock();
            for &(id, profit) in &scores {
                queue.last_profits[id] = profit;
                queue.heap.push(TriPriority {
                    profit,
                    cycle_id: id,
                });
                if profit != SENTINEL_PROFIT
                    && best.map(|(_, p)| profit > p).unwrap_or(true)
                {
                    best = Some((id, profit));
                }
            }
        }

        let best_profit = best.map(|(_, p)| p).unwrap_or(SENTINEL_PROFIT);
        let latency_ms = t0.elapsed().as_millis() as u64;
        self.logs
            .log_scan(symbol, scores.len(), best_profit, latency_ms);
        debug!(
            symbol = %symbol,
            scanned = scores.len(),
            best = %best_profit,
            latency_ms,
            "Symbol rescan"
        );

        if let Some((id, profit)) = best {
            if profit > self.config.profit_threshold_pct {
                self.try_execute(id, profit).await;
            }
        }
    }

    /// Score a batch of cycles through the bounded pool. Blacklisted
    /// cycles score as the sentinel without touching any book.
    async fn score_cycles(&self, ids: &[usize]) -> Vec<(usize, Decimal)> {
        let mut results = Vec::with_capacity(ids.len());
        let mut tasks = JoinSet::new();

        for &id in ids {
            let Some(tri) = self.triangles.get(id) else {
                continue;
            };
            if self.is_blacklisted(&tri.key) {
                results.push((id, SENTINEL_PROFIT));
                continue;
            }

            let tri = tri.clone();
            let store = self.store.clone();
            let fee = self.config.fee;
            let pool = self.pool.clone();
            tasks.spawn(async move {
                let _permit = pool.acquire_owned().await.ok();
                (id, cheap_profit(&tri, &store, fee))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(scored) => results.push(scored),
                Err(e) => warn!("Scoring task panicked: {e}"),
            }
        }
        results
    }

    /// Full re-check and execution attempt for one cycle.
    async fn try_execute(&self, id: usize, cheap_pct: Decimal) {
        let Some(tri) = self.triangles.get(id) else {
            return;
        };

        // Fresh books from the store; stale or one-sided books end the
        // attempt before any deeper work.
        let mut books = Vec::with_capacity(3);
        for edge in &tri.legs {
            if self.store.is_stale(&edge.symbol, self.config.max_staleness_ms) {
                debug!(cycle = %tri.key, symbol = %edge.symbol, "Book stale, skipping");
                return;
            }
            match self.store.get(&edge.symbol) {
                Some(book) if book.is_valid() => books.push(book),
                _ => return,
            }
        }

        let estimate = self
            .simulator
            .estimate_profit_usdt(tri, &books[0], &books[1], &books[2]);
        if estimate <= Decimal::ZERO || estimate < self.config.min_profit_usdt {
            debug!(
                cycle = %tri.key,
                cheap_pct = %cheap_pct,
                estimate = %estimate,
                "Full re-check below floor"
            );
            return;
        }

        // Cooldown, then stamp the attempt before executing.
        {
            let mut attempts = self.attempts.lock();
            if let Some(last) = attempts.get(&tri.key) {
                if last.elapsed() < self.config.cooldown {
                    debug!(cycle = %tri.key, "Cooldown active, skipping");
                    return;
                }
            }
            attempts.insert(tri.key.clone(), Instant::now());
        }

        info!(
            cycle = %tri.path(),
            cheap_pct = %cheap_pct,
            estimate_usdt = %estimate,
            "Executing cycle"
        );
        match self.simulator.execute(tri).await {
            Ok(report) => {
                info!(
                    cycle = %tri.path(),
                    profit = %report.profit_abs,
                    profit_pct = %report.profit_pct,
                    "Cycle executed"
                );
            }
            Err(failure) => {
                self.record_failure(&tri.key, &failure.to_string());
            }
        }
    }

    /// Record a failure into the rolling window and the fail log.
    pub fn record_failure(&self, cycle_key: &str, reason: &str) {
        warn!(cycle = %cycle_key, reason = %reason, "Cycle execution failed");
        self.logs.log_failure(cycle_key, reason);

        let mut failures = self.failures.lock();
        let window = failures.entry(cycle_key.to_string()).or_default();
        window.push_back(Instant::now());
        Self::prune_window(window, self.config.fail_window);
    }

    /// True while the cycle's rolling window holds the threshold count.
    pub fn is_blacklisted(&self, cycle_key: &str) -> bool {
        let mut failures = self.failures.lock();
        let Some(window) = failures.get_mut(cycle_key) else {
            return false;
        };
        Self::prune_window(window, self.config.fail_window);
        window.len() >= self.config.max_fails_in_window
    }

    fn prune_window(window: &mut VecDeque<Instant>, max_age: Duration) {
        while let Some(front) = window.front() {
            if front.elapsed() > max_age {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Re-score every cycle concurrently, rebuild the queue, and return
    /// the cycles at or above `min_profit_pct`, best first.
    pub async fn rescore_all_concurrently(
        &self,
        min_profit_pct: Decimal,
    ) -> Vec<(usize, Decimal)> {
        let t0 = Instant::now();
        let ids: Vec<usize> = (0..self.triangles.len()).collect();
        let scores = self.score_cycles(&ids).await;

        let mut queue = self.queue.lock();
        queue.heap.clear();
        for &(id, profit) in &scores {
            queue.last_profits[id] = profit;
            queue.heap.push(TriPriority {
                profit,
                cycle_id: id,
            });
        }
        drop(queue);

        let mut qualifying: Vec<(usize, Decimal)> = scores
            .into_iter()
            .filter(|(_, p)| *p != SENTINEL_PROFIT && *p >= min_profit_pct)
            .collect();
        qualifying.sort_by(|a, b| b.1.cmp(&a.1));

        info!(
            cycles = self.triangles.len(),
            qualifying = qualifying.len(),
            latency_ms = t0.elapsed().as_millis() as u64,
            "Full rescore complete"
        );
        qualifying
    }

    /// Re-score everything and materialize the profitable-cycles CSV.
    pub async fn export_profitable_cycles(&self, min_profit_pct: Decimal) -> anyhow::Result<()> {
        let qualifying = self.rescore_all_concurrently(min_profit_pct).await;
        let rows: Vec<ProfitableCycleRow> = qualifying
            .iter()
            .enumerate()
            .filter_map(|(rank, &(id, profit))| {
                self.triangles.get(id).map(|tri| ProfitableCycleRow {
                    rank: rank + 1,
                    cycle_id: id,
                    profit_pct: profit,
                    path: tri.path(),
                })
            })
            .collect();
        let path = self.logs.export_profitable_cycles(&rows)?;
        info!(rows = rows.len(), path = %path.display(), "Profitable cycles exported");
        Ok(())
    }

    /// Pop the freshest best cycle, lazily discarding entries whose stored
    /// profit no longer matches the latest score.
    pub fn get_best_cycle(&self) -> Option<(Decimal, usize)> {
        let mut queue = self.queue.lock();
        while let Some(entry) = queue.heap.pop() {
            if entry.profit == SENTINEL_PROFIT {
                continue;
            }
            if queue.last_profits[entry.cycle_id] == entry.profit {
                return Some((entry.profit, entry.cycle_id));
            }
        }
        None
    }
}

/// Top-of-book profit estimate for one cycle, walking notional 1 through
/// the three legs: multiply by the bid on a forward edge, divide by the ask
/// on an inverse edge, shaving the fee after each leg. Returns the sentinel
/// when any book is missing, one-sided, or non-positively priced.
pub fn cheap_profit(tri: &Triangle, store: &OrderBookStore, fee: Decimal) -> Decimal {
    let mut amount = Decimal::ONE;
    for edge in &tri.legs {
        let Some(book) = store.get(&edge.symbol) else {
            return SENTINEL_PROFIT;
        };
        if edge.is_sell() {
            match book.best_bid() {
                Some(bid) if bid > Decimal::ZERO => amount *= bid,
                _ => return SENTINEL_PROFIT,
            }
        } else {
            match book.best_ask() {
                Some(ask) if ask > Decimal::ZERO => amount /= ask,
                _ => return SENTINEL_PROFIT,
            }
        }
        amount *= Decimal::ONE - fee;
    }
    (amount - Decimal::ONE) * Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_common::{OrderBook, PriceLevel, SymbolFilter};
    use arb_market::catalog::SymbolInfo;
    use arb_market::ProductCatalog;
    use rust_decimal_macros::dec;

    use crate::executor::{dry::DryExecutor, dry::DryExecutorConfig, limiter::ThrottleGate};
    use crate::simulator::SimulatorConfig;
    use crate::wallet::Wallet;

    fn products() -> ProductCatalog {
        let infos = [
            ("BTCUSDT", "BTC", "USDT"),
            ("ETHUSDT", "ETH", "USDT"),
            ("ETHBTC", "ETH", "BTC"),
        ]
        .into_iter()
        .map(|(s, b, q)| SymbolInfo {
            symbol: s.to_string(),
            base: b.to_string(),
            quote: q.to_string(),
            filter: SymbolFilter::new(Decimal::ZERO, Decimal::ZERO),
        })
        .collect();
        ProductCatalog::from_symbols(infos).unwrap()
    }

    fn publish(store: &OrderBookStore, symbol: &str, bid: Decimal, ask: Decimal) {
        let mut book = OrderBook::new();
        book.apply_snapshot(
            vec![PriceLevel::new(bid, dec!(100))],
            vec![PriceLevel::new(ask, dec!(100))],
            chrono::Utc::now().timestamp_millis(),
        );
        store.publish(symbol, book);
    }

    fn scanner_with(config: ScannerConfig) -> (Arc<Scanner>, Arc<OrderBookStore>, Arc<TriangleCatalog>) {
        let products = products();
        let triangles = Arc::new(TriangleCatalog::build(&products));
        let store = Arc::new(OrderBookStore::new(triangles.subscribed_symbols()));
        let wallet = Arc::new(Wallet::with_balances([("USDT", dec!(1000))]));
        let gate = Arc::new(ThrottleGate::new(100_000, 1000));
        let executor = Arc::new(DryExecutor::new(
            DryExecutorConfig {
                base_latency_ms: 0,
                fail_probability: 0.0,
                ..DryExecutorConfig::default()
            },
            gate,
            store.clone(),
        ));
        let logs = Arc::new(
            TradeLogs::new(std::env::temp_dir().join(format!(
                "arb_scan_test_{}",
                std::process::id()
            )))
            .unwrap(),
        );
        let simulator = Arc::new(Simulator::new(
            SimulatorConfig {
                live: false,
                ..SimulatorConfig::default()
            },
            wallet,
            executor,
            &products,
            &triangles,
            logs.clone(),
        ));
        let scanner = Arc::new(Scanner::new(
            config,
            triangles.clone(),
            store.clone(),
            simulator,
            logs,
        ));
        (scanner, store, triangles)
    }

    fn flat_market(store: &OrderBookStore) {
        publish(store, "BTCUSDT", dec!(30000), dec!(30001));
        publish(store, "ETHUSDT", dec!(1500), dec!(1501));
        publish(store, "ETHBTC", dec!(0.05), dec!(0.0501));
    }

    #[test]
    fn test_cheap_profit_flat_market_is_negative() {
        let (_, store, triangles) = scanner_with(ScannerConfig::default());
        flat_market(&store);
        // With consistent prices every rotation loses roughly the fees.
        for tri in triangles.triangles() {
            let p = cheap_profit(tri, &store, dec!(0.001));
            assert!(p < Decimal::ZERO);
            assert!(p > dec!(-10));
        }
    }

    #[test]
    fn test_cheap_profit_sentinel_on_missing_book() {
        let (_, store, triangles) = scanner_with(ScannerConfig::default());
        publish(&store, "BTCUSDT", dec!(30000), dec!(30001));
        // ETHUSDT and ETHBTC never updated.
        let tri = &triangles.triangles()[0];
        assert_eq!(cheap_profit(tri, &store, dec!(0.001)), SENTINEL_PROFIT);
    }

    #[test]
    fn test_cheap_profit_detects_dislocation() {
        let (_, store, triangles) = scanner_with(ScannerConfig::default());
        // ETH rich vs its BTC cross: buying ETH via BTC and selling for
        // USDT beats fees.
        publish(&store, "BTCUSDT", dec!(30000), dec!(30001));
        publish(&store, "ETHBTC", dec!(0.0499), dec!(0.05));
        publish(&store, "ETHUSDT", dec!(1530), dec!(1531));

        let best = triangles
            .triangles()
            .iter()
            .map(|t| cheap_profit(t, &store, dec!(0.001)))
            .max()
            .unwrap();
        assert!(best > Decimal::ZERO, "best was {best}");
    }

    #[tokio::test]
    async fn test_on_symbol_update_fills_queue() {
        let mut config = ScannerConfig::default();
        config.profit_threshold_pct = dec!(1000); // never execute
        let (scanner, store, _) = scanner_with(config);
        flat_market(&store);

        scanner.on_symbol_update("BTCUSDT").await;
        let (profit, id) = scanner.get_best_cycle().expect("queue populated");
        assert!(profit < Decimal::ZERO);
        assert!(id < scanner.triangles.len());
    }

    #[tokio::test]
    async fn test_get_best_cycle_discards_stale_entries() {
        let mut config = ScannerConfig::default();
        config.profit_threshold_pct = dec!(1000);
        let (scanner, store, _) = scanner_with(config);
        flat_market(&store);
        scanner.on_symbol_update("BTCUSDT").await;

        // Improve the market and rescan; the earlier, worse entries must
        // never surface.
        publish(&store, "ETHBTC", dec!(0.0499), dec!(0.05));
        publish(&store, "ETHUSDT", dec!(1530), dec!(1531));
        scanner.on_symbol_update("ETHBTC").await;

        let (profit, id) = scanner.get_best_cycle().unwrap();
        let current = scanner.queue.lock().last_profits[id];
        assert_eq!(profit, current);
    }

    #[tokio::test]
    async fn test_rescore_all_sorts_descending() {
        let mut config = ScannerConfig::default();
        config.profit_threshold_pct = dec!(1000);
        let (scanner, store, _) = scanner_with(config);
        publish(&store, "BTCUSDT", dec!(30000), dec!(30001));
        publish(&store, "ETHBTC", dec!(0.0499), dec!(0.05));
        publish(&store, "ETHUSDT", dec!(1530), dec!(1531));

        let all = scanner.rescore_all_concurrently(dec!(-100)).await;
        assert!(!all.is_empty());
        for pair in all.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_blacklist_after_threshold_failures() {
        let mut config = ScannerConfig::default();
        config.max_fails_in_window = 3;
        config.fail_window = Duration::from_secs(60);
        let (scanner, _, _) = scanner_with(config);

        assert!(!scanner.is_blacklisted("K"));
        scanner.record_failure("K", "LEG1_FAIL");
        scanner.record_failure("K", "LEG2_FAIL");
        assert!(!scanner.is_blacklisted("K"));
        scanner.record_failure("K", "LEG3_FAIL");
        assert!(scanner.is_blacklisted("K"));
        // Other keys unaffected.
        assert!(!scanner.is_blacklisted("OTHER"));
    }

    #[test]
    fn test_blacklist_window_expires() {
        let mut config = ScannerConfig::default();
        config.max_fails_in_window = 2;
        config.fail_window = Duration::from_millis(20);
        let (scanner, _, _) = scanner_with(config);

        scanner.record_failure("K", "LEG1_FAIL");
        scanner.record_failure("K", "LEG1_FAIL");
        assert!(scanner.is_blacklisted("K"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!scanner.is_blacklisted("K"));
    }

    #[tokio::test]
    async fn test_blacklisted_cycle_scores_sentinel() {
        let mut config = ScannerConfig::default();
        config.max_fails_in_window = 1;
        config.profit_threshold_pct = dec!(1000);
        let (scanner, store, triangles) = scanner_with(config);
        flat_market(&store);

        for tri in triangles.triangles() {
            scanner.record_failure(&tri.key, "LEG1_FAIL");
        }
        let ids: Vec<usize> = (0..triangles.len()).collect();
        let scores = scanner.score_cycles(&ids).await;
        assert!(scores.iter().all(|(_, p)| *p == SENTINEL_PROFIT));
    }

    #[tokio::test]
    async fn test_cooldown_blocks_repeat_attempts() {
        // An attempt at t=0 suppresses another one within the cooldown,
        // with no executor or wallet mutation.
        let mut config = ScannerConfig::default();
        config.min_profit_usdt = Decimal::ZERO;
        config.cooldown = Duration::from_secs(10);
        let (scanner, store, triangles) = scanner_with(config);
        publish(&store, "BTCUSDT", dec!(30000), dec!(30001));
        publish(&store, "ETHBTC", dec!(0.0499), dec!(0.05));
        publish(&store, "ETHUSDT", dec!(1530), dec!(1531));

        // The USDT -> BTC -> ETH -> USDT rotation; the test wallet holds
        // USDT, so its estimate clears the floor.
        let id = triangles
            .triangles()
            .iter()
            .find(|t| {
                t.legs[0].symbol == "BTCUSDT"
                    && t.legs[0].from == "USDT"
                    && t.legs[1].symbol == "ETHBTC"
            })
            .unwrap()
            .id;

        scanner.try_execute(id, dec!(1)).await;
        let key = &triangles.get(id).unwrap().key;
        let first_attempt = *scanner.attempts.lock().get(key).expect("attempt stamped");

        scanner.try_execute(id, dec!(1)).await;
        // Same stamp: the second attempt was skipped inside the cooldown.
        assert_eq!(scanner.attempts.lock().get(key), Some(&first_attempt));
    }
}
