//! The trading core: depth-aware cycle simulation and atomic execution.
//!
//! One depth-walk primitive backs everything: the shadow-wallet profit
//! estimate, local fill simulation, and live order sizing all call
//! [`Simulator::depth_fill`], so a cycle that estimates profitable fills
//! identically when executed.
//!
//! `execute` is the only path that moves balances. It re-checks
//! profitability on the freshest books, takes the cycle's asset locks in
//! lexicographic order (two cycles sharing an asset serialize; disjoint
//! cycles run in parallel), runs the three legs inside a wallet
//! transaction, and commits only if all three succeed. In live mode a
//! failed leg additionally triggers best-effort reversal of the legs that
//! already filled on the venue.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use arb_common::{OrderBook, Side, SymbolFilter};
use arb_market::{DirectedEdge, ProductCatalog, Triangle, TriangleCatalog};

use crate::executor::Executor;
use crate::logs::TradeLogs;
use crate::wallet::{Wallet, WalletTransaction};

/// Sentinel estimate for a cycle whose legs cannot fill.
const ESTIMATE_FAILED: Decimal = Decimal::NEGATIVE_ONE;

/// Profits smaller than this are treated as noise in the running totals.
const PROFIT_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 8); // 1e-8

/// Named reasons the depth-walk primitive can refuse a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillFailure {
    /// The active side has no levels or a non-positive best price.
    EmptyBook,
    /// Below the symbol's minimum quantity or notional.
    BelowFilter,
    /// Nothing filled at all.
    NoFill,
    /// Filled less than the configured fraction of the desired quantity.
    UnderFillRatio,
    /// Average price strayed too far from top-of-book.
    OverSlippage,
}

impl fmt::Display for FillFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FillFailure::EmptyBook => "EMPTY_BOOK",
            FillFailure::BelowFilter => "BELOW_FILTER",
            FillFailure::NoFill => "NO_FILL",
            FillFailure::UnderFillRatio => "UNDER_FILL_RATIO",
            FillFailure::OverSlippage => "OVER_SLIPPAGE",
        };
        f.write_str(s)
    }
}

/// A priced fill produced by the depth-walk primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillPlan {
    /// Base quantity filled.
    pub filled: Decimal,
    /// Average fill price.
    pub avg_price: Decimal,
    /// Quote amount before fees.
    pub gross: Decimal,
    /// Quote amount after fees: proceeds net of fee for a sell, cost
    /// including fee for a buy.
    pub net: Decimal,
    /// `|avg_price - best| / best` against the pre-walk top of book.
    pub slippage: Decimal,
}

/// Why an `execute` call was rejected or aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeFailure {
    /// A leg's re-fetched book was one-sided or empty.
    EmptyBook { leg: usize },
    /// The fresh-book estimate was negative (or a leg could not fill).
    Unprofitable,
    /// The fresh-book estimate was below the absolute profit floor.
    BelowMinProfit,
    /// Leg `leg` failed; `detail` names the underlying cause.
    Leg { leg: usize, detail: String },
}

impl fmt::Display for TradeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeFailure::EmptyBook { leg } => write!(f, "LEG{}_EMPTY_OB", leg),
            TradeFailure::Unprofitable => f.write_str("UNPROFITABLE_OR_FILL_FAIL"),
            TradeFailure::BelowMinProfit => f.write_str("BELOW_MIN_PROFIT_USDT"),
            TradeFailure::Leg { leg, .. } => write!(f, "LEG{}_FAIL", leg),
        }
    }
}

/// Summary of a committed cycle execution.
#[derive(Debug, Clone, Copy)]
pub struct TradeReport {
    /// Wallet valuation before the cycle, in the valuation asset.
    pub start_value: Decimal,
    /// Wallet valuation after the cycle.
    pub end_value: Decimal,
    /// Absolute profit.
    pub profit_abs: Decimal,
    /// Profit as a percentage of the starting valuation.
    pub profit_pct: Decimal,
}

/// One successfully filled live leg, captured for best-effort reversal.
#[derive(Debug, Clone)]
struct ReversibleLeg {
    symbol: String,
    is_sell: bool,
    filled_base: Decimal,
}

/// Running execution totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct TradeStats {
    /// Cycles committed.
    pub total_trades: u64,
    /// Sum of realized profits, valuation-asset units.
    pub cumulative_profit: Decimal,
}

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Per-leg fee fraction (e.g. 0.001).
    pub fee: Decimal,
    /// Max tolerated `|avg - best| / best` per leg.
    pub slippage_tolerance: Decimal,
    /// Per-leg sizing as a fraction of the free balance.
    pub max_fraction_per_trade: Decimal,
    /// Minimum fill ratio vs. desired quantity.
    pub min_fill_ratio: Decimal,
    /// Minimum absolute profit (valuation asset) to accept a cycle.
    pub min_profit_usdt: Decimal,
    /// Asset everything is valued in.
    pub valuation_asset: String,
    /// Execute through the venue instead of local fill simulation.
    pub live: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            fee: Decimal::new(1, 3),                 // 0.1%
            slippage_tolerance: Decimal::new(1, 2),  // 1%
            max_fraction_per_trade: Decimal::new(25, 2), // 25% of free balance
            min_fill_ratio: Decimal::new(9, 1),      // 90%
            min_profit_usdt: Decimal::ONE,
            valuation_asset: "USDT".to_string(),
            live: false,
        }
    }
}

/// Depth-aware multi-leg trade simulator and executor.
pub struct Simulator {
    config: SimulatorConfig,
    wallet: Arc<Wallet>,
    executor: Arc<dyn Executor>,
    logs: Arc<TradeLogs>,
    filters: HashMap<String, SymbolFilter>,
    /// One lock per catalog asset, always acquired in lexicographic order.
    asset_locks: BTreeMap<String, AsyncMutex<()>>,
    stats: Mutex<TradeStats>,
}

impl Simulator {
    /// Build a simulator over the given catalogs. Asset locks and symbol
    /// filters are sized here, once; nothing grows during trading.
    pub fn new(
        config: SimulatorConfig,
        wallet: Arc<Wallet>,
        executor: Arc<dyn Executor>,
        products: &ProductCatalog,
        triangles: &TriangleCatalog,
        logs: Arc<TradeLogs>,
    ) -> Self {
        let filters = products
            .symbols()
            .iter()
            .map(|s| (s.symbol.clone(), s.filter))
            .collect();
        let asset_locks = triangles
            .assets()
            .iter()
            .map(|a| (a.clone(), AsyncMutex::new(())))
            .collect();
        Self {
            config,
            wallet,
            executor,
            logs,
            filters,
            asset_locks,
            stats: Mutex::new(TradeStats::default()),
        }
    }

    /// Running totals.
    pub fn stats(&self) -> TradeStats {
        *self.stats.lock()
    }

    // ========================================================================
    // Depth-walk primitive
    // ========================================================================

    /// Walk the book to fill `desired_base` units, applying the symbol
    /// filter, fill-ratio, and slippage gates. Non-mutating; every path
    /// that prices a fill goes through here.
    pub fn depth_fill(
        &self,
        symbol: &str,
        book: &OrderBook,
        is_sell: bool,
        desired_base: Decimal,
    ) -> Result<FillPlan, FillFailure> {
        let levels = if is_sell { &book.bids } else { &book.asks };
        let best_price = match levels.first() {
            Some(level) if level.price > Decimal::ZERO => level.price,
            _ => return Err(FillFailure::EmptyBook),
        };

        let filter = self
            .filters
            .get(symbol)
            .copied()
            .unwrap_or(SymbolFilter::new(Decimal::ZERO, Decimal::ZERO));
        if !filter.accepts(desired_base, best_price) {
            return Err(FillFailure::BelowFilter);
        }

        let (filled, gross, avg_price) = if is_sell {
            book.proceeds_to_sell(desired_base)
        } else {
            book.cost_to_buy(desired_base)
        };
        let Some(avg_price) = avg_price else {
            return Err(FillFailure::NoFill);
        };
        if filled < desired_base * self.config.min_fill_ratio {
            return Err(FillFailure::UnderFillRatio);
        }

        let slippage = (avg_price - best_price).abs() / best_price;
        if slippage > self.config.slippage_tolerance {
            return Err(FillFailure::OverSlippage);
        }

        let net = if is_sell {
            gross * (Decimal::ONE - self.config.fee)
        } else {
            gross * (Decimal::ONE + self.config.fee)
        };

        Ok(FillPlan {
            filled,
            avg_price,
            gross,
            net,
            slippage,
        })
    }

    /// Per-leg sizing: `max_fraction_per_trade` of the relevant free
    /// balance, converted to base units through the best ask for buys.
    fn desired_base(
        &self,
        edge: &DirectedEdge,
        free: impl Fn(&str) -> Decimal,
        book: &OrderBook,
    ) -> Result<Decimal, FillFailure> {
        if edge.is_sell() {
            Ok(free(&edge.base) * self.config.max_fraction_per_trade)
        } else {
            let best_ask = match book.best_ask() {
                Some(ask) if ask > Decimal::ZERO => ask,
                _ => return Err(FillFailure::EmptyBook),
            };
            Ok(free(&edge.quote) * self.config.max_fraction_per_trade / best_ask)
        }
    }

    // ========================================================================
    // Shadow estimate
    // ========================================================================

    /// Full depth-walk profit estimate in the valuation asset, run against
    /// shadow balances only. Returns -1 when any leg cannot fill.
    pub fn estimate_profit_usdt(
        &self,
        tri: &Triangle,
        ob1: &OrderBook,
        ob2: &OrderBook,
        ob3: &OrderBook,
    ) -> Decimal {
        let books = [ob1, ob2, ob3];

        // Capture the real wallet's free balances into shadows.
        let mut shadow: HashMap<String, Decimal> = HashMap::new();
        for edge in &tri.legs {
            for asset in [&edge.base, &edge.quote] {
                shadow
                    .entry(asset.clone())
                    .or_insert_with(|| self.wallet.get_free(asset));
            }
        }
        shadow
            .entry(self.config.valuation_asset.clone())
            .or_insert_with(|| self.wallet.get_free(&self.config.valuation_asset));

        let start_value = self.value_shadow(&shadow, tri, &books);

        for (edge, book) in tri.legs.iter().zip(books.iter().copied()) {
            let free = |asset: &str| shadow.get(asset).copied().unwrap_or(Decimal::ZERO);
            let desired = match self.desired_base(edge, free, book) {
                Ok(d) => d,
                Err(_) => return ESTIMATE_FAILED,
            };
            let plan = match self.depth_fill(&edge.symbol, book, edge.is_sell(), desired) {
                Ok(p) => p,
                Err(_) => return ESTIMATE_FAILED,
            };

            if edge.is_sell() {
                let base = shadow.entry(edge.base.clone()).or_default();
                if *base < plan.filled {
                    return ESTIMATE_FAILED;
                }
                *base -= plan.filled;
                *shadow.entry(edge.quote.clone()).or_default() += plan.net;
            } else {
                let quote = shadow.entry(edge.quote.clone()).or_default();
                if *quote < plan.net {
                    return ESTIMATE_FAILED;
                }
                *quote -= plan.net;
                *shadow.entry(edge.base.clone()).or_default() += plan.filled;
            }
        }

        let end_value = self.value_shadow(&shadow, tri, &books);
        end_value - start_value
    }

    /// Value shadow balances in the valuation asset using top-of-book from
    /// the cycle's own books, chaining at most two hops.
    fn value_shadow(
        &self,
        shadow: &HashMap<String, Decimal>,
        tri: &Triangle,
        books: &[&OrderBook; 3],
    ) -> Decimal {
        shadow
            .iter()
            .filter(|(_, amount)| **amount > Decimal::ZERO)
            .map(|(asset, amount)| {
                self.valuation_rate(asset, tri, books, 0)
                    .map(|rate| *amount * rate)
                    .unwrap_or(Decimal::ZERO)
            })
            .sum()
    }

    /// Conversion rate from `asset` to the valuation asset through the
    /// cycle's edges. `depth` bounds the recursion at two hops.
    fn valuation_rate(
        &self,
        asset: &str,
        tri: &Triangle,
        books: &[&OrderBook; 3],
        depth: usize,
    ) -> Option<Decimal> {
        if asset == self.config.valuation_asset {
            return Some(Decimal::ONE);
        }
        if depth >= 2 {
            return None;
        }

        // Direct hop first: sell at the bid / buy exposure priced at the ask.
        for (edge, book) in tri.legs.iter().zip(books.iter()) {
            if edge.base == asset && edge.quote == self.config.valuation_asset {
                return book.best_bid().filter(|p| *p > Decimal::ZERO);
            }
            if edge.quote == asset && edge.base == self.config.valuation_asset {
                return book
                    .best_ask()
                    .filter(|p| *p > Decimal::ZERO)
                    .map(|ask| Decimal::ONE / ask);
            }
        }

        // Otherwise one hop through an intermediate cycle asset.
        for (edge, book) in tri.legs.iter().zip(books.iter()) {
            if edge.base == asset {
                if let (Some(bid), Some(rest)) = (
                    book.best_bid().filter(|p| *p > Decimal::ZERO),
                    self.valuation_rate(&edge.quote, tri, books, depth + 1),
                ) {
                    return Some(bid * rest);
                }
            }
            if edge.quote == asset {
                if let (Some(ask), Some(rest)) = (
                    book.best_ask().filter(|p| *p > Decimal::ZERO),
                    self.valuation_rate(&edge.base, tri, books, depth + 1),
                ) {
                    return Some(rest / ask);
                }
            }
        }
        None
    }

    // ========================================================================
    // Atomic execution
    // ========================================================================

    /// Execute the cycle atomically. Re-checks profitability on freshly
    /// fetched books, acquires the cycle's asset locks, then runs all
    /// three legs inside a wallet transaction. On any leg failure the
    /// wallet is rolled back (and, live, already-filled legs are reversed
    /// best-effort) before the failure is returned.
    pub async fn execute(&self, tri: &Triangle) -> Result<TradeReport, TradeFailure> {
        // 1. Freshest books, straight from the executor.
        let mut books: Vec<OrderBook> = Vec::with_capacity(3);
        for (i, edge) in tri.legs.iter().enumerate() {
            let book = self
                .executor
                .orderbook_snapshot(&edge.symbol)
                .await
                .map_err(|_| TradeFailure::EmptyBook { leg: i + 1 })?;
            if !book.is_valid() {
                return Err(TradeFailure::EmptyBook { leg: i + 1 });
            }
            books.push(book);
        }

        // 2. Re-check on the fresh books.
        let estimate = self.estimate_profit_usdt(tri, &books[0], &books[1], &books[2]);
        if estimate < Decimal::ZERO {
            return Err(TradeFailure::Unprofitable);
        }
        if estimate < self.config.min_profit_usdt {
            return Err(TradeFailure::BelowMinProfit);
        }

        // 3. Asset locks in lexicographic order; deadlock-free by
        // construction with any concurrent cycle.
        let assets: BTreeSet<&str> = tri
            .legs
            .iter()
            .flat_map(|e| [e.base.as_str(), e.quote.as_str()])
            .collect();
        let mut guards = Vec::with_capacity(assets.len());
        for asset in assets {
            match self.asset_locks.get(asset) {
                Some(lock) => guards.push(lock.lock().await),
                None => {
                    warn!(asset = %asset, "No lock for asset, rejecting cycle");
                    return Err(TradeFailure::Leg {
                        leg: 1,
                        detail: format!("no lock for asset {asset}"),
                    });
                }
            }
        }

        let book_refs = [&books[0], &books[1], &books[2]];
        let start_value = self.wallet_value(tri, &book_refs);

        // 4. All balance movement happens inside one transaction.
        let mut tx = self.wallet.begin_transaction();
        let mut reversible: Vec<ReversibleLeg> = Vec::new();

        // 5. Three legs, strictly sequential.
        for (i, edge) in tri.legs.iter().enumerate() {
            let result = if self.config.live {
                self.run_leg_live(&mut tx, edge, &books[i], &mut reversible)
                    .await
            } else {
                self.run_leg_local(&mut tx, edge, &books[i])
            };

            if let Err(detail) = result {
                warn!(
                    cycle = %tri.key,
                    leg = i + 1,
                    detail = %detail,
                    "Leg failed, rolling back"
                );
                if self.config.live {
                    self.reverse_filled_legs(&tri.key, &reversible).await;
                }
                self.wallet.rollback(&mut tx);
                return Err(TradeFailure::Leg {
                    leg: i + 1,
                    detail,
                });
            }
        }

        // 6. Commit and account.
        self.wallet.commit(&mut tx);

        let end_value = self.wallet_value(tri, &book_refs);
        let profit_abs = end_value - start_value;
        let profit_pct = if start_value > Decimal::ZERO {
            profit_abs / start_value * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        self.logs
            .log_trade(&tri.path(), start_value, end_value, profit_pct);
        if profit_abs > PROFIT_EPSILON {
            let mut stats = self.stats.lock();
            stats.total_trades += 1;
            stats.cumulative_profit += profit_abs;
        }

        info!(
            cycle = %tri.path(),
            start = %start_value,
            end = %end_value,
            profit_pct = %profit_pct,
            "Cycle committed"
        );

        Ok(TradeReport {
            start_value,
            end_value,
            profit_abs,
            profit_pct,
        })
    }

    /// Value the real wallet's free balances over the cycle's assets.
    fn wallet_value(&self, tri: &Triangle, books: &[&OrderBook; 3]) -> Decimal {
        let mut balances: HashMap<String, Decimal> = HashMap::new();
        for edge in &tri.legs {
            for asset in [&edge.base, &edge.quote] {
                balances
                    .entry(asset.clone())
                    .or_insert_with(|| self.wallet.get_free(asset));
            }
        }
        balances
            .entry(self.config.valuation_asset.clone())
            .or_insert_with(|| self.wallet.get_free(&self.config.valuation_asset));
        self.value_shadow(&balances, tri, books)
    }

    /// One leg against the local book: price through the primitive, then
    /// move balances inside the transaction.
    fn run_leg_local(
        &self,
        tx: &mut WalletTransaction,
        edge: &DirectedEdge,
        book: &OrderBook,
    ) -> Result<(), String> {
        let free = |asset: &str| self.wallet.get_free(asset);
        let desired = self
            .desired_base(edge, free, book)
            .map_err(|f| f.to_string())?;

        let t0 = Instant::now();
        let plan = self
            .depth_fill(&edge.symbol, book, edge.is_sell(), desired)
            .map_err(|f| f.to_string())?;
        let latency_ms = t0.elapsed().as_millis() as u64;

        let fill_ratio = if desired > Decimal::ZERO {
            plan.filled / desired
        } else {
            Decimal::ZERO
        };
        let side = if edge.is_sell() { Side::Sell } else { Side::Buy };
        self.logs.log_leg(
            &edge.symbol,
            &side.to_string(),
            desired,
            plan.filled,
            fill_ratio,
            plan.slippage,
            latency_ms,
        );

        self.apply_fill(tx, edge, plan.filled, plan.net)
    }

    /// One leg through the venue: size from the fresh book, submit, gate on
    /// fill ratio and slippage, then move balances.
    async fn run_leg_live(
        &self,
        tx: &mut WalletTransaction,
        edge: &DirectedEdge,
        book: &OrderBook,
        reversible: &mut Vec<ReversibleLeg>,
    ) -> Result<(), String> {
        let free = |asset: &str| self.wallet.get_free(asset);
        let desired = self
            .desired_base(edge, free, book)
            .map_err(|f| f.to_string())?;
        if desired <= Decimal::ZERO {
            return Err(FillFailure::NoFill.to_string());
        }

        let side = if edge.is_sell() { Side::Sell } else { Side::Buy };
        let best = if edge.is_sell() {
            book.best_bid()
        } else {
            book.best_ask()
        };

        let t0 = Instant::now();
        let result = self
            .executor
            .place_market_order(&edge.symbol, side, desired)
            .await
            .map_err(|e| format!("ORDER_ERROR: {e}"))?;
        let latency_ms = t0.elapsed().as_millis() as u64;

        if !result.success || result.filled_qty <= Decimal::ZERO {
            return Err(format!("ORDER_FAIL: {}", result.message));
        }

        // The venue has filled; from here on the leg must be reversed if
        // anything later fails.
        reversible.push(ReversibleLeg {
            symbol: edge.symbol.clone(),
            is_sell: edge.is_sell(),
            filled_base: result.filled_qty,
        });

        let fill_ratio = result.filled_qty / desired;
        let slippage = match best {
            Some(best) if best > Decimal::ZERO => (result.avg_price - best).abs() / best,
            _ => Decimal::ZERO,
        };
        self.logs.log_leg(
            &edge.symbol,
            &side.to_string(),
            desired,
            result.filled_qty,
            fill_ratio,
            slippage,
            latency_ms,
        );

        if fill_ratio < self.config.min_fill_ratio {
            return Err(FillFailure::UnderFillRatio.to_string());
        }
        if slippage > self.config.slippage_tolerance {
            return Err(FillFailure::OverSlippage.to_string());
        }

        let net = if edge.is_sell() {
            result.cost_or_proceeds * (Decimal::ONE - self.config.fee)
        } else {
            result.cost_or_proceeds * (Decimal::ONE + self.config.fee)
        };
        self.apply_fill(tx, edge, result.filled_qty, net)
    }

    /// Move one leg's balances inside the transaction. Any rejected apply
    /// aborts the leg.
    fn apply_fill(
        &self,
        tx: &mut WalletTransaction,
        edge: &DirectedEdge,
        filled: Decimal,
        net: Decimal,
    ) -> Result<(), String> {
        let ok = if edge.is_sell() {
            self.wallet.apply(tx, &edge.base, -filled, Decimal::ZERO)
                && self.wallet.apply(tx, &edge.quote, net, Decimal::ZERO)
        } else {
            self.wallet.apply(tx, &edge.quote, -net, Decimal::ZERO)
                && self.wallet.apply(tx, &edge.base, filled, Decimal::ZERO)
        };
        if ok {
            Ok(())
        } else {
            Err("WALLET_APPLY_REJECTED".to_string())
        }
    }

    /// Issue opposite-side market orders for every filled leg, newest
    /// first. Best-effort: reversal failures are logged, never retried.
    async fn reverse_filled_legs(&self, cycle_key: &str, legs: &[ReversibleLeg]) {
        for leg in legs.iter().rev() {
            let side = if leg.is_sell { Side::Buy } else { Side::Sell };
            warn!(
                symbol = %leg.symbol,
                side = %side,
                qty = %leg.filled_base,
                "Reversing filled leg"
            );
            self.logs
                .log_failure(cycle_key, &format!("REVERSAL {}", leg.symbol));
            match self
                .executor
                .place_market_order(&leg.symbol, side, leg.filled_base)
                .await
            {
                Ok(result) if result.success => {
                    debug!(symbol = %leg.symbol, filled = %result.filled_qty, "Reversal filled");
                }
                Ok(result) => {
                    warn!(symbol = %leg.symbol, "Reversal rejected: {}", result.message);
                }
                Err(e) => {
                    warn!(symbol = %leg.symbol, "Reversal error: {e}");
                }
            }
        }
    }
}
