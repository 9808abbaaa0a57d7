//! Order book and execution primitives shared by every crate.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Order Side
// ============================================================================

/// Buy or sell, from the perspective of the base asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Spend quote to acquire base.
    Buy,
    /// Sell base for quote.
    Sell,
}

impl Side {
    /// The opposite side, used when reversing a filled leg.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

// ============================================================================
// Order Book
// ============================================================================

/// A single price level in an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    /// Quote price for one unit of base.
    pub price: Decimal,
    /// Base quantity available at this price.
    pub qty: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, qty: Decimal) -> Self {
        Self { price, qty }
    }

    /// Notional value of this level.
    #[inline]
    pub fn notional(&self) -> Decimal {
        self.price * self.qty
    }
}

/// Full-depth order book for one symbol.
///
/// Bids are sorted by price descending (best bid first), asks ascending
/// (best ask first). Levels with non-positive quantity are never stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    /// Bid levels, best first.
    pub bids: Vec<PriceLevel>,
    /// Ask levels, best first.
    pub asks: Vec<PriceLevel>,
    /// Last update timestamp (milliseconds since epoch); 0 if never updated.
    pub last_update_ms: i64,
}

impl OrderBook {
    /// Create an empty order book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Best bid price (None if no bids).
    #[inline]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Best ask price (None if no asks).
    #[inline]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    /// True when both sides have at least one level.
    pub fn is_valid(&self) -> bool {
        !self.bids.is_empty() && !self.asks.is_empty()
    }

    /// Replace both sides and restore the sort invariant.
    pub fn apply_snapshot(
        &mut self,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        timestamp_ms: i64,
    ) {
        self.bids = bids;
        self.asks = asks;
        self.last_update_ms = timestamp_ms;
        self.sort_levels();
    }

    /// Sort bids descending and asks ascending, merging duplicate prices
    /// and dropping non-positive quantities. Idempotent.
    pub fn sort_levels(&mut self) {
        fn normalize(levels: &mut Vec<PriceLevel>, descending: bool) {
            levels.retain(|l| l.qty > Decimal::ZERO);
            if descending {
                levels.sort_by(|a, b| b.price.cmp(&a.price));
            } else {
                levels.sort_by(|a, b| a.price.cmp(&b.price));
            }
            // Merge runs of equal prices left behind by feed glitches.
            let mut merged: Vec<PriceLevel> = Vec::with_capacity(levels.len());
            for level in levels.drain(..) {
                match merged.last_mut() {
                    Some(last) if last.price == level.price => last.qty += level.qty,
                    _ => merged.push(level),
                }
            }
            *levels = merged;
        }
        normalize(&mut self.bids, true);
        normalize(&mut self.asks, false);
    }

    /// Walk the ask side to buy `target_qty` base units.
    ///
    /// Returns (filled_qty, total_cost, avg_price).
    pub fn cost_to_buy(&self, target_qty: Decimal) -> (Decimal, Decimal, Option<Decimal>) {
        Self::walk(&self.asks, target_qty)
    }

    /// Walk the bid side to sell `target_qty` base units.
    ///
    /// Returns (filled_qty, total_proceeds, avg_price).
    pub fn proceeds_to_sell(&self, target_qty: Decimal) -> (Decimal, Decimal, Option<Decimal>) {
        Self::walk(&self.bids, target_qty)
    }

    fn walk(levels: &[PriceLevel], target_qty: Decimal) -> (Decimal, Decimal, Option<Decimal>) {
        let mut remaining = target_qty;
        let mut total = Decimal::ZERO;
        let mut filled = Decimal::ZERO;

        for level in levels {
            if remaining <= Decimal::ZERO {
                break;
            }
            let take = remaining.min(level.qty);
            total += take * level.price;
            filled += take;
            remaining -= take;
        }

        let avg_price = if filled > Decimal::ZERO {
            Some(total / filled)
        } else {
            None
        };

        (filled, total, avg_price)
    }
}

// ============================================================================
// Execution Types
// ============================================================================

/// Result of a market order, identical across executor variants.
#[derive(Debug, Clone)]
pub struct OrderResult {
    /// Whether the order was accepted and (at least partially) filled.
    pub success: bool,
    /// Base quantity filled.
    pub filled_qty: Decimal,
    /// Average fill price.
    pub avg_price: Decimal,
    /// Quote spent if buy, quote received if sell.
    pub cost_or_proceeds: Decimal,
    /// Venue message or local rejection reason.
    pub message: String,
}

impl OrderResult {
    /// A rejection carrying only a reason.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            filled_qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            cost_or_proceeds: Decimal::ZERO,
            message: message.into(),
        }
    }
}

// ============================================================================
// Symbol Filters
// ============================================================================

/// Exchange-enforced lower bounds on an order's size.
///
/// An order is rejected pre-flight when `qty < min_qty` or
/// `qty * best_price < min_notional`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFilter {
    /// Minimum notional in quote units.
    pub min_notional: Decimal,
    /// Minimum quantity in base units.
    pub min_qty: Decimal,
}

impl SymbolFilter {
    /// Create a filter with explicit bounds.
    pub fn new(min_notional: Decimal, min_qty: Decimal) -> Self {
        Self {
            min_notional,
            min_qty,
        }
    }

    /// Static per-quote defaults applied when the venue catalog does not
    /// carry explicit filters (e.g. the pairs-file fallback path).
    pub fn default_for_quote(quote: &str) -> Self {
        match quote {
            "USDT" | "BUSD" | "USDC" | "FDUSD" | "TUSD" => Self {
                min_notional: Decimal::new(5, 0), // 5 quote units
                min_qty: Decimal::new(1, 8),      // one satoshi-equivalent
            },
            "BTC" => Self {
                min_notional: Decimal::new(1, 4), // 0.0001 BTC
                min_qty: Decimal::new(1, 8),
            },
            "ETH" | "BNB" => Self {
                min_notional: Decimal::new(1, 3), // 0.001
                min_qty: Decimal::new(1, 8),
            },
            _ => Self {
                min_notional: Decimal::ZERO,
                min_qty: Decimal::ZERO,
            },
        }
    }

    /// Check an order against the bounds.
    pub fn accepts(&self, qty: Decimal, best_price: Decimal) -> bool {
        qty >= self.min_qty && qty * best_price >= self.min_notional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_book() -> OrderBook {
        let mut book = OrderBook::new();
        book.apply_snapshot(
            vec![
                PriceLevel::new(dec!(30000), dec!(1.0)),
                PriceLevel::new(dec!(29990), dec!(2.0)),
            ],
            vec![
                PriceLevel::new(dec!(30010), dec!(1.5)),
                PriceLevel::new(dec!(30020), dec!(3.0)),
            ],
            1_700_000_000_000,
        );
        book
    }

    #[test]
    fn test_best_prices() {
        let book = sample_book();
        assert_eq!(book.best_bid(), Some(dec!(30000)));
        assert_eq!(book.best_ask(), Some(dec!(30010)));
        assert!(book.is_valid());
    }

    #[test]
    fn test_sort_levels_orders_and_merges() {
        let mut book = OrderBook::new();
        book.bids = vec![
            PriceLevel::new(dec!(100), dec!(1)),
            PriceLevel::new(dec!(101), dec!(2)),
            PriceLevel::new(dec!(100), dec!(3)),
            PriceLevel::new(dec!(99), dec!(0)),
        ];
        book.asks = vec![
            PriceLevel::new(dec!(103), dec!(1)),
            PriceLevel::new(dec!(102), dec!(2)),
        ];
        book.sort_levels();

        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.bids[0].price, dec!(101));
        assert_eq!(book.bids[1].price, dec!(100));
        assert_eq!(book.bids[1].qty, dec!(4)); // merged duplicates
        assert_eq!(book.asks[0].price, dec!(102));
    }

    #[test]
    fn test_sort_levels_idempotent() {
        let mut book = sample_book();
        let once = book.clone();
        book.sort_levels();
        assert_eq!(book.bids, once.bids);
        assert_eq!(book.asks, once.asks);
    }

    #[test]
    fn test_cost_to_buy_sweeps_levels() {
        let book = sample_book();
        let (filled, cost, avg) = book.cost_to_buy(dec!(2.0));
        // 1.5 @ 30010 + 0.5 @ 30020
        assert_eq!(filled, dec!(2.0));
        assert_eq!(cost, dec!(45015) + dec!(15010));
        assert_eq!(avg, Some(cost / dec!(2.0)));
    }

    #[test]
    fn test_proceeds_to_sell_partial() {
        let book = sample_book();
        let (filled, proceeds, avg) = book.proceeds_to_sell(dec!(5.0));
        // only 3.0 available across both bid levels
        assert_eq!(filled, dec!(3.0));
        assert_eq!(proceeds, dec!(30000) + dec!(59980));
        assert!(avg.is_some());
    }

    #[test]
    fn test_walk_empty_book() {
        let book = OrderBook::new();
        let (filled, cost, avg) = book.cost_to_buy(dec!(1));
        assert_eq!(filled, Decimal::ZERO);
        assert_eq!(cost, Decimal::ZERO);
        assert_eq!(avg, None);
    }

    #[test]
    fn test_walk_monotonic_in_quantity() {
        let book = sample_book();
        let (f1, _, a1) = book.cost_to_buy(dec!(1.0));
        let (f2, _, a2) = book.cost_to_buy(dec!(3.0));
        assert!(f1 <= f2);
        // Buys get more expensive as they sweep deeper.
        assert!(a1.unwrap() <= a2.unwrap());

        let (s1, _, b1) = book.proceeds_to_sell(dec!(0.5));
        let (s2, _, b2) = book.proceeds_to_sell(dec!(3.0));
        assert!(s1 <= s2);
        // Sells get cheaper as they sweep deeper.
        assert!(b1.unwrap() >= b2.unwrap());
    }

    #[test]
    fn test_side_display_and_opposite() {
        assert_eq!(format!("{}", Side::Buy), "BUY");
        assert_eq!(format!("{}", Side::Sell), "SELL");
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_symbol_filter_accepts() {
        let filter = SymbolFilter::new(dec!(5), dec!(0.001));
        assert!(filter.accepts(dec!(0.001), dec!(30000)));
        assert!(!filter.accepts(dec!(0.0005), dec!(30000))); // below min qty
        assert!(!filter.accepts(dec!(0.001), dec!(1))); // below min notional
    }

    #[test]
    fn test_symbol_filter_quote_defaults() {
        let usdt = SymbolFilter::default_for_quote("USDT");
        assert_eq!(usdt.min_notional, dec!(5));
        let btc = SymbolFilter::default_for_quote("BTC");
        assert_eq!(btc.min_notional, dec!(0.0001));
        let exotic = SymbolFilter::default_for_quote("DOGE");
        assert_eq!(exotic.min_notional, Decimal::ZERO);
    }

    #[test]
    fn test_order_result_rejected() {
        let res = OrderResult::rejected("no liquidity");
        assert!(!res.success);
        assert_eq!(res.filled_qty, Decimal::ZERO);
        assert_eq!(res.message, "no liquidity");
    }
}
