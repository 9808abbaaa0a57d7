//! Per-symbol depth snapshot store.
//!
//! The slot map is sized once from the triangle catalog and never grows, so
//! readers and the ingest path only ever contend on a single symbol's lock.
//! The market-data plane is the sole writer; everything else takes copies.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;

use arb_common::OrderBook;

/// Thread-safe store of the latest depth snapshot per symbol.
pub struct OrderBookStore {
    slots: HashMap<String, RwLock<OrderBook>>,
}

impl OrderBookStore {
    /// Pre-size one slot per subscribed symbol.
    pub fn new(symbols: impl IntoIterator<Item = String>) -> Self {
        let slots = symbols
            .into_iter()
            .map(|s| (s, RwLock::new(OrderBook::new())))
            .collect();
        Self { slots }
    }

    /// Replace the snapshot for `symbol`. Returns false for symbols that
    /// were not subscribed at startup; such payloads are dropped.
    pub fn publish(&self, symbol: &str, book: OrderBook) -> bool {
        match self.slots.get(symbol) {
            Some(slot) => {
                *slot.write() = book;
                true
            }
            None => false,
        }
    }

    /// Copy out the latest snapshot, or None for an unknown symbol.
    pub fn get(&self, symbol: &str) -> Option<OrderBook> {
        self.slots.get(symbol).map(|slot| slot.read().clone())
    }

    /// Milliseconds-since-epoch of the last update, or None if the symbol
    /// is unknown or has never been updated.
    pub fn last_update_ms(&self, symbol: &str) -> Option<i64> {
        let slot = self.slots.get(symbol)?;
        let ts = slot.read().last_update_ms;
        (ts > 0).then_some(ts)
    }

    /// True when the symbol has never been updated or its last update is
    /// older than `max_age_ms`.
    pub fn is_stale(&self, symbol: &str, max_age_ms: i64) -> bool {
        match self.last_update_ms(symbol) {
            Some(ts) => Utc::now().timestamp_millis() - ts > max_age_ms,
            None => true,
        }
    }

    /// The symbols this store was sized for.
    pub fn known_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.slots.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_common::PriceLevel;
    use rust_decimal_macros::dec;

    fn store() -> OrderBookStore {
        OrderBookStore::new(["BTCUSDT".to_string(), "ETHUSDT".to_string()])
    }

    fn book_at(ts: i64) -> OrderBook {
        let mut book = OrderBook::new();
        book.apply_snapshot(
            vec![PriceLevel::new(dec!(100), dec!(1))],
            vec![PriceLevel::new(dec!(101), dec!(1))],
            ts,
        );
        book
    }

    #[test]
    fn test_publish_and_get() {
        let store = store();
        assert!(store.publish("BTCUSDT", book_at(42)));
        let copy = store.get("BTCUSDT").unwrap();
        assert_eq!(copy.last_update_ms, 42);
        assert_eq!(copy.best_bid(), Some(dec!(100)));
    }

    #[test]
    fn test_unknown_symbol_dropped() {
        let store = store();
        assert!(!store.publish("DOGEUSDT", book_at(1)));
        assert!(store.get("DOGEUSDT").is_none());
    }

    #[test]
    fn test_never_updated_is_stale() {
        let store = store();
        assert!(store.is_stale("BTCUSDT", i64::MAX));
        assert!(store.is_stale("DOGEUSDT", i64::MAX));
        assert_eq!(store.last_update_ms("BTCUSDT"), None);
    }

    #[test]
    fn test_staleness_threshold() {
        let store = store();
        let now = Utc::now().timestamp_millis();
        store.publish("BTCUSDT", book_at(now));
        assert!(!store.is_stale("BTCUSDT", 60_000));

        store.publish("ETHUSDT", book_at(now - 120_000));
        assert!(store.is_stale("ETHUSDT", 60_000));
        assert!(!store.is_stale("ETHUSDT", 600_000));
    }

    #[test]
    fn test_known_symbols_sorted() {
        let store = store();
        assert_eq!(store.known_symbols(), vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn test_get_returns_copy() {
        let store = store();
        store.publish("BTCUSDT", book_at(1));
        let mut copy = store.get("BTCUSDT").unwrap();
        copy.bids.clear();
        // The store is unaffected by mutation of the copy.
        assert!(store.get("BTCUSDT").unwrap().is_valid());
    }
}
