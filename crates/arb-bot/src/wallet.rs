//! Transactional wallet.
//!
//! Per-asset `(total, locked)` balances behind a single mutex, mutated
//! through transactions that either commit whole or roll back whole. The
//! invariants `total >= 0`, `locked >= 0`, `locked <= total` are checked on
//! every mutation; a violating change is rejected before anything moves.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Errors from wallet persistence.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file schema error: {0}")]
    Schema(#[from] serde_json::Error),
}

/// One recorded balance mutation, reversible in LIFO order.
#[derive(Debug, Clone)]
pub struct WalletChange {
    asset: String,
    delta_total: Decimal,
    delta_locked: Decimal,
}

/// A wallet transaction: a sequence of applied changes that can be undone.
///
/// Used single-threaded by one logical trade. Once committed or rolled
/// back, further `apply` calls are rejected.
#[derive(Debug, Default)]
pub struct WalletTransaction {
    active: bool,
    changes: Vec<WalletChange>,
}

impl WalletTransaction {
    /// True while the transaction accepts further changes.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of changes applied so far.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// True when no changes have been applied.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Persisted wallet shape: `{"balances": {...}, "locked": {...}}`.
#[derive(Debug, Serialize, Deserialize)]
struct WalletState {
    balances: BTreeMap<String, Decimal>,
    locked: BTreeMap<String, Decimal>,
}

#[derive(Debug, Default)]
struct WalletInner {
    balances: BTreeMap<String, Decimal>,
    locked: BTreeMap<String, Decimal>,
}

/// Thread-safe balance store supporting multi-leg transactions.
#[derive(Debug, Default)]
pub struct Wallet {
    inner: Mutex<WalletInner>,
}

impl Wallet {
    /// Create an empty wallet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a wallet seeded with initial totals (locked starts at zero).
    pub fn with_balances<I, S>(initial: I) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<String>,
    {
        let wallet = Self::new();
        for (asset, amount) in initial {
            wallet.set_balance(&asset.into(), amount);
        }
        wallet
    }

    /// Set an asset's total, preserving (or initializing) its locked amount.
    /// Rejects negative amounts.
    pub fn set_balance(&self, asset: &str, amount: Decimal) -> bool {
        if amount < Decimal::ZERO {
            return false;
        }
        let mut inner = self.inner.lock();
        inner.balances.insert(asset.to_string(), amount);
        inner.locked.entry(asset.to_string()).or_insert(Decimal::ZERO);
        true
    }

    /// Free balance: `max(0, total - locked)`. Zero for unknown assets.
    pub fn get_free(&self, asset: &str) -> Decimal {
        let inner = self.inner.lock();
        let total = inner.balances.get(asset).copied().unwrap_or(Decimal::ZERO);
        let locked = inner.locked.get(asset).copied().unwrap_or(Decimal::ZERO);
        (total - locked).max(Decimal::ZERO)
    }

    /// Total balance. Zero for unknown assets.
    pub fn get_total(&self, asset: &str) -> Decimal {
        let inner = self.inner.lock();
        inner.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Begin a transaction.
    pub fn begin_transaction(&self) -> WalletTransaction {
        WalletTransaction {
            active: true,
            changes: Vec::new(),
        }
    }

    /// Atomically apply a change: checked against the invariants under the
    /// wallet lock; on violation returns false and mutates nothing.
    pub fn apply(
        &self,
        tx: &mut WalletTransaction,
        asset: &str,
        delta_total: Decimal,
        delta_locked: Decimal,
    ) -> bool {
        if !tx.active {
            return false;
        }
        let mut inner = self.inner.lock();

        let total = inner.balances.get(asset).copied().unwrap_or(Decimal::ZERO);
        let locked = inner.locked.get(asset).copied().unwrap_or(Decimal::ZERO);

        let new_total = total + delta_total;
        let new_locked = locked + delta_locked;

        if new_total < Decimal::ZERO || new_locked < Decimal::ZERO || new_locked > new_total {
            return false;
        }

        tx.changes.push(WalletChange {
            asset: asset.to_string(),
            delta_total,
            delta_locked,
        });
        inner.balances.insert(asset.to_string(), new_total);
        inner.locked.insert(asset.to_string(), new_locked);
        true
    }

    /// Mark the transaction inactive; its changes remain applied.
    pub fn commit(&self, tx: &mut WalletTransaction) -> bool {
        if !tx.active {
            return false;
        }
        tx.active = false;
        true
    }

    /// Reverse every recorded change in LIFO order (clamping at zero as a
    /// safety net) and mark the transaction inactive.
    pub fn rollback(&self, tx: &mut WalletTransaction) {
        if !tx.active {
            return;
        }
        tx.active = false;

        let mut inner = self.inner.lock();
        for change in tx.changes.iter().rev() {
            let total = inner
                .balances
                .get(&change.asset)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let locked = inner
                .locked
                .get(&change.asset)
                .copied()
                .unwrap_or(Decimal::ZERO);
            inner.balances.insert(
                change.asset.clone(),
                (total - change.delta_total).max(Decimal::ZERO),
            );
            inner.locked.insert(
                change.asset.clone(),
                (locked - change.delta_locked).max(Decimal::ZERO),
            );
        }
    }

    /// Persist the `(total, locked)` maps as JSON.
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let state = {
            let inner = self.inner.lock();
            WalletState {
                balances: inner.balances.clone(),
                locked: inner.locked.clone(),
            }
        };
        let json = serde_json::to_string_pretty(&state)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Rehydrate a wallet from a state file written by [`Wallet::save`].
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let raw = fs::read_to_string(path)?;
        let state: WalletState = serde_json::from_str(&raw)?;
        Ok(Self {
            inner: Mutex::new(WalletInner {
                balances: state.balances,
                locked: state.locked,
            }),
        })
    }

    /// Copy out every `(asset, total, locked)` triple, sorted by asset.
    pub fn snapshot(&self) -> Vec<(String, Decimal, Decimal)> {
        let inner = self.inner.lock();
        inner
            .balances
            .iter()
            .map(|(asset, total)| {
                let locked = inner.locked.get(asset).copied().unwrap_or(Decimal::ZERO);
                (asset.clone(), *total, locked)
            })
            .collect()
    }

    /// Log every balance with total, locked, and free amounts.
    pub fn log_all(&self) {
        for (asset, total, locked) in self.snapshot() {
            info!(
                asset = %asset,
                total = %total,
                locked = %locked,
                free = %(total - locked).max(Decimal::ZERO),
                "Wallet balance"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_set_and_read_balances() {
        let wallet = Wallet::new();
        assert!(wallet.set_balance("BTC", dec!(1.5)));
        assert_eq!(wallet.get_total("BTC"), dec!(1.5));
        assert_eq!(wallet.get_free("BTC"), dec!(1.5));
        assert_eq!(wallet.get_total("ETH"), Decimal::ZERO);
        assert_eq!(wallet.get_free("ETH"), Decimal::ZERO);
    }

    #[test]
    fn test_set_balance_rejects_negative() {
        let wallet = Wallet::new();
        assert!(!wallet.set_balance("BTC", dec!(-1)));
        assert_eq!(wallet.get_total("BTC"), Decimal::ZERO);
    }

    #[test]
    fn test_apply_and_commit() {
        let wallet = Wallet::with_balances([("USDT", dec!(100))]);
        let mut tx = wallet.begin_transaction();

        assert!(wallet.apply(&mut tx, "USDT", dec!(-40), Decimal::ZERO));
        assert!(wallet.apply(&mut tx, "BTC", dec!(0.001), Decimal::ZERO));
        assert_eq!(wallet.get_total("USDT"), dec!(60));
        assert_eq!(wallet.get_total("BTC"), dec!(0.001));

        assert!(wallet.commit(&mut tx));
        assert_eq!(wallet.get_total("USDT"), dec!(60));
        // A committed transaction accepts nothing further.
        assert!(!wallet.apply(&mut tx, "USDT", dec!(-1), Decimal::ZERO));
        assert!(!wallet.commit(&mut tx));
    }

    #[test]
    fn test_apply_rejects_overdraft() {
        let wallet = Wallet::with_balances([("USDT", dec!(10))]);
        let mut tx = wallet.begin_transaction();
        assert!(!wallet.apply(&mut tx, "USDT", dec!(-11), Decimal::ZERO));
        // Nothing moved, nothing recorded.
        assert_eq!(wallet.get_total("USDT"), dec!(10));
        assert!(tx.is_empty());
    }

    #[test]
    fn test_apply_rejects_lock_beyond_total() {
        let wallet = Wallet::with_balances([("BTC", dec!(1))]);
        let mut tx = wallet.begin_transaction();
        assert!(!wallet.apply(&mut tx, "BTC", Decimal::ZERO, dec!(2)));
        assert!(wallet.apply(&mut tx, "BTC", Decimal::ZERO, dec!(1)));
        assert_eq!(wallet.get_free("BTC"), Decimal::ZERO);
        assert!(!wallet.apply(&mut tx, "BTC", Decimal::ZERO, dec!(-2)));
    }

    #[test]
    fn test_rollback_restores_exact_state() {
        let wallet = Wallet::with_balances([("BTC", dec!(1)), ("USDT", dec!(500))]);
        let before = wallet.snapshot();

        let mut tx = wallet.begin_transaction();
        assert!(wallet.apply(&mut tx, "BTC", dec!(-0.5), Decimal::ZERO));
        assert!(wallet.apply(&mut tx, "USDT", dec!(250), Decimal::ZERO));
        assert!(wallet.apply(&mut tx, "USDT", Decimal::ZERO, dec!(100)));
        wallet.rollback(&mut tx);

        assert_eq!(wallet.snapshot(), before);
        assert!(!tx.is_active());
        // Rolled-back transactions accept nothing further.
        assert!(!wallet.apply(&mut tx, "BTC", dec!(1), Decimal::ZERO));
    }

    #[test]
    fn test_rollback_inactive_is_noop() {
        let wallet = Wallet::with_balances([("BTC", dec!(1))]);
        let mut tx = wallet.begin_transaction();
        assert!(wallet.apply(&mut tx, "BTC", dec!(-0.5), Decimal::ZERO));
        assert!(wallet.commit(&mut tx));
        // Rollback after commit must not reverse committed changes.
        wallet.rollback(&mut tx);
        assert_eq!(wallet.get_total("BTC"), dec!(0.5));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let wallet = Wallet::with_balances([("BTC", dec!(0.25)), ("USDT", dec!(1234.5678))]);
        let mut tx = wallet.begin_transaction();
        assert!(wallet.apply(&mut tx, "USDT", Decimal::ZERO, dec!(34.5678)));
        assert!(wallet.commit(&mut tx));

        let path = std::env::temp_dir().join("arb_wallet_roundtrip_test.json");
        wallet.save(&path).unwrap();
        let restored = Wallet::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(restored.snapshot(), wallet.snapshot());
        assert_eq!(restored.get_free("USDT"), dec!(1200.0000));
    }

    #[test]
    fn test_free_is_total_minus_locked() {
        let wallet = Wallet::with_balances([("ETH", dec!(10))]);
        let mut tx = wallet.begin_transaction();
        assert!(wallet.apply(&mut tx, "ETH", Decimal::ZERO, dec!(4)));
        assert!(wallet.commit(&mut tx));
        assert_eq!(wallet.get_free("ETH"), dec!(6));
        assert_eq!(wallet.get_total("ETH"), dec!(10));
    }

    #[test]
    fn test_invariants_hold_after_arbitrary_sequence() {
        let wallet = Wallet::with_balances([("A", dec!(5)), ("B", dec!(5))]);
        let mut tx = wallet.begin_transaction();
        let moves: [(&str, Decimal, Decimal); 5] = [
            ("A", dec!(-2), Decimal::ZERO),
            ("B", dec!(3), dec!(1)),
            ("A", dec!(-10), Decimal::ZERO), // rejected
            ("B", Decimal::ZERO, dec!(20)),  // rejected
            ("A", dec!(1), dec!(1)),
        ];
        for (asset, dt, dl) in moves {
            wallet.apply(&mut tx, asset, dt, dl);
        }
        for (_, total, locked) in wallet.snapshot() {
            assert!(locked >= Decimal::ZERO);
            assert!(locked <= total);
        }
    }
}
