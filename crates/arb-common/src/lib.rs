//! Shared primitives for the triangular arbitrage engine.
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod types;

pub use types::{OrderBook, OrderResult, PriceLevel, Side, SymbolFilter};
