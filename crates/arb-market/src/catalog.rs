//! Venue product catalog.
//!
//! On startup the engine needs the full list of tradable symbols with their
//! `(base, quote)` decomposition. The primary source is the venue's REST
//! `exchangeInfo` endpoint; a static pairs file can stand in when the venue
//! is unreachable (e.g. offline runs against recorded books).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use arb_common::SymbolFilter;

/// Errors raised while building the product catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to read pairs file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema error: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("Symbol {0} does not end in a known quote asset")]
    UnknownQuote(String),

    #[error("Catalog is empty after filtering")]
    Empty,
}

/// One tradable symbol with its decomposition and size filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Venue symbol, e.g. "BTCUSDT".
    pub symbol: String,
    /// Base asset, e.g. "BTC".
    pub base: String,
    /// Quote asset, e.g. "USDT".
    pub quote: String,
    /// Exchange-enforced lower bounds for orders on this symbol.
    pub filter: SymbolFilter,
}

/// The set of tradable symbols known at startup.
///
/// Built once; never mutated while the process runs.
#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    symbols: Vec<SymbolInfo>,
    by_symbol: HashMap<String, usize>,
}

/// `exchangeInfo` response body (the fields we consume).
#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<ExchangeSymbol>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeSymbol {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
}

impl ProductCatalog {
    /// Fetch the product list from the venue and retain tradable entries.
    pub async fn fetch(client: &reqwest::Client, rest_base_url: &str) -> Result<Self, CatalogError> {
        let url = format!("{}/api/v3/exchangeInfo", rest_base_url);
        let info: ExchangeInfo = client.get(&url).send().await?.error_for_status()?.json().await?;

        let symbols: Vec<SymbolInfo> = info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| {
                let filter = SymbolFilter::default_for_quote(&s.quote_asset);
                SymbolInfo {
                    symbol: s.symbol,
                    base: s.base_asset,
                    quote: s.quote_asset,
                    filter,
                }
            })
            .collect();

        info!(count = symbols.len(), "Fetched product catalog");
        Self::from_symbols(symbols)
    }

    /// Load the catalog from a static pairs file: a JSON array of symbol
    /// strings, decomposed by suffix-matching against `quote_assets`.
    pub fn from_pairs_file(path: &Path, quote_assets: &[String]) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path)?;
        let pairs: Vec<String> = serde_json::from_str(&raw)?;

        let mut symbols = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let (base, quote) = split_symbol(&pair, quote_assets)
                .ok_or_else(|| CatalogError::UnknownQuote(pair.clone()))?;
            let filter = SymbolFilter::default_for_quote(&quote);
            symbols.push(SymbolInfo {
                symbol: pair,
                base,
                quote,
                filter,
            });
        }

        info!(count = symbols.len(), file = %path.display(), "Loaded static pairs file");
        Self::from_symbols(symbols)
    }

    /// Build a catalog from already-decomposed symbols.
    pub fn from_symbols(symbols: Vec<SymbolInfo>) -> Result<Self, CatalogError> {
        if symbols.is_empty() {
            return Err(CatalogError::Empty);
        }
        let by_symbol = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.symbol.clone(), i))
            .collect();
        Ok(Self { symbols, by_symbol })
    }

    /// All tradable symbols.
    pub fn symbols(&self) -> &[SymbolInfo] {
        &self.symbols
    }

    /// Look up one symbol.
    pub fn get(&self, symbol: &str) -> Option<&SymbolInfo> {
        self.by_symbol.get(symbol).map(|&i| &self.symbols[i])
    }

    /// Number of tradable symbols.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True when no symbols survived filtering.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Decompose a venue symbol into `(base, quote)` by suffix-matching against
/// an ordered list of known quote assets. The first match wins, so callers
/// should order the list longest-suffix-first where ambiguity exists.
pub fn split_symbol(symbol: &str, quote_assets: &[String]) -> Option<(String, String)> {
    for quote in quote_assets {
        if symbol.len() > quote.len() && symbol.ends_with(quote.as_str()) {
            let base = &symbol[..symbol.len() - quote.len()];
            return Some((base.to_string(), quote.clone()));
        }
    }
    None
}
