//! Triangle discovery over the product catalog.
//!
//! Every tradable symbol contributes two directed edges to an asset graph:
//! `base -> quote` (FORWARD: sell base at the bid) and `quote -> base`
//! (INVERSE: spend quote to buy base at the ask). A triangle is any walk of
//! three edges returning to its starting asset. Direction is pinned on each
//! edge here, at build time, so no downstream code ever has to infer the
//! trade side from the symbol string.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{ProductCatalog, SymbolInfo};

/// Which of a symbol's two executable directions an edge takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Sell base for quote at the bid.
    Forward,
    /// Spend quote to acquire base at the ask.
    Inverse,
}

impl Direction {
    /// Single-letter tag used in canonical cycle keys.
    pub fn tag(&self) -> &'static str {
        match self {
            Direction::Forward => "F",
            Direction::Inverse => "I",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One directed edge of the asset graph.
///
/// `from`/`to` are graph endpoints; `base`/`quote` always follow the symbol,
/// so a FORWARD edge has `from == base` and an INVERSE edge `from == quote`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectedEdge {
    /// Asset spent when walking this edge.
    pub from: String,
    /// Asset received when walking this edge.
    pub to: String,
    /// Symbol base asset.
    pub base: String,
    /// Symbol quote asset.
    pub quote: String,
    /// Venue symbol carrying the edge.
    pub symbol: String,
    /// Executable direction.
    pub direction: Direction,
}

impl DirectedEdge {
    /// True when walking this edge sells the base asset.
    #[inline]
    pub fn is_sell(&self) -> bool {
        self.direction == Direction::Forward
    }
}

/// An ordered three-leg cycle returning to its starting asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triangle {
    /// Dense index into the catalog's triangle vector.
    pub id: usize,
    /// The three legs, in execution order.
    pub legs: [DirectedEdge; 3],
    /// Canonical direction-tagged key, e.g. "BTCUSDT.F-ETHBTC.I-ETHUSDT.F".
    pub key: String,
}

impl Triangle {
    /// The distinct assets this cycle touches, in leg order.
    pub fn assets(&self) -> [&str; 3] {
        [
            self.legs[0].from.as_str(),
            self.legs[1].from.as_str(),
            self.legs[2].from.as_str(),
        ]
    }

    /// Human-readable path for logs, e.g. "BTCUSDT->ETHBTC->ETHUSDT".
    pub fn path(&self) -> String {
        format!(
            "{}->{}->{}",
            self.legs[0].symbol, self.legs[1].symbol, self.legs[2].symbol
        )
    }

    fn canonical_key(legs: &[DirectedEdge; 3]) -> String {
        format!(
            "{}.{}-{}.{}-{}.{}",
            legs[0].symbol,
            legs[0].direction,
            legs[1].symbol,
            legs[1].direction,
            legs[2].symbol,
            legs[2].direction
        )
    }
}

/// All triangles implied by the product catalog, with a reverse index from
/// symbol to the cycles that reference it.
#[derive(Debug, Default)]
pub struct TriangleCatalog {
    triangles: Vec<Triangle>,
    symbol_index: HashMap<String, Vec<usize>>,
    assets: Vec<String>,
}

impl TriangleCatalog {
    /// Enumerate every 3-cycle in the directed asset graph.
    pub fn build(catalog: &ProductCatalog) -> Self {
        let mut adjacency: HashMap<&str, Vec<DirectedEdge>> = HashMap::new();
        for info in catalog.symbols() {
            let (forward, inverse) = Self::edges_for(info);
            adjacency.entry(info.base.as_str()).or_default().push(forward);
            adjacency.entry(info.quote.as_str()).or_default().push(inverse);
        }

        let mut triangles = Vec::new();
        let mut symbol_index: HashMap<String, Vec<usize>> = HashMap::new();

        // Triple-nested adjacency walk: A -> B -> C -> A.
        for (start, first_edges) in &adjacency {
            for e1 in first_edges {
                let Some(second_edges) = adjacency.get(e1.to.as_str()) else {
                    continue;
                };
                for e2 in second_edges {
                    if e2.to == *start {
                        continue;
                    }
                    let Some(third_edges) = adjacency.get(e2.to.as_str()) else {
                        continue;
                    };
                    for e3 in third_edges {
                        if e3.to != *start {
                            continue;
                        }
                        let legs = [e1.clone(), e2.clone(), e3.clone()];
                        let id = triangles.len();
                        let key = Triangle::canonical_key(&legs);
                        for leg in &legs {
                            symbol_index
                                .entry(leg.symbol.clone())
                                .or_default()
                                .push(id);
                        }
                        triangles.push(Triangle { id, legs, key });
                    }
                }
            }
        }

        let mut assets: Vec<String> = adjacency.keys().map(|a| a.to_string()).collect();
        assets.sort();

        info!(
            triangles = triangles.len(),
            symbols = symbol_index.len(),
            assets = assets.len(),
            "Triangle catalog built"
        );

        Self {
            triangles,
            symbol_index,
            assets,
        }
    }

    fn edges_for(info: &SymbolInfo) -> (DirectedEdge, DirectedEdge) {
        let forward = DirectedEdge {
            from: info.base.clone(),
            to: info.quote.clone(),
            base: info.base.clone(),
            quote: info.quote.clone(),
            symbol: info.symbol.clone(),
            direction: Direction::Forward,
        };
        let inverse = DirectedEdge {
            from: info.quote.clone(),
            to: info.base.clone(),
            base: info.base.clone(),
            quote: info.quote.clone(),
            symbol: info.symbol.clone(),
            direction: Direction::Inverse,
        };
        (forward, inverse)
    }

    /// All triangles, dense-indexed by id.
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// One triangle by id.
    pub fn get(&self, id: usize) -> Option<&Triangle> {
        self.triangles.get(id)
    }

    /// Ids of the cycles referencing `symbol`.
    pub fn cycles_for_symbol(&self, symbol: &str) -> &[usize] {
        self.symbol_index
            .get(symbol)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every symbol referenced by at least one triangle.
    pub fn subscribed_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.symbol_index.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Every asset appearing in the graph, sorted lexicographically.
    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    /// Number of discovered triangles.
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    /// True when the graph contains no 3-cycles.
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_common::SymbolFilter;

    fn info(symbol: &str, base: &str, quote: &str) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.to_string(),
            base: base.to_string(),
            quote: quote.to_string(),
            filter: SymbolFilter::default_for_quote(quote),
        }
    }

    fn three_pair_catalog() -> ProductCatalog {
        ProductCatalog::from_symbols(vec![
            info("BTCUSDT", "BTC", "USDT"),
            info("ETHUSDT", "ETH", "USDT"),
            info("ETHBTC", "ETH", "BTC"),
        ])
        .unwrap()
    }

    #[test]
    fn test_three_pairs_yield_cycles_from_every_asset() {
        let catalog = TriangleCatalog::build(&three_pair_catalog());
        // Each of the three assets starts two rotations (one per orientation).
        assert_eq!(catalog.len(), 6);
        for tri in catalog.triangles() {
            // Well-formed: each leg hands its received asset to the next leg.
            assert_eq!(tri.legs[0].to, tri.legs[1].from);
            assert_eq!(tri.legs[1].to, tri.legs[2].from);
            assert_eq!(tri.legs[2].to, tri.legs[0].from);
        }
    }

    #[test]
    fn test_every_leg_is_tradable() {
        let products = three_pair_catalog();
        let catalog = TriangleCatalog::build(&products);
        for tri in catalog.triangles() {
            for leg in &tri.legs {
                assert!(products.get(&leg.symbol).is_some());
            }
        }
    }

    #[test]
    fn test_symbol_index_covers_all_symbols() {
        let catalog = TriangleCatalog::build(&three_pair_catalog());
        for symbol in ["BTCUSDT", "ETHUSDT", "ETHBTC"] {
            let ids = catalog.cycles_for_symbol(symbol);
            assert!(!ids.is_empty());
            for &id in ids {
                let tri = catalog.get(id).unwrap();
                assert!(tri.legs.iter().any(|l| l.symbol == symbol));
            }
        }
        assert!(catalog.cycles_for_symbol("DOGEUSDT").is_empty());
    }

    #[test]
    fn test_direction_tags_in_key() {
        let catalog = TriangleCatalog::build(&three_pair_catalog());
        // Find the USDT -> BTC -> ETH -> USDT rotation.
        let tri = catalog
            .triangles()
            .iter()
            .find(|t| t.legs[0].from == "USDT" && t.legs[0].symbol == "BTCUSDT")
            .unwrap();
        assert_eq!(tri.legs[0].direction, Direction::Inverse); // buy BTC with USDT
        assert!(tri.key.contains("BTCUSDT.I"));
        assert_eq!(tri.key.matches('-').count(), 2);
    }

    #[test]
    fn test_no_cycles_without_closing_edge() {
        let products = ProductCatalog::from_symbols(vec![
            info("BTCUSDT", "BTC", "USDT"),
            info("ETHUSDT", "ETH", "USDT"),
        ])
        .unwrap();
        let catalog = TriangleCatalog::build(&products);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_assets_sorted() {
        let catalog = TriangleCatalog::build(&three_pair_catalog());
        assert_eq!(catalog.assets(), &["BTC", "ETH", "USDT"]);
    }

    #[test]
    fn test_forward_edge_is_sell() {
        let (forward, inverse) = TriangleCatalog::edges_for(&info("BTCUSDT", "BTC", "USDT"));
        assert!(forward.is_sell());
        assert!(!inverse.is_sell());
        assert_eq!(forward.from, "BTC");
        assert_eq!(inverse.from, "USDT");
    }
}
