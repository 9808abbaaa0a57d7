//! Market structure and the market-data plane.
//!
//! This crate owns everything the trading core reads but never writes:
//!
//! - `catalog`: the venue's product list (symbol, base, quote, filters),
//!   fetched from REST or loaded from a static pairs file
//! - `triangle`: the directed asset graph and all three-leg cycles it implies
//! - `store`: per-symbol depth snapshots with staleness tracking
//! - `stream`: multiplexed depth-stream ingestion with reconnection

pub mod catalog;
pub mod store;
pub mod stream;
pub mod triangle;

pub use catalog::{split_symbol, CatalogError, ProductCatalog, SymbolInfo};
pub use store::OrderBookStore;
pub use stream::{DepthStreamConfig, DepthStreamPlane, StreamError};
pub use triangle::{DirectedEdge, Direction, Triangle, TriangleCatalog};
