//! Append-only CSV sinks.
//!
//! Five files, one schema each:
//!
//! - `sim_log.csv`: completed cycle executions
//! - `leg_log.csv`: individual leg fills
//! - `scan_log.csv`: per-symbol rescan summaries
//! - `fail_log.csv`: named execution failures
//! - `profitable_cycles.csv`: materialized export of a full rescore
//!
//! Writers are lazily opened and guarded by a mutex each; a row is flushed
//! as soon as it is written. Logging never propagates errors into the
//! trading path.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::error;

const SIM_LOG_FILE: &str = "sim_log.csv";
const LEG_LOG_FILE: &str = "leg_log.csv";
const SCAN_LOG_FILE: &str = "scan_log.csv";
const FAIL_LOG_FILE: &str = "fail_log.csv";
const PROFITABLE_CYCLES_FILE: &str = "profitable_cycles.csv";

const SIM_HEADER: &[&str] = &["timestamp", "path", "start_val", "end_val", "profit_percent"];
const LEG_HEADER: &[&str] = &[
    "timestamp",
    "pair",
    "side",
    "requestedQty",
    "filledQty",
    "fillRatio",
    "slippage",
    "latencyMs",
];
const SCAN_HEADER: &[&str] = &[
    "timestamp",
    "symbol",
    "triangles_scanned",
    "best_profit",
    "latency_ms",
];
const FAIL_HEADER: &[&str] = &["timestamp", "triangleKey", "reason"];
const EXPORT_HEADER: &[&str] = &["timestamp", "rank", "triIdx", "profitPct", "path"];

/// One row of the profitable-cycles export.
#[derive(Debug, Clone)]
pub struct ProfitableCycleRow {
    pub rank: usize,
    pub cycle_id: usize,
    pub profit_pct: Decimal,
    pub path: String,
}

/// CSV sinks for the engine's observable events.
pub struct TradeLogs {
    dir: PathBuf,
    sim: Mutex<Option<csv::Writer<File>>>,
    leg: Mutex<Option<csv::Writer<File>>>,
    scan: Mutex<Option<csv::Writer<File>>>,
    fail: Mutex<Option<csv::Writer<File>>>,
}

impl TradeLogs {
    /// Create the sink set, ensuring the output directory exists.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create log directory {:?}", dir))?;
        Ok(Self {
            dir,
            sim: Mutex::new(None),
            leg: Mutex::new(None),
            scan: Mutex::new(None),
            fail: Mutex::new(None),
        })
    }

    /// Output directory the sinks write into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record a completed cycle execution.
    pub fn log_trade(&self, path: &str, start_val: Decimal, end_val: Decimal, profit_pct: Decimal) {
        self.append(
            &self.sim,
            SIM_LOG_FILE,
            SIM_HEADER,
            &[
                timestamp(),
                path.to_string(),
                start_val.to_string(),
                end_val.to_string(),
                profit_pct.to_string(),
            ],
        );
    }

    /// Record one leg fill.
    #[allow(clippy::too_many_arguments)]
    pub fn log_leg(
        &self,
        pair: &str,
        side: &str,
        requested_qty: Decimal,
        filled_qty: Decimal,
        fill_ratio: Decimal,
        slippage: Decimal,
        latency_ms: u64,
    ) {
        self.append(
            &self.leg,
            LEG_LOG_FILE,
            LEG_HEADER,
            &[
                timestamp(),
                pair.to_string(),
                side.to_string(),
                requested_qty.to_string(),
                filled_qty.to_string(),
                fill_ratio.to_string(),
                slippage.to_string(),
                latency_ms.to_string(),
            ],
        );
    }

    /// Record one per-symbol rescan.
    pub fn log_scan(&self, symbol: &str, triangles_scanned: usize, best_profit: Decimal, latency_ms: u64) {
        self.append(
            &self.scan,
            SCAN_LOG_FILE,
            SCAN_HEADER,
            &[
                timestamp(),
                symbol.to_string(),
                triangles_scanned.to_string(),
                best_profit.to_string(),
                latency_ms.to_string(),
            ],
        );
    }

    /// Record a named execution failure.
    pub fn log_failure(&self, triangle_key: &str, reason: &str) {
        self.append(
            &self.fail,
            FAIL_LOG_FILE,
            FAIL_HEADER,
            &[timestamp(), triangle_key.to_string(), reason.to_string()],
        );
    }

    /// Write (overwrite) the profitable-cycles export and return its path.
    pub fn export_profitable_cycles(&self, rows: &[ProfitableCycleRow]) -> Result<PathBuf> {
        let path = self.dir.join(PROFITABLE_CYCLES_FILE);
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create {:?}", path))?;
        writer.write_record(EXPORT_HEADER)?;
        let ts = timestamp();
        for row in rows {
            writer.write_record(&[
                ts.clone(),
                row.rank.to_string(),
                row.cycle_id.to_string(),
                row.profit_pct.to_string(),
                row.path.clone(),
            ])?;
        }
        writer.flush()?;
        Ok(path)
    }

    /// Append one record, lazily opening the writer and emitting the header
    /// on a fresh file. Failures are logged, never propagated.
    fn append(
        &self,
        slot: &Mutex<Option<csv::Writer<File>>>,
        file_name: &str,
        header: &[&str],
        record: &[String],
    ) {
        let mut guard = match slot.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };

        if guard.is_none() {
            match self.open_appender(file_name, header) {
                Ok(writer) => *guard = Some(writer),
                Err(e) => {
                    error!(file = file_name, "Failed to open CSV sink: {e:#}");
                    return;
                }
            }
        }

        if let Some(writer) = guard.as_mut() {
            if let Err(e) = writer.write_record(record).and_then(|_| writer.flush().map_err(Into::into)) {
                error!(file = file_name, "Failed to write CSV row: {e}");
            }
        }
    }

    fn open_appender(&self, file_name: &str, header: &[&str]) -> Result<csv::Writer<File>> {
        let path = self.dir.join(file_name);
        let fresh = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if fresh {
            writer.write_record(header)?;
            writer.flush()?;
        }
        Ok(writer)
    }
}

/// Wall-clock timestamp shared by all rows.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn temp_logs(tag: &str) -> TradeLogs {
        let dir = std::env::temp_dir().join(format!("arb_logs_test_{tag}"));
        std::fs::remove_dir_all(&dir).ok();
        TradeLogs::new(&dir).unwrap()
    }

    #[test]
    fn test_trade_log_header_and_row() {
        let logs = temp_logs("trade");
        logs.log_trade("BTCUSDT->ETHBTC->ETHUSDT", dec!(1000), dec!(1002.5), dec!(0.25));
        logs.log_trade("BTCUSDT->ETHBTC->ETHUSDT", dec!(1002.5), dec!(1001), dec!(-0.15));

        let raw = std::fs::read_to_string(logs.dir().join(SIM_LOG_FILE)).unwrap();
        let mut lines = raw.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,path,start_val,end_val,profit_percent"
        );
        assert_eq!(lines.count(), 2);
        assert!(raw.contains("1002.5"));
        std::fs::remove_dir_all(logs.dir()).ok();
    }

    #[test]
    fn test_header_written_once_across_reopens() {
        let dir = std::env::temp_dir().join("arb_logs_test_reopen");
        std::fs::remove_dir_all(&dir).ok();
        {
            let logs = TradeLogs::new(&dir).unwrap();
            logs.log_failure("K1", "LEG2_FAIL");
        }
        {
            let logs = TradeLogs::new(&dir).unwrap();
            logs.log_failure("K1", "LEG3_FAIL");
        }
        let raw = std::fs::read_to_string(dir.join(FAIL_LOG_FILE)).unwrap();
        assert_eq!(
            raw.lines().filter(|l| l.starts_with("timestamp")).count(),
            1
        );
        assert_eq!(raw.lines().count(), 3);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_export_profitable_cycles_overwrites() {
        let logs = temp_logs("export");
        let rows = vec![
            ProfitableCycleRow {
                rank: 1,
                cycle_id: 42,
                profit_pct: dec!(0.31),
                path: "BTCUSDT->ETHBTC->ETHUSDT".to_string(),
            },
            ProfitableCycleRow {
                rank: 2,
                cycle_id: 7,
                profit_pct: dec!(0.12),
                path: "ETHUSDT->ETHBTC->BTCUSDT".to_string(),
            },
        ];
        let path = logs.export_profitable_cycles(&rows).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 3);

        // A second export replaces the file rather than appending.
        let path = logs.export_profitable_cycles(&rows[..1].to_vec()).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        std::fs::remove_dir_all(logs.dir()).ok();
    }

    #[test]
    fn test_leg_and_scan_rows() {
        let logs = temp_logs("legscan");
        logs.log_leg("BTCUSDT", "SELL", dec!(0.5), dec!(0.5), dec!(1), dec!(0.0001), 12);
        logs.log_scan("BTCUSDT", 50, dec!(0.42), 3);

        let leg_raw = std::fs::read_to_string(logs.dir().join(LEG_LOG_FILE)).unwrap();
        assert!(leg_raw.starts_with(
            "timestamp,pair,side,requestedQty,filledQty,fillRatio,slippage,latencyMs"
        ));
        let scan_raw = std::fs::read_to_string(logs.dir().join(SCAN_LOG_FILE)).unwrap();
        assert!(scan_raw.contains("BTCUSDT,50,0.42,3"));
        std::fs::remove_dir_all(logs.dir()).ok();
    }
}
