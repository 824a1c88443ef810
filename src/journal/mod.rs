// Trade journal
// Append-only record of every entry and exit attempt
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::TradeSide;
use crate::Result;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeStatus {
    Filled,
    Rejected,
    Skipped, // No order sent (quantity below exchange minimum)
}

/// One entry or exit attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub id: Uuid,
    pub symbol: String,
    pub side: TradeSide,
    pub status: TradeStatus,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub pnl: Option<f64>,
    pub reason: String, // Exit reason or exchange error
    pub timestamp: DateTime<Utc>,
}

impl TradeRecord {
    pub fn entry(
        symbol: &str,
        status: TradeStatus,
        quantity: f64,
        price: f64,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            status,
            quantity,
            entry_price: price,
            exit_price: None,
            pnl: None,
            reason: reason.into(),
            timestamp,
        }
    }

    pub fn exit(
        symbol: &str,
        status: TradeStatus,
        quantity: f64,
        entry_price: f64,
        exit_price: f64,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side: TradeSide::Sell,
            status,
            quantity,
            entry_price,
            exit_price: Some(exit_price),
            pnl: Some((exit_price - entry_price) * quantity),
            reason: reason.into(),
            timestamp,
        }
    }
}

/// Destination for trade records
///
/// Best effort: callers log and ignore failures.
pub trait TradeSink: Send + Sync {
    fn record(&self, record: &TradeRecord) -> Result<()>;
}

/// JSON-lines trade log on disk
pub struct JsonlJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlJournal {
    /// Open (or lazily create) the journal at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TradeSink for JsonlJournal {
    fn record(&self, record: &TradeRecord) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        tracing::debug!(path = %self.path.display(), "Trade record written");
        Ok(())
    }
}

/// In-memory journal
#[derive(Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<TradeRecord>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<TradeRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl TradeSink for MemoryJournal {
    fn record(&self, record: &TradeRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}

/// Last `n` records of a journal file, oldest first
///
/// A missing file means no trades yet. Unparseable lines are skipped.
pub fn read_recent(path: &Path, n: usize) -> Result<Vec<TradeRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(fs::File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TradeRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!("Skipping malformed journal line: {}", e),
        }
    }

    let skip = records.len().saturating_sub(n);
    Ok(records.split_off(skip))
}

/// Aggregate view over a set of records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeSummary {
    pub entries: usize,
    pub exits: usize,
    pub wins: usize,
    pub losses: usize,
    pub rejected: usize,
    pub realized_pnl: f64,
}

impl TradeSummary {
    pub fn from_records(records: &[TradeRecord]) -> Self {
        let mut summary = Self::default();

        for record in records {
            match (record.side, record.status) {
                (_, TradeStatus::Rejected) | (_, TradeStatus::Skipped) => summary.rejected += 1,
                (TradeSide::Buy, TradeStatus::Filled) => summary.entries += 1,
                (TradeSide::Sell, TradeStatus::Filled) => {
                    summary.exits += 1;
                    let pnl = record.pnl.unwrap_or(0.0);
                    summary.realized_pnl += pnl;
                    if pnl >= 0.0 {
                        summary.wins += 1;
                    } else {
                        summary.losses += 1;
                    }
                }
            }
        }

        summary
    }

    /// Share of profitable exits, 0 when nothing has closed
    pub fn win_rate(&self) -> f64 {
        if self.exits == 0 {
            return 0.0;
        }
        self.wins as f64 / self.exits as f64 * 100.0
    }
}
