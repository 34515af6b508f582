//! On-disk trader state.
//!
//! - `state.json`: per-symbol snapshot of the portfolio basis, cross
//!   latches and scale counters
//! - `<symbol>.prices`: binary price history (u64 LE count + f64 LE samples)
//! - `journal.db`: SQLite fill journal
//!
//! Writes go to a uniquely named temp file in the same directory and are
//! renamed into place. Snapshot saves are serialized per store, since
//! several session tasks save concurrently.

mod journal;

pub use journal::{FeeSummary, FillJournal, FillRecord};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Persisted per-symbol trader state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub traded_price: f64,
    pub buy_price_mean: f64,
    pub portfolio_ratio: f64,
    pub trend_crossover: bool,
    pub trend_crossunder: bool,
    pub buy_counter: u32,
    pub sell_counter: u32,
}

/// Write `bytes` to `path` via a sibling temp file and rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {:?}", dir))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
    tmp.write_all(bytes)
        .with_context(|| format!("Failed to write {:?}", tmp.path()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync {:?}", tmp.path()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to rename temp file to {:?}", path))?;
    Ok(())
}

/// JSON snapshot file keyed by symbol.
///
/// Clones share one write lock.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl StateStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store rooted in `data_dir` (`state.json`).
    pub fn in_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self::new(data_dir.as_ref().join("state.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {:?}", self.path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", self.path))
    }

    /// Load the snapshot for `symbol`.
    ///
    /// A missing file, missing entry or unreadable content yields `None`
    /// so the caller starts fresh.
    pub fn load(&self, symbol: &str) -> Option<PersistedSnapshot> {
        if !self.path.exists() {
            debug!(path = ?self.path, "No state file");
            return None;
        }

        let map = match self.read_map() {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "⚠️  [STATE] Unreadable state file, starting fresh");
                return None;
            }
        };

        let entry = map.get(symbol)?.clone();
        match serde_json::from_value(entry) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(%symbol, error = %e, "⚠️  [STATE] Malformed snapshot, starting fresh");
                None
            }
        }
    }

    /// Save the snapshot for `symbol`, keeping entries of other symbols.
    pub fn save(&self, symbol: &str, snapshot: &PersistedSnapshot) -> Result<()> {
        // Read-modify-write of the shared map
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("State store lock poisoned"))?;
        let mut map = if self.path.exists() {
            self.read_map().unwrap_or_default()
        } else {
            Map::new()
        };
        map.insert(
            symbol.to_string(),
            serde_json::to_value(snapshot).context("Failed to encode snapshot")?,
        );

        let bytes = serde_json::to_vec_pretty(&map).context("Failed to encode state file")?;
        write_atomic(&self.path, &bytes)?;
        debug!(%symbol, path = ?self.path, "State snapshot saved");
        Ok(())
    }
}

/// Binary price history file.
#[derive(Debug, Clone)]
pub struct HistoryFile {
    path: PathBuf,
}

impl HistoryFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir<P: AsRef<Path>>(data_dir: P, symbol: &str) -> Self {
        Self::new(data_dir.as_ref().join(format!("{}.prices", symbol)))
    }

    pub fn save(&self, prices: &[f64]) -> Result<()> {
        let bytes = bincode::serialize(prices).context("Failed to encode price history")?;
        write_atomic(&self.path, &bytes)?;
        debug!(samples = prices.len(), "Price history saved");
        Ok(())
    }

    /// Load stored prices, oldest first. A missing file is an empty history.
    pub fn load(&self) -> Result<Vec<f64>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&self.path).with_context(|| format!("Failed to read {:?}", self.path))?;
        let prices: Vec<f64> = bincode::deserialize(&bytes)
            .with_context(|| format!("Failed to decode price history {:?}", self.path))?;
        info!(samples = prices.len(), "📈 [HISTORY] Price history loaded");
        Ok(prices)
    }
}
