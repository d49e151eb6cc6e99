use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::stats::TripAggregate;
use crate::error::{HaloError, HaloResult};

/// Key-value persistence for the lifetime trip aggregate
pub trait TripStore: Send + Sync {
    fn load_aggregate(&self) -> HaloResult<TripAggregate>;
    fn save_aggregate(&self, aggregate: &TripAggregate) -> HaloResult<()>;
}

/// Aggregate kept as one pretty-printed JSON document
pub struct JsonTripStore {
    path: PathBuf,
}

impl JsonTripStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TripStore for JsonTripStore {
    fn load_aggregate(&self) -> HaloResult<TripAggregate> {
        if !self.path.exists() {
            return Ok(TripAggregate::default());
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes a sibling temp file and renames it over the old one, so a crash
    /// mid-write leaves the previous aggregate intact
    fn save_aggregate(&self, aggregate: &TripAggregate) -> HaloResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(aggregate)?)?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| HaloError::Storage(format!("{}: {}", self.path.display(), e)))
    }
}

/// In-memory store; `failing()` rejects every save
#[derive(Default)]
pub struct MemoryTripStore {
    aggregate: Mutex<TripAggregate>,
    saves: Mutex<u32>,
    fail_saves: bool,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aggregate(aggregate: TripAggregate) -> Self {
        Self {
            aggregate: Mutex::new(aggregate),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_saves: true,
            ..Self::default()
        }
    }

    pub fn save_count(&self) -> u32 {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }

    pub fn current(&self) -> TripAggregate {
        self.aggregate.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl TripStore for MemoryTripStore {
    fn load_aggregate(&self) -> HaloResult<TripAggregate> {
        self.aggregate
            .lock()
            .map(|a| a.clone())
            .map_err(|_| HaloError::Storage("aggregate lock poisoned".to_string()))
    }

    fn save_aggregate(&self, aggregate: &TripAggregate) -> HaloResult<()> {
        if self.fail_saves {
            return Err(HaloError::Storage("write rejected".to_string()));
        }
        let mut current = self
            .aggregate
            .lock()
            .map_err(|_| HaloError::Storage("aggregate lock poisoned".to_string()))?;
        *current = aggregate.clone();
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}
