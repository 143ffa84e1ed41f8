use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::ValuationError;
use crate::runs::model::ValuationRun;
use crate::types::DealId;
use crate::ValuationResult;

/// Persistence for valuation runs.
///
/// Every `save` is atomic: readers see either the previous record or the
/// new one, never a partial write. A record in a terminal state may only be
/// re-saved unchanged.
pub trait RunStore: Send + Sync {
    fn save(&self, run: &ValuationRun) -> ValuationResult<()>;
    fn get(&self, run_id: Uuid) -> ValuationResult<Option<ValuationRun>>;
    /// Runs for a deal, newest first.
    fn list(&self, deal_id: DealId) -> ValuationResult<Vec<ValuationRun>>;
}

fn check_overwrite(existing: &ValuationRun, next: &ValuationRun) -> ValuationResult<()> {
    if existing.status.is_terminal() && existing != next {
        return Err(ValuationError::Storage(format!(
            "run {} is already {} and cannot be modified",
            existing.id, existing.status
        )));
    }
    Ok(())
}

fn newest_first(runs: &mut [ValuationRun]) {
    runs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, (u64, ValuationRun)>>,
    sequence: Mutex<u64>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&self) -> ValuationResult<u64> {
        let mut seq = self
            .sequence
            .lock()
            .map_err(|_| ValuationError::Storage("run sequence lock poisoned".into()))?;
        *seq += 1;
        Ok(*seq)
    }
}

impl RunStore for InMemoryRunStore {
    fn save(&self, run: &ValuationRun) -> ValuationResult<()> {
        let next_seq = self.next_sequence()?;
        let mut runs = self
            .runs
            .write()
            .map_err(|_| ValuationError::Storage("run store lock poisoned".into()))?;
        let seq = match runs.get(&run.id) {
            Some((seq, existing)) => {
                check_overwrite(existing, run)?;
                *seq
            }
            None => next_seq,
        };
        runs.insert(run.id, (seq, run.clone()));
        Ok(())
    }

    fn get(&self, run_id: Uuid) -> ValuationResult<Option<ValuationRun>> {
        let runs = self
            .runs
            .read()
            .map_err(|_| ValuationError::Storage("run store lock poisoned".into()))?;
        Ok(runs.get(&run_id).map(|(_, run)| run.clone()))
    }

    fn list(&self, deal_id: DealId) -> ValuationResult<Vec<ValuationRun>> {
        let runs = self
            .runs
            .read()
            .map_err(|_| ValuationError::Storage("run store lock poisoned".into()))?;
        let mut matching: Vec<&(u64, ValuationRun)> =
            runs.values().filter(|(_, r)| r.deal_id == deal_id).collect();
        matching.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(matching.into_iter().map(|(_, r)| r.clone()).collect())
    }
}

/// One JSON document per run in a directory, written via a temp file and
/// rename.
#[derive(Debug)]
pub struct JsonFileRunStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileRunStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> ValuationResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            ValuationError::Storage(format!("cannot create {}: {e}", root.display()))
        })?;
        Ok(JsonFileRunStore {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.root.join(format!("{run_id}.json"))
    }

    fn read(path: &Path) -> ValuationResult<ValuationRun> {
        let content = fs::read_to_string(path)
            .map_err(|e| ValuationError::Storage(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&content).map_err(|e| {
            ValuationError::Serialization(format!("corrupt run file {}: {e}", path.display()))
        })
    }
}

impl RunStore for JsonFileRunStore {
    fn save(&self, run: &ValuationRun) -> ValuationResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ValuationError::Storage("run store lock poisoned".into()))?;

        let path = self.path_for(run.id);
        if path.exists() {
            check_overwrite(&Self::read(&path)?, run)?;
        }

        let body = serde_json::to_vec_pretty(run)?;
        let tmp = self.root.join(format!(".{}.json.tmp", run.id));
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!(run_id = %run.id, path = %path.display(), "Run persisted");
        Ok(())
    }

    fn get(&self, run_id: Uuid) -> ValuationResult<Option<ValuationRun>> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn list(&self, deal_id: DealId) -> ValuationResult<Vec<ValuationRun>> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_run = path.extension().is_some_and(|ext| ext == "json")
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if !is_run {
                continue;
            }
            let run = Self::read(&path)?;
            if run.deal_id == deal_id {
                runs.push(run);
            }
        }
        newest_first(&mut runs);
        Ok(runs)
    }
}
