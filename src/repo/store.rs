//! Durable store for model artifacts and JSON documents
//!
//! Layout under the data directory:
//! - `models/<strategy>/<target>.bin` bincode artifacts
//! - `current_model.json`, `training_history.json`, `auto_train_config.json`
//!
//! Every write goes to a temporary sibling file which is then renamed over
//! the destination, so readers never observe a partial file.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::domain::{StrategyType, Target};
use crate::error::{ForecastError, Result};

pub const CURRENT_MODEL_FILE: &str = "current_model.json";
pub const HISTORY_FILE: &str = "training_history.json";
pub const AUTO_TRAIN_CONFIG_FILE: &str = "auto_train_config.json";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Selected strategy type, persisted across restarts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentModelDoc {
    pub strategy_type: StrategyType,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn model_path(&self, strategy: StrategyType, target: Target) -> PathBuf {
        self.root
            .join("models")
            .join(strategy.to_string())
            .join(format!("{target}.bin"))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| ForecastError::persistence(path, "path has no parent directory"))?;
        fs::create_dir_all(parent).map_err(|e| ForecastError::persistence(parent, e))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        // one temp file per write so concurrent writers never share a path
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = parent.join(format!(".{file_name}.{}.{seq}.tmp", std::process::id()));

        let written = fs::File::create(&tmp).and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        });
        if let Err(e) = written.and_then(|_| fs::rename(&tmp, path)) {
            let _ = fs::remove_file(&tmp);
            return Err(ForecastError::persistence(path, e));
        }

        debug!(path = %path.display(), bytes = bytes.len(), "wrote file");
        Ok(())
    }

    fn read_optional(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ForecastError::persistence(path, e)),
        }
    }

    pub fn save_model<T: Serialize>(
        &self,
        strategy: StrategyType,
        target: Target,
        artifact: &T,
    ) -> Result<()> {
        let path = self.model_path(strategy, target);
        let bytes = bincode::serialize(artifact).map_err(|e| ForecastError::persistence(&path, e))?;
        self.write_atomic(&path, &bytes)
    }

    pub fn load_model<T: DeserializeOwned>(
        &self,
        strategy: StrategyType,
        target: Target,
    ) -> Result<Option<T>> {
        let path = self.model_path(strategy, target);
        self.read_optional(&path)?
            .map(|bytes| bincode::deserialize(&bytes).map_err(|e| ForecastError::persistence(&path, e)))
            .transpose()
    }

    pub fn save_json<T: Serialize>(&self, name: &str, doc: &T) -> Result<()> {
        let path = self.root.join(name);
        let bytes =
            serde_json::to_vec_pretty(doc).map_err(|e| ForecastError::persistence(&path, e))?;
        self.write_atomic(&path, &bytes)
    }

    pub fn load_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.root.join(name);
        self.read_optional(&path)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(|e| ForecastError::persistence(&path, e)))
            .transpose()
    }

    pub fn save_current(&self, strategy: StrategyType) -> Result<()> {
        self.save_json(
            CURRENT_MODEL_FILE,
            &CurrentModelDoc {
                strategy_type: strategy,
                updated_at: Utc::now(),
            },
        )
    }

    pub fn load_current(&self) -> Result<Option<CurrentModelDoc>> {
        self.load_json(CURRENT_MODEL_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_model_path_layout() {
        let store = ModelStore::new("/data");
        assert_eq!(
            store.model_path(StrategyType::GradientBoosting, Target::UvIndex),
            PathBuf::from("/data/models/gradient_boosting/uv_index.bin")
        );
    }

    #[test]
    fn test_json_round_trip_and_missing_files() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());

        assert!(store.load_current().unwrap().is_none());
        store.save_current(StrategyType::Recurrent).unwrap();
        let doc = store.load_current().unwrap().unwrap();
        assert_eq!(doc.strategy_type, StrategyType::Recurrent);

        // no temp files left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_binary_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path());
        let artifact = vec![1.5f64, 2.5, 3.5];
        store
            .save_model(StrategyType::Seasonal, Target::Dust, &artifact)
            .unwrap();
        let loaded: Vec<f64> = store
            .load_model(StrategyType::Seasonal, Target::Dust)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, artifact);
        assert!(store
            .load_model::<Vec<f64>>(StrategyType::Seasonal, Target::Co2)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_concurrent_writers_never_expose_torn_documents() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ModelStore::new(dir.path()));
        store.save_json("shared.json", &vec![0u32]).unwrap();

        let writers: Vec<_> = (1..=4u32)
            .map(|w| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for round in 0..50u32 {
                        let len = ((w * 37 + round * 11) % 200 + 1) as usize;
                        store.save_json("shared.json", &vec![w; len]).unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            let doc: Vec<u32> = store.load_json("shared.json").unwrap().unwrap();
            assert!(!doc.is_empty());
            assert!(doc.iter().all(|v| *v == doc[0]));
        }
        for writer in writers {
            writer.join().unwrap();
        }

        let doc: Vec<u32> = store.load_json("shared.json").unwrap().unwrap();
        assert!(doc.iter().all(|v| *v == doc[0]));
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_corrupt_document_is_a_persistence_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CURRENT_MODEL_FILE), b"{not json").unwrap();
        let store = ModelStore::new(dir.path());
        assert!(matches!(
            store.load_current(),
            Err(ForecastError::Persistence { .. })
        ));
    }
}
