use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::engine::{FeatureTable, VectorReader};
use crate::errors::{GeodataError, Result};
use crate::spec::Crs;

/// Serves feature tables registered under a path.
///
/// Tables are returned as registered; no reprojection takes place, so a
/// table whose CRS differs from the requested one is handed back unchanged
/// for the caller to reject.
#[derive(Debug, Clone, Default)]
pub struct MemoryVectorReader {
    tables: Arc<RwLock<HashMap<PathBuf, FeatureTable>>>,
}

impl MemoryVectorReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `table` under `path`, replacing any previous one.
    pub fn insert(&self, path: impl Into<PathBuf>, table: FeatureTable) {
        let mut tables = self
            .tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tables.insert(path.into(), table);
    }

    pub fn with_table(self, path: impl Into<PathBuf>, table: FeatureTable) -> Self {
        self.insert(path, table);
        self
    }
}

impl VectorReader for MemoryVectorReader {
    fn read(&self, path: &Path, _target_crs: &Crs) -> Result<FeatureTable> {
        let tables = self
            .tables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        tables.get(path).cloned().ok_or_else(|| {
            GeodataError::raster_io(path, "no feature table registered for this path")
        })
    }
}
