use std::fs;
use std::path::{Path, PathBuf};

use crate::common::Result;

const DATA_DIR: &str = "data";
const LOG_DIR: &str = "log";
const CATALOG_DIR: &str = "catalog";

/// Directory layout of one database installation:
/// `data/table_<id>.dat`, `log/wal.log` and `catalog/catalog.dat`.
pub struct DBFiles {
    root: PathBuf,
}

impl DBFiles {
    /// Uses `db_path` as the root, creating the layout if it is missing.
    pub fn new(db_path: &Path) -> Result<Self> {
        for dir in [DATA_DIR, LOG_DIR, CATALOG_DIR] {
            fs::create_dir_all(db_path.join(dir))?;
        }
        Ok(Self {
            root: db_path.to_path_buf(),
        })
    }

    pub fn get_data_file_path(&self, table_id: u32) -> PathBuf {
        self.root
            .join(DATA_DIR)
            .join(format!("table_{}.dat", table_id))
    }

    pub fn get_log_file_path(&self) -> PathBuf {
        self.root.join(LOG_DIR).join("wal.log")
    }

    pub fn get_catalog_file_path(&self) -> PathBuf {
        self.root.join(CATALOG_DIR).join("catalog.dat")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deletes the whole installation.
    pub fn cleanup(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}
