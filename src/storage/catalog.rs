use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::info;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::common::{KernelError, Result};
use crate::storage::DbFile;

/// What the catalog file remembers about a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub id: u32,
    pub name: String,
    pub tuple_size: usize,
}

struct CatalogEntry {
    schema: TableSchema,
    file: Arc<dyn DbFile>,
}

/// Resolves table identifiers to their storage.
#[derive(Default)]
pub struct Catalog {
    tables: RwLock<HashMap<u32, CatalogEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `file` under `name`, replacing any table with the same id or name.
    pub fn add_table(&self, file: Arc<dyn DbFile>, name: &str) {
        let schema = TableSchema {
            id: file.id(),
            name: name.to_string(),
            tuple_size: file.tuple_size(),
        };

        let mut tables = self.tables.write();
        tables.retain(|_, entry| entry.schema.name != name);
        tables.insert(schema.id, CatalogEntry { schema, file });
    }

    pub fn get_database_file(&self, table_id: u32) -> Result<Arc<dyn DbFile>> {
        self.tables
            .read()
            .get(&table_id)
            .map(|entry| Arc::clone(&entry.file))
            .ok_or_else(|| KernelError::TableNotFound(table_id.to_string()))
    }

    pub fn table_id(&self, name: &str) -> Result<u32> {
        self.tables
            .read()
            .values()
            .find(|entry| entry.schema.name == name)
            .map(|entry| entry.schema.id)
            .ok_or_else(|| KernelError::TableNotFound(name.to_string()))
    }

    pub fn next_table_id(&self) -> u32 {
        self.tables
            .read()
            .keys()
            .max()
            .map_or(0, |max_id| max_id + 1)
    }

    pub fn schemas(&self) -> Vec<TableSchema> {
        let mut schemas: Vec<TableSchema> = self
            .tables
            .read()
            .values()
            .map(|entry| entry.schema.clone())
            .collect();
        schemas.sort_by_key(|schema| schema.id);
        schemas
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serialize(&self.schemas())?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Table schemas stored at `path`; empty when the file does not exist yet.
    pub fn load_schemas(path: &Path) -> Result<Vec<TableSchema>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let schemas: Vec<TableSchema> = bincode::deserialize(&fs::read(path)?)?;
        info!("Loaded {} table(s) from {}", schemas.len(), path.display());
        Ok(schemas)
    }
}
