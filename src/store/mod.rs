//! Append-only table store.
//!
//! Each logical table lives in the store directory as `<table>.csv` next to a
//! `<table>.schema.json` sidecar. The first append fixes the schema, including the
//! character capacity of every text column; later appends must fit inside it or
//! fail without touching the table.

pub mod schema;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, info};

pub use schema::{Column, ColumnType, Schema};

const LOCK_FILE: &str = ".lock";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Schema file error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store {0} is held by another run (remove {LOCK_FILE} if it is stale)")]
    Locked(PathBuf),
    #[error("Table {table} has an incompatible schema\n  existing: {existing}\n  current:  {current}")]
    SchemaMismatch {
        table: String,
        existing: Schema,
        current: Schema,
    },
}

/// A row type that can be appended to a table.
pub trait Record: Serialize {
    /// Column layout in serialization order. Text columns carry their minimum
    /// declared width.
    fn columns() -> Vec<Column>;
}

/// Handle on a store directory. Holding it holds the directory lock, which is
/// released when the handle is dropped, whether the run finished or failed.
#[derive(Debug)]
pub struct TableStore {
    dir: PathBuf,
}

impl TableStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock = dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&lock) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Locked(lock));
            }
            Err(e) => return Err(e.into()),
        }

        debug!(dir = %dir.display(), "Opened table store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn contains(&self, table: &str) -> bool {
        self.data_path(table).exists()
    }

    pub fn schema(&self, table: &str) -> Result<Option<Schema>, StoreError> {
        let path = self.schema_path(table);
        if !path.exists() {
            return Ok(None);
        }
        let schema = serde_json::from_reader(File::open(path)?)?;
        Ok(Some(schema))
    }

    /// Appends `rows` to `table`, creating it on first use.
    ///
    /// # Errors
    ///
    /// [`StoreError::SchemaMismatch`] if the rows do not fit the persisted schema.
    /// Both schemas are logged before returning and nothing is written.
    pub fn append<T: Record>(&mut self, table: &str, rows: &[T]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            debug!(table, "Nothing to append");
            return Ok(0);
        }

        // Serialize into memory first so a rejected batch never reaches the table
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for row in rows {
            writer.serialize(row)?;
        }
        let staged = writer
            .into_inner()
            .map_err(|e| StoreError::Io(e.into_error()))?;

        let current = measure(T::columns(), &staged)?;

        let persisted = match self.schema(table)? {
            Some(existing) => {
                if !existing.accepts(&current) {
                    error!(table, "Structure of stored table is: {existing}");
                    error!(table, "Structure of current rows is: {current}");
                    return Err(StoreError::SchemaMismatch {
                        table: table.to_string(),
                        existing,
                        current,
                    });
                }
                existing
            }
            None => {
                let file = File::create(self.schema_path(table))?;
                serde_json::to_writer_pretty(file, &current)?;
                current
            }
        };

        let data_path = self.data_path(table);
        let needs_header = fs::metadata(&data_path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new().append(true).create(true).open(&data_path)?;
        if needs_header {
            let mut header = WriterBuilder::new().from_writer(Vec::new());
            header.write_record(persisted.names())?;
            let header = header
                .into_inner()
                .map_err(|e| StoreError::Io(e.into_error()))?;
            file.write_all(&header)?;
        }
        file.write_all(&staged)?;
        file.flush()?;

        info!(table, rows = rows.len(), "Appended rows");
        Ok(rows.len())
    }

    /// Reads every row of `table`. A table that was never written reads as empty.
    pub fn read<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, StoreError> {
        let path = self.data_path(table);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut rdr = ReaderBuilder::new().from_path(path)?;
        let mut rows = Vec::new();
        for result in rdr.deserialize() {
            let record: T = result?;
            rows.push(record);
        }
        debug!(table, rows = rows.len(), "Read table");
        Ok(rows)
    }

    fn data_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.csv"))
    }

    fn schema_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.schema.json"))
    }
}

impl Drop for TableStore {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(self.dir.join(LOCK_FILE)) {
            error!(dir = %self.dir.display(), error = %e, "Failed to release store lock");
        } else {
            debug!(dir = %self.dir.display(), "Closed table store");
        }
    }
}

/// Widens each text column of `columns` to the longest value found in `staged`.
fn measure(mut columns: Vec<Column>, staged: &[u8]) -> Result<Schema, StoreError> {
    let mut rdr = ReaderBuilder::new().has_headers(false).from_reader(staged);
    for result in rdr.records() {
        let record = result?;
        for (column, value) in columns.iter_mut().zip(record.iter()) {
            if column.kind == ColumnType::Text {
                column.width = column.width.max(value.chars().count());
            }
        }
    }
    Ok(Schema::new(columns))
}

/// Panics unless `T::columns()` names the fields `row` serializes, in order.
#[cfg(test)]
pub(crate) fn assert_columns_match<T: Record>(row: &T) {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.serialize(row).unwrap();
    let bytes = writer.into_inner().unwrap();
    let mut rdr = ReaderBuilder::new().from_reader(bytes.as_slice());
    let header: Vec<String> = rdr.headers().unwrap().iter().map(str::to_string).collect();
    let declared: Vec<String> = T::columns().into_iter().map(|c| c.name).collect();
    assert_eq!(header, declared);
}
