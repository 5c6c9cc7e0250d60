//! File and tabular persistence for [`EntityCache`].

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::snapshot::Snapshot;
use super::store::EntityCache;
use crate::codec::{SnapshotCodec, Table};
use crate::error::{CacheError, Result};
use crate::reader::{Entity, PropertyFilter};

impl<E: Entity, C: SnapshotCodec> EntityCache<E, C> {
    fn resolve_path(&self, path: Option<&Path>) -> Result<PathBuf> {
        match path {
            Some(path) => Ok(path.to_path_buf()),
            None => self
                .default_file_path
                .clone()
                .ok_or(CacheError::NoFilePath),
        }
    }

    /// Current entities wrapped in a snapshot envelope.
    pub fn snapshot(&self) -> Snapshot<E> {
        Snapshot::new(&self.name, self.entities.values().cloned().collect())
    }

    /// Write the entity set to `path`, or to the default path.
    /// Dirty sets are not persisted.
    pub fn save_to_file(&self, path: Option<&Path>) -> Result<()> {
        let path = self.resolve_path(path)?;
        self.codec.serialize_to_file(&self.snapshot(), &path)?;
        info!(cache = %self.name, path = %path.display(), count = self.entities.len(), "Cache saved");
        Ok(())
    }

    /// Replace the cache contents with the snapshot at `path`, or at the
    /// default path. A missing file is first created from the current state.
    pub fn load_from_file(&mut self, path: Option<&Path>) -> Result<Snapshot<E>> {
        let path = self.resolve_path(path)?;
        if !path.exists() {
            debug!(path = %path.display(), "Snapshot missing, writing current state");
            self.save_to_file(Some(&path))?;
        }
        let snapshot: Snapshot<E> = self.codec.deserialize_from_file(&path)?;
        self.adopt(snapshot)
    }

    /// Replace the cache contents with a snapshot held in memory.
    pub fn load_from_text(&mut self, text: &str) -> Result<Snapshot<E>> {
        let snapshot: Snapshot<E> = self.codec.deserialize_from_text(text)?;
        self.adopt(snapshot)
    }

    /// Returns the snapshot metadata with its entities moved into the cache.
    fn adopt(&mut self, mut snapshot: Snapshot<E>) -> Result<Snapshot<E>> {
        let entities = self.index_entities(std::mem::take(&mut snapshot.entities))?;
        self.clear();
        self.entities = entities;
        info!(
            cache = %self.name,
            count = self.entities.len(),
            age = %snapshot.age_display(),
            "Cache loaded"
        );
        Ok(snapshot)
    }

    // ===== Tabular export =====

    /// Project the matching entities onto a table, one column per field.
    pub fn to_table(
        &self,
        filter: Option<&PropertyFilter>,
        exact_match: bool,
        shape_column_names: bool,
    ) -> Result<Table> {
        let mut table = Table::new(self.descriptor.column_names(shape_column_names));
        for entity in self.get_entities_by_properties(filter, exact_match)? {
            table.push_row(self.descriptor.to_row(entity));
        }
        Ok(table)
    }

    pub fn export_to_writer<W: Write>(
        &self,
        writer: W,
        filter: Option<&PropertyFilter>,
        exact_match: bool,
        shape_column_names: bool,
    ) -> Result<()> {
        self.to_table(filter, exact_match, shape_column_names)?
            .write_csv(writer)
    }

    pub fn export_to_csv(
        &self,
        path: &Path,
        filter: Option<&PropertyFilter>,
        exact_match: bool,
        shape_column_names: bool,
    ) -> Result<()> {
        let file = File::create(path)?;
        self.export_to_writer(BufWriter::new(file), filter, exact_match, shape_column_names)?;
        info!(cache = %self.name, path = %path.display(), "Exported to CSV");
        Ok(())
    }

    pub fn export_to_bytes(
        &self,
        filter: Option<&PropertyFilter>,
        exact_match: bool,
        shape_column_names: bool,
    ) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.export_to_writer(&mut buffer, filter, exact_match, shape_column_names)?;
        Ok(buffer)
    }

    pub fn export_to_string(
        &self,
        filter: Option<&PropertyFilter>,
        exact_match: bool,
        shape_column_names: bool,
    ) -> Result<String> {
        let bytes = self.export_to_bytes(filter, exact_match, shape_column_names)?;
        String::from_utf8(bytes).map_err(|e| CacheError::InvalidValue {
            field: "<csv>".to_string(),
            reason: e.to_string(),
        })
    }

    // ===== Tabular import =====

    /// Replace the entity set with the rows of a CSV file.
    /// Dirty sets are reset; on error the cache is left unchanged.
    pub fn import_from_csv(&mut self, path: &Path, shape_column_names: bool) -> Result<usize> {
        let file = File::open(path)?;
        let count = self.import_from_reader(BufReader::new(file), shape_column_names)?;
        info!(cache = %self.name, path = %path.display(), count, "Imported from CSV");
        Ok(count)
    }

    pub fn import_from_reader<R: Read>(&mut self, reader: R, shape_column_names: bool) -> Result<usize> {
        let table = Table::read_csv(reader)?;
        let entities = table
            .rows
            .iter()
            .map(|row| self.descriptor.from_row(&table.columns, row, shape_column_names))
            .collect::<Result<Vec<_>>>()?;
        let entities = self.index_entities(entities)?;
        self.clear();
        self.entities = entities;
        Ok(self.entities.len())
    }
}
