//! # Conversion catalog
//! This module implements the abstraction over the underlying [SQLite](https://sqlite.org/)
//! database in which the conversion catalog is stored.
//!
//! The catalog holds one row per file (see [`FileRecord`]) and functions as
//! the audit trail of a conversion run: rows are created by discovery,
//! mutated exclusively by the single writer applying worker
//! [`Outcome`](crate::worker::Outcome) events, and purged only when a parent
//! conversion is re-run.
pub mod record;
mod sql;

use std::{path::Path, time::Duration};

use chrono::Local;
use log::debug;
use rusqlite::{
    Connection, OpenFlags, OptionalExtension, Transaction, params_from_iter, types::Value,
};

pub use self::record::{FileRecord, Filter, Status};
use crate::{
    error::DatabaseError,
    worker::{Outcome, ParentRef},
};

/// Internal representation of the underlying SQL database.
///
/// The single `Files` table stores one row per [`FileRecord`]; the table
/// schema is documented in [`sql::init_files`]. `path` is unique within a
/// catalog and `source_id` links derived rows to the row they were produced
/// from, forming a forest rooted at the original-source rows.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    /// Open a catalog file, creating it if necessary.
    ///
    /// If the expected table is missing, create it. If it exists with an
    /// unexpected schema, this causes an error.
    pub fn open<P: AsRef<Path>>(db_file: P) -> Result<Self, DatabaseError> {
        debug!(
            "Initializing new connection to `{}`",
            db_file.as_ref().display()
        );
        let mut conn = Connection::open(db_file)?;
        conn.busy_timeout(Duration::from_secs(30))?;
        debug!("Enabling write-ahead log");
        conn.prepare_cached(sql::set_wal())?.query_row((), |_| Ok(()))?;

        let tx = conn.transaction()?;
        Self::initialize_table(&tx, "Files", sql::init_files())?;
        tx.commit()?;

        Ok(Self { conn })
    }

    /// Open an existing catalog read-only. Used by the scheduler feeder so
    /// row streaming does not contend with the writer connection.
    pub fn open_read_only<P: AsRef<Path>>(db_file: P) -> Result<Self, DatabaseError> {
        debug!(
            "Opening read-only connection to `{}`",
            db_file.as_ref().display()
        );
        let conn = Connection::open_with_flags(
            db_file,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(30))?;
        Ok(Self { conn })
    }

    /// Validate the schema of an existing table, or return an appropriate error.
    fn validate_table_schema(
        tx: &Transaction,
        table_name: &str,
        expected_schema: &str,
    ) -> Result<(), DatabaseError> {
        let mut table_selector = tx.prepare_cached(sql::get_table_schema())?;
        let mut record_rows = table_selector.query([table_name])?;
        match record_rows.next() {
            Ok(Some(row)) => {
                let table_schema: String = row.get("sql")?;
                if table_schema.trim() == expected_schema.trim() {
                    Ok(())
                } else {
                    Err(DatabaseError::TableIncorrectSchema(
                        table_name.into(),
                        table_schema,
                    ))
                }
            }
            Ok(None) => Err(DatabaseError::TableMissing(table_name.into())),
            Err(why) => Err(why.into()),
        }
    }

    /// Initialize a table inside a transaction.
    fn initialize_table(
        tx: &Transaction,
        table_name: &str,
        schema: &str,
    ) -> Result<(), DatabaseError> {
        debug!("Initializing new or validating existing table `{table_name}`");
        match Self::validate_table_schema(tx, table_name, schema) {
            Ok(()) => Ok(()),
            Err(DatabaseError::TableMissing(_)) => {
                tx.execute(schema, ())?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Is the catalog empty? Decides whether discovery runs.
    pub fn is_empty(&self) -> Result<bool, DatabaseError> {
        Ok(self.count(&Filter::default())? == 0)
    }

    /// Insert a new record, returning the assigned row id.
    pub fn insert(&mut self, record: &FileRecord) -> Result<i64, DatabaseError> {
        let tx = self.conn.transaction()?;
        let id = Self::insert_tx(&tx, record)?;
        tx.commit()?;
        Ok(id)
    }

    fn insert_tx(tx: &Transaction, record: &FileRecord) -> Result<i64, DatabaseError> {
        let mut setter = tx.prepare_cached(sql::insert_file())?;
        setter.execute((
            &record.path,
            record.source_id,
            &record.mime,
            &record.format,
            &record.version,
            &record.puid,
            &record.encoding,
            record.size,
            record.status,
            record.kept,
            record.status_ts.map(|ts| ts.to_rfc3339()),
        ))?;
        let id = tx.last_insert_rowid();
        debug!("Record '{}' assigned internal ID `{id}`", record.path);
        Ok(id)
    }

    /// Update the mutable columns of the row with `record.id`.
    pub fn update(&mut self, record: &FileRecord) -> Result<(), DatabaseError> {
        let tx = self.conn.transaction()?;
        Self::update_tx(&tx, record)?;
        Ok(tx.commit()?)
    }

    fn update_tx(tx: &Transaction, record: &FileRecord) -> Result<(), DatabaseError> {
        debug!("Updating record `{}` ({})", record.id, record.status);
        let mut updater = tx.prepare_cached(sql::update_file())?;
        updater.execute((
            record.id,
            &record.path,
            record.source_id,
            &record.mime,
            &record.format,
            &record.version,
            &record.puid,
            &record.encoding,
            record.size,
            record.status,
            record.kept,
            record.status_ts.map(|ts| ts.to_rfc3339()),
        ))?;
        Ok(())
    }

    /// Delete the row with the given id.
    pub fn delete(&mut self, id: i64) -> Result<(), DatabaseError> {
        self.conn.prepare_cached(sql::delete_file())?.execute((id,))?;
        Ok(())
    }

    /// Delete the entire derivation subtree below `id`: children,
    /// grandchildren and so on. The row itself is retained.
    pub fn delete_descendants(&mut self, id: i64) -> Result<(), DatabaseError> {
        debug!("Purging descendants of record `{id}`");
        self.conn
            .prepare_cached(sql::delete_descendants())?
            .execute((id,))?;
        Ok(())
    }

    /// Count the rows matching `filter`.
    pub fn count(&self, filter: &Filter) -> Result<u64, DatabaseError> {
        let mut stmt = sql::count_files().to_owned();
        let mut params: Vec<Value> = Vec::new();
        filter.push_sql(&mut stmt, &mut params);
        Ok(self
            .conn
            .prepare(&stmt)?
            .query_row(params_from_iter(params), |row| row.get::<_, i64>(0))?
            as u64)
    }

    /// Stream the rows matching `filter` in path order. The callback returns
    /// `false` to stop early.
    pub fn for_each<F>(&self, filter: &Filter, mut f: F) -> Result<(), DatabaseError>
    where
        F: FnMut(FileRecord) -> bool,
    {
        let mut stmt = sql::select_files().to_owned();
        let mut params: Vec<Value> = Vec::new();
        filter.push_sql(&mut stmt, &mut params);
        stmt.push_str(" ORDER BY path");

        let mut selector = self.conn.prepare(&stmt)?;
        let mut rows = selector.query(params_from_iter(params))?;
        while let Some(row) = rows.next()? {
            if !f(FileRecord::from_row(row)?) {
                break;
            }
        }
        Ok(())
    }

    /// The distinct top-level directories among the rows matching `filter`.
    /// Used to partition work per subfolder.
    pub fn subfolders(&self, filter: &Filter) -> Result<Vec<String>, DatabaseError> {
        let mut stmt = sql::subfolders().to_owned();
        let mut params: Vec<Value> = Vec::new();
        filter.push_sql(&mut stmt, &mut params);
        stmt.push_str(if stmt.contains("WHERE") {
            " AND instr(path, '/') > 0"
        } else {
            " WHERE instr(path, '/') > 0"
        });
        stmt.push_str(" ORDER BY folder");

        let mut selector = self.conn.prepare(&stmt)?;
        let rows = selector.query_map(params_from_iter(params), |row| row.get(0))?;
        let mut folders = Vec::new();
        for folder in rows {
            folders.push(folder?);
        }
        Ok(folders)
    }

    /// Bulk-insert discovery rows, skipping paths which already have a row.
    /// Returns the number of rows actually inserted.
    pub fn append_rows(&mut self, records: &[FileRecord]) -> Result<usize, DatabaseError> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut setter = tx.prepare_cached(sql::append_file())?;
            for record in records {
                inserted += setter.execute((
                    &record.path,
                    record.source_id,
                    &record.mime,
                    &record.format,
                    &record.version,
                    &record.puid,
                    &record.encoding,
                    record.size,
                    record.status,
                    record.kept,
                    record.status_ts.map(|ts| ts.to_rfc3339()),
                ))?;
            }
        }
        tx.commit()?;
        debug!("Appended {inserted} rows");
        Ok(inserted)
    }

    /// Get a record by id.
    pub fn get(&self, id: i64) -> Result<Option<FileRecord>, DatabaseError> {
        Ok(self
            .conn
            .prepare_cached(sql::get_file())?
            .query_row((id,), |row| FileRecord::from_row(row))
            .optional()?)
    }

    /// Get the row id for a path, if present.
    pub fn id_by_path(&self, path: &str) -> Result<Option<i64>, DatabaseError> {
        Self::id_by_path_inner(&self.conn, path)
    }

    fn id_by_path_inner(conn: &Connection, path: &str) -> Result<Option<i64>, DatabaseError> {
        Ok(conn
            .prepare_cached(sql::get_id_by_path())?
            .query_row((path,), |row| row.get(0))
            .optional()?)
    }

    /// Apply one worker outcome atomically: purge descendants when
    /// requested, update the parent row, insert (or refresh) the derived
    /// rows. Every affected row gets `status_ts` stamped with the same
    /// timestamp.
    ///
    /// Derived rows reference their parent either by row id or by index
    /// into the event's child list; indices are resolved to the ids
    /// assigned here. A derived path which already has a row updates that
    /// row in place, except when the existing row is the parent itself
    /// (an in-place conversion produced the same path), which is skipped.
    pub fn apply_outcome(&mut self, outcome: Outcome) -> Result<(), DatabaseError> {
        let now = Local::now();
        let tx = self.conn.transaction()?;

        if outcome.purge_descendants {
            debug!("Purging descendants of record `{}`", outcome.record.id);
            tx.prepare_cached(sql::delete_descendants())?
                .execute((outcome.record.id,))?;
        }

        let mut parent = outcome.record;
        parent.status_ts = Some(now);
        Self::update_tx(&tx, &parent)?;

        let mut assigned: Vec<i64> = Vec::with_capacity(outcome.children.len());
        for child in outcome.children {
            let parent_id = match child.parent {
                ParentRef::Row(id) => id,
                ParentRef::Pending(index) => assigned[index],
            };
            let mut record = child.record;
            record.source_id = Some(parent_id);
            record.status_ts = Some(now);

            let existing = {
                let mut selector = tx.prepare_cached(sql::get_id_by_path())?;
                selector
                    .query_row((&record.path,), |row| row.get::<_, i64>(0))
                    .optional()?
            };
            match existing {
                // an in-place conversion yielded the parent's own path
                Some(id) if id == parent_id => assigned.push(id),
                Some(id) => {
                    record.id = id;
                    Self::update_tx(&tx, &record)?;
                    assigned.push(id);
                }
                None => {
                    assigned.push(Self::insert_tx(&tx, &record)?);
                }
            }
        }

        tx.commit()?;
        Ok(())
    }
}
