//! Attribute store contract and SQLite implementation.
//!
//! # Responsibility
//! - Define the boundary the persistence core uses to reach the metadata
//!   repository: acquire-or-create records, scalar fields, ordered
//!   association lists and unit-of-work boundaries.
//! - Provide `SqliteAttributeStore`, the bundled store over the workspace
//!   schema.
//!
//! # Invariants
//! - Writes are only accepted inside an open unit (`begin` .. `commit`).
//! - Records created under a temporary id stay pending until `commit`, which
//!   assigns permanent ids and reports them as an `IdMap`.
//! - `commit` only rewrites association targets written by the same unit.
//! - Repeated `acquire_record` calls for one id address the same record.

use crate::db::migrations::latest_version;
use crate::db::{DbError, STORE_TABLES};
use crate::repo::schema::{is_temporary_id, Association, RecordType};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Temporary -> permanent id substitutions produced by one commit.
pub type IdMap = BTreeMap<String, String>;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by attribute store implementations.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Permanent id does not resolve to a stored record.
    RecordNotFound(String),
    /// Record exists with another type than the caller expected.
    RecordTypeMismatch {
        id: String,
        expected: RecordType,
        actual: RecordType,
    },
    /// Write attempted outside `begin` .. `commit`.
    NoOpenUnit,
    /// `begin` called while a unit is already open.
    UnitAlreadyOpen,
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted into the store model.
    InvalidData(String),
    /// Failure reported by a non-SQLite store implementation.
    Backend(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::RecordNotFound(id) => write!(f, "record not found: {id}"),
            Self::RecordTypeMismatch {
                id,
                expected,
                actual,
            } => write!(
                f,
                "record {id} has type {}, expected {}",
                actual.as_str(),
                expected.as_str()
            ),
            Self::NoOpenUnit => write!(f, "store write requires an open unit of work"),
            Self::UnitAlreadyOpen => write!(f, "a unit of work is already open"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "attribute store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "attribute store requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid stored record data: {message}"),
            Self::Backend(message) => write!(f, "store backend failure: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Boundary contract to the metadata repository.
///
/// Reads never require an open unit; reading a record that does not exist
/// yields `None` / an empty association rather than an error.
pub trait AttributeStore {
    /// Opens one unit of work.
    fn begin(&mut self) -> StoreResult<()>;
    /// Makes the unit durable and returns the ids assigned to pending records.
    fn commit(&mut self) -> StoreResult<IdMap>;
    /// Discards every write of the open unit.
    fn rollback(&mut self) -> StoreResult<()>;
    /// Returns the record for `id`, creating it when `id` is temporary.
    fn acquire_record(&mut self, id: &str, record_type: RecordType) -> StoreResult<()>;
    /// Deletes the record and every association entry that targets it.
    fn delete_record(&mut self, id: &str, record_type: RecordType) -> StoreResult<()>;
    /// Loads the type of one record, if present.
    fn record_type(&self, id: &str) -> StoreResult<Option<RecordType>>;
    /// Loads one scalar field.
    fn field(&self, id: &str, name: &str) -> StoreResult<Option<String>>;
    /// Writes one scalar field.
    fn set_field(&mut self, id: &str, name: &str, value: &str) -> StoreResult<()>;
    /// Loads one ordered association list.
    fn association(&self, id: &str, association: Association) -> StoreResult<Vec<String>>;
    /// Replaces one ordered association list.
    fn set_association(
        &mut self,
        id: &str,
        association: Association,
        members: &[String],
    ) -> StoreResult<()>;
    /// Appends one member to an association list.
    fn add_to_association(
        &mut self,
        id: &str,
        association: Association,
        member: &str,
    ) -> StoreResult<()>;
    /// Removes every occurrence of `member` from an association list.
    fn remove_from_association(
        &mut self,
        id: &str,
        association: Association,
        member: &str,
    ) -> StoreResult<()>;

    /// Returns whether `member` is already linked through `association`.
    fn association_contains(
        &self,
        id: &str,
        association: Association,
        member: &str,
    ) -> StoreResult<bool> {
        Ok(self
            .association(id, association)?
            .iter()
            .any(|current| current == member))
    }
}

/// SQLite-backed attribute store.
pub struct SqliteAttributeStore<'conn> {
    conn: &'conn Connection,
    unit_open: bool,
}

impl<'conn> SqliteAttributeStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self {
            conn,
            unit_open: false,
        })
    }

    /// Returns whether a unit of work is currently open.
    pub fn is_unit_open(&self) -> bool {
        self.unit_open
    }

    /// Lists ids of every stored record of one type, in creation order.
    pub fn record_ids_of_type(&self, record_type: RecordType) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id
             FROM records
             WHERE record_type = ?1
             ORDER BY rowid ASC;",
        )?;
        let mut rows = stmt.query([record_type.as_str()])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    fn require_unit(&self) -> StoreResult<()> {
        if self.unit_open {
            Ok(())
        } else {
            Err(StoreError::NoOpenUnit)
        }
    }

    fn require_record(&self, id: &str) -> StoreResult<RecordType> {
        self.record_type(id)?
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))
    }

    fn touch(&self, id: &str) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE records
             SET updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id],
        )?;
        Ok(())
    }
}

impl Drop for SqliteAttributeStore<'_> {
    fn drop(&mut self) {
        if self.unit_open {
            warn!("event=store_drop module=repo status=degraded reason=unit_left_open");
            let _ = self.conn.execute_batch("ROLLBACK;");
        }
    }
}

impl AttributeStore for SqliteAttributeStore<'_> {
    fn begin(&mut self) -> StoreResult<()> {
        if self.unit_open {
            return Err(StoreError::UnitAlreadyOpen);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.unit_open = true;
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<IdMap> {
        self.require_unit()?;

        let pending = {
            let mut stmt = self.conn.prepare(
                "SELECT id
                 FROM records
                 WHERE is_pending = 1
                 ORDER BY rowid ASC;",
            )?;
            let mut rows = stmt.query([])?;
            let mut ids: Vec<String> = Vec::new();
            while let Some(row) = rows.next()? {
                ids.push(row.get(0)?);
            }
            ids
        };

        let mut id_map = IdMap::new();
        for temporary_id in pending {
            let permanent_id = Uuid::new_v4().to_string();
            self.conn.execute(
                "UPDATE records
                 SET id = ?2,
                     is_pending = 0,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE id = ?1;",
                params![temporary_id, permanent_id],
            )?;
            // Rows from earlier units may hold a reused temporary id for another object.
            self.conn.execute(
                "UPDATE record_associations
                 SET target_id = ?2
                 WHERE target_id = ?1
                   AND in_open_unit = 1;",
                params![temporary_id, permanent_id],
            )?;
            id_map.insert(temporary_id, permanent_id);
        }
        self.conn.execute(
            "UPDATE record_associations
             SET in_open_unit = 0
             WHERE in_open_unit = 1;",
            [],
        )?;

        self.conn.execute_batch("COMMIT;")?;
        self.unit_open = false;
        info!(
            "event=store_commit module=repo status=ok remapped={}",
            id_map.len()
        );
        Ok(id_map)
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.require_unit()?;
        self.unit_open = false;
        self.conn.execute_batch("ROLLBACK;")?;
        info!("event=store_rollback module=repo status=ok");
        Ok(())
    }

    fn acquire_record(&mut self, id: &str, record_type: RecordType) -> StoreResult<()> {
        self.require_unit()?;
        match self.record_type(id)? {
            Some(actual) if actual == record_type => Ok(()),
            Some(actual) => Err(StoreError::RecordTypeMismatch {
                id: id.to_string(),
                expected: record_type,
                actual,
            }),
            None if is_temporary_id(id) => {
                self.conn.execute(
                    "INSERT INTO records (id, record_type, is_pending)
                     VALUES (?1, ?2, 1);",
                    params![id, record_type.as_str()],
                )?;
                debug!(
                    "event=record_create module=repo status=ok record_type={}",
                    record_type.as_str()
                );
                Ok(())
            }
            None => Err(StoreError::RecordNotFound(id.to_string())),
        }
    }

    fn delete_record(&mut self, id: &str, record_type: RecordType) -> StoreResult<()> {
        self.require_unit()?;
        match self.record_type(id)? {
            None => {
                debug!("event=record_delete module=repo status=skip reason=absent");
                return Ok(());
            }
            Some(actual) if actual != record_type => {
                return Err(StoreError::RecordTypeMismatch {
                    id: id.to_string(),
                    expected: record_type,
                    actual,
                });
            }
            Some(_) => {}
        }

        self.conn.execute(
            "DELETE FROM record_associations WHERE target_id = ?1;",
            [id],
        )?;
        self.conn.execute("DELETE FROM records WHERE id = ?1;", [id])?;
        Ok(())
    }

    fn record_type(&self, id: &str) -> StoreResult<Option<RecordType>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT record_type FROM records WHERE id = ?1;",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        match value {
            None => Ok(None),
            Some(text) => RecordType::parse(&text).map(Some).ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "invalid record type `{text}` in records.record_type"
                ))
            }),
        }
    }

    fn field(&self, id: &str, name: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value
                 FROM record_fields
                 WHERE record_id = ?1
                   AND name = ?2;",
                params![id, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_field(&mut self, id: &str, name: &str, value: &str) -> StoreResult<()> {
        self.require_unit()?;
        self.require_record(id)?;
        self.conn.execute(
            "INSERT INTO record_fields (record_id, name, value)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (record_id, name) DO UPDATE SET value = excluded.value;",
            params![id, name, value],
        )?;
        self.touch(id)
    }

    fn association(&self, id: &str, association: Association) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id
             FROM record_associations
             WHERE record_id = ?1
               AND name = ?2
             ORDER BY position ASC;",
        )?;
        let mut rows = stmt.query(params![id, association.as_str()])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            members.push(row.get(0)?);
        }
        Ok(members)
    }

    fn set_association(
        &mut self,
        id: &str,
        association: Association,
        members: &[String],
    ) -> StoreResult<()> {
        self.require_unit()?;
        self.require_record(id)?;
        self.conn.execute(
            "DELETE FROM record_associations
             WHERE record_id = ?1
               AND name = ?2;",
            params![id, association.as_str()],
        )?;
        for (position, member) in members.iter().enumerate() {
            self.conn.execute(
                "INSERT INTO record_associations (record_id, name, position, target_id, in_open_unit)
                 VALUES (?1, ?2, ?3, ?4, 1);",
                params![id, association.as_str(), position as i64, member],
            )?;
        }
        self.touch(id)
    }

    fn add_to_association(
        &mut self,
        id: &str,
        association: Association,
        member: &str,
    ) -> StoreResult<()> {
        self.require_unit()?;
        self.require_record(id)?;
        self.conn.execute(
            "INSERT INTO record_associations (record_id, name, position, target_id, in_open_unit)
             SELECT ?1, ?2, COALESCE(MAX(position), -1) + 1, ?3, 1
             FROM record_associations
             WHERE record_id = ?1
               AND name = ?2;",
            params![id, association.as_str(), member],
        )?;
        self.touch(id)
    }

    fn remove_from_association(
        &mut self,
        id: &str,
        association: Association,
        member: &str,
    ) -> StoreResult<()> {
        self.require_unit()?;
        self.require_record(id)?;
        self.conn.execute(
            "DELETE FROM record_associations
             WHERE record_id = ?1
               AND name = ?2
               AND target_id = ?3;",
            params![id, association.as_str(), member],
        )?;
        self.touch(id)
    }
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in STORE_TABLES {
        if !table_exists(conn, table)? {
            return Err(StoreError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
