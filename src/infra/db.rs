//! SQLite connection, applied-state bookkeeping and schema introspection.

use crate::domain::{
    AppliedState, ColumnShape, ColumnType, Direction, ForeignRef, RevisionId, SchemaShape, Script,
    TableShape,
};
use crate::error::AppError;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Single-row table holding the applied-state marker.
pub const STATE_TABLE: &str = "migration_state";
/// Append-only record of every step run against this database.
pub const LOG_TABLE: &str = "migration_log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    Memory,
}

impl DbLocation {
    pub fn parse(s: &str) -> Self {
        if s == ":memory:" {
            Self::Memory
        } else {
            Self::File(PathBuf::from(s))
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(p) => Some(p),
            Self::Memory => None,
        }
    }
}

/// The target database. Owns its single connection.
pub struct Db {
    pub conn: Connection,
    location: DbLocation,
}

impl Db {
    pub fn location(&self) -> &DbLocation {
        &self.location
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub revision: Option<String>,
    pub direction: String,
    pub applied_at: String,
}

/// Open the target database and make sure the bookkeeping tables exist.
pub fn open_db(location: &DbLocation, busy_timeout: Duration) -> Result<Db, AppError> {
    let conn = match location {
        DbLocation::File(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Connection::open(path)?
        }
        DbLocation::Memory => Connection::open_in_memory()?,
    };
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    ensure_state_tables(&conn)?;
    log::debug!("Opened database {:?}", location);
    Ok(Db {
        conn,
        location: location.clone(),
    })
}

pub fn open_in_memory() -> Result<Db, AppError> {
    open_db(&DbLocation::Memory, Duration::from_secs(5))
}

fn ensure_state_tables(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {STATE_TABLE} (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            revision TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS {LOG_TABLE} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            revision TEXT,
            direction TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );"
    ))?;
    Ok(())
}

pub fn read_marker(conn: &Connection) -> Result<AppliedState, AppError> {
    let revision: Option<String> = conn
        .query_row(
            &format!("SELECT revision FROM {STATE_TABLE} WHERE id = 1"),
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match revision {
        Some(id) => AppliedState::At(RevisionId::new(id)),
        None => AppliedState::Unversioned,
    })
}

fn write_marker(conn: &Connection, state: &AppliedState, now: &str) -> rusqlite::Result<()> {
    match state {
        AppliedState::Unversioned => {
            conn.execute(&format!("DELETE FROM {STATE_TABLE}"), [])?;
        }
        AppliedState::At(id) => {
            conn.execute(
                &format!(
                    "INSERT INTO {STATE_TABLE} (id, revision, updated_at) VALUES (1, ?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET revision = excluded.revision, updated_at = excluded.updated_at"
                ),
                params![id.as_str(), now],
            )?;
        }
    }
    Ok(())
}

// `revision` is NULL for a stamp back to the unversioned state.
fn append_log(
    conn: &Connection,
    revision: Option<&RevisionId>,
    direction: Direction,
    now: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        &format!("INSERT INTO {LOG_TABLE} (revision, direction, applied_at) VALUES (?1, ?2, ?3)"),
        params![revision.map(RevisionId::as_str), direction.as_str(), now],
    )?;
    Ok(())
}

pub fn read_log(conn: &Connection) -> Result<Vec<LogEntry>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT revision, direction, applied_at FROM {LOG_TABLE} ORDER BY id"
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok(LogEntry {
            revision: row.get(0)?,
            direction: row.get(1)?,
            applied_at: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Run each statement of a script in order.
pub fn run_script(conn: &Connection, script: &Script) -> rusqlite::Result<()> {
    for stmt in script.statements() {
        conn.execute_batch(stmt)?;
    }
    Ok(())
}

/// Run one step and record its new applied state in the same transaction,
/// so a failed step leaves both the schema and the marker untouched.
pub fn apply_step(
    conn: &mut Connection,
    revision: Option<&RevisionId>,
    script: Option<&Script>,
    direction: Direction,
    new_state: &AppliedState,
) -> rusqlite::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    if let Some(script) = script {
        run_script(&tx, script)?;
    }
    write_marker(&tx, new_state, &now)?;
    append_log(&tx, revision, direction, &now)?;
    tx.commit()
}

/// Read the live schema, leaving out SQLite internals and bookkeeping tables.
pub fn read_schema(conn: &Connection) -> Result<SchemaShape, AppError> {
    let tables: Vec<String> = conn
        .prepare(&format!(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
               AND name NOT IN ('{STATE_TABLE}', '{LOG_TABLE}')
             ORDER BY name"
        ))?
        .query_map([], |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut shape = SchemaShape::default();
    for table_name in tables {
        let mut fks = std::collections::HashMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1)")?;
            let rows = stmt.query_map([&table_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })?;
            for row in rows {
                let (from, table, to) = row?;
                fks.insert(
                    from,
                    ForeignRef {
                        table,
                        column: to.unwrap_or_default(),
                    },
                );
            }
        }

        let mut table = TableShape::default();
        let mut stmt =
            conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1)")?;
        let rows = stmt.query_map([&table_name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        for row in rows {
            let (name, declared, notnull, pk) = row?;
            let primary_key = pk != 0;
            let column = ColumnShape {
                typ: ColumnType::from_declared(&declared),
                nullable: notnull == 0 && !primary_key,
                primary_key,
                references: fks.remove(&name),
            };
            table.columns.insert(name, column);
        }
        shape.tables.insert(table_name, table);
    }
    Ok(shape)
}
