//! Desired/observed schema shapes and the structural diff between them.
//!
//! Shapes are compared by name only, column order does not matter. A diff
//! renders to SQLite DDL in both directions so that every generated revision
//! carries its own inverse.

use crate::domain::revision::Script;
use crate::error::AppError;
use sea_query::{Alias, ColumnDef, ForeignKey, SqliteQueryBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
    Numeric,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
            Self::Numeric => "NUMERIC",
        }
    }

    /// Map a declared column type to its SQLite affinity.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Self::Text
        } else if upper.is_empty() || upper.contains("BLOB") {
            Self::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Real
        } else {
            Self::Numeric
        }
    }

    fn sea_type(&self) -> sea_query::ColumnType {
        sea_query::ColumnType::custom(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignRef {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnShape {
    #[serde(rename = "type")]
    pub typ: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<ForeignRef>,
}

impl ColumnShape {
    pub fn new(typ: ColumnType) -> Self {
        Self {
            typ,
            nullable: false,
            primary_key: false,
            references: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn references(mut self, table: &str, column: &str) -> Self {
        self.references = Some(ForeignRef {
            table: table.to_string(),
            column: column.to_string(),
        });
        self
    }

    // primary keys are never reported nullable by introspection
    fn normalized(mut self) -> Self {
        if self.primary_key {
            self.nullable = false;
        }
        self
    }

    fn column_def(&self, name: &str) -> ColumnDef {
        let mut def = ColumnDef::new_with_type(Alias::new(name.to_string()), self.typ.sea_type());
        if self.primary_key {
            def.primary_key();
        } else if self.nullable {
            def.null();
        } else {
            def.not_null();
        }
        def
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableShape {
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnShape>,
}

impl TableShape {
    pub fn with_column(mut self, name: &str, column: ColumnShape) -> Self {
        self.columns.insert(name.to_string(), column);
        self
    }

    fn normalized(self) -> Self {
        Self {
            columns: self
                .columns
                .into_iter()
                .map(|(name, col)| (name, col.normalized()))
                .collect(),
        }
    }

    fn validate(&self, name: &str) -> Result<(), AppError> {
        if self.columns.is_empty() {
            return Err(AppError::Validation(format!("Table {} has no columns", name)));
        }
        let pks = self.columns.values().filter(|c| c.primary_key).count();
        if pks > 1 {
            return Err(AppError::Validation(format!(
                "Table {} declares {} primary key columns, composite keys are not supported",
                name, pks
            )));
        }
        Ok(())
    }

    fn create_sql(&self, name: &str) -> String {
        let mut create = sea_query::Table::create();
        create.table(Alias::new(name.to_string()));
        for (col_name, col) in &self.columns {
            let mut def = col.column_def(col_name);
            create.col(&mut def);
            if let Some(fk) = &col.references {
                create.foreign_key(
                    ForeignKey::create()
                        .to(Alias::new(fk.table.clone()), Alias::new(fk.column.clone()))
                        .from_col(Alias::new(col_name.clone())),
                );
            }
        }
        create.to_string(SqliteQueryBuilder)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaShape {
    #[serde(default)]
    pub tables: BTreeMap<String, TableShape>,
}

impl SchemaShape {
    pub fn with_table(mut self, name: &str, table: TableShape) -> Self {
        self.tables.insert(name.to_string(), table);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let shape: Self = serde_json::from_str(json)?;
        for (name, table) in &shape.tables {
            table.validate(name)?;
        }
        Ok(shape)
    }

    pub fn normalized(self) -> Self {
        Self {
            tables: self
                .tables
                .into_iter()
                .map(|(name, table)| (name, table.normalized()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    CreateTable { name: String, table: TableShape },
    DropTable { name: String, table: TableShape },
    AddColumn { table: String, name: String, column: ColumnShape },
    DropColumn { table: String, name: String, column: ColumnShape },
}

impl Change {
    pub fn inverse(&self) -> Change {
        match self.clone() {
            Self::CreateTable { name, table } => Self::DropTable { name, table },
            Self::DropTable { name, table } => Self::CreateTable { name, table },
            Self::AddColumn { table, name, column } => Self::DropColumn { table, name, column },
            Self::DropColumn { table, name, column } => Self::AddColumn { table, name, column },
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Self::CreateTable { name, table } => table.create_sql(name),
            Self::DropTable { name, .. } => sea_query::Table::drop()
                .table(Alias::new(name.clone()))
                .take()
                .to_string(SqliteQueryBuilder),
            Self::AddColumn { table, name, column } => {
                let mut def = column.column_def(name);
                sea_query::Table::alter()
                    .table(Alias::new(table.clone()))
                    .add_column(&mut def)
                    .take()
                    .to_string(SqliteQueryBuilder)
            }
            Self::DropColumn { table, name, .. } => sea_query::Table::alter()
                .table(Alias::new(table.clone()))
                .drop_column(Alias::new(name.clone()))
                .take()
                .to_string(SqliteQueryBuilder),
        }
    }

    // creations first, removals last
    fn rank(&self) -> u8 {
        match self {
            Self::CreateTable { .. } => 0,
            Self::AddColumn { .. } => 1,
            Self::DropColumn { .. } => 2,
            Self::DropTable { .. } => 3,
        }
    }
}

enum EntryDiff<A> {
    CurrentOnly(A),
    DesiredOnly(A),
    Both { current: A, desired: A },
}

fn diff_map<A>(
    current: BTreeMap<String, A>,
    mut desired: BTreeMap<String, A>,
) -> BTreeMap<String, EntryDiff<A>> {
    let mut out = BTreeMap::new();
    for (key, current) in current {
        match desired.remove(&key) {
            Some(desired) => {
                out.insert(key, EntryDiff::Both { current, desired });
            }
            None => {
                out.insert(key, EntryDiff::CurrentOnly(current));
            }
        }
    }
    for (key, desired) in desired {
        out.insert(key, EntryDiff::DesiredOnly(desired));
    }
    out
}

/// Ordered changes taking one shape to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    changes: Vec<Change>,
}

impl SchemaDiff {
    pub fn new(changes: Vec<Change>) -> Self {
        Self { changes }
    }

    /// Changes needed to turn `current` into `desired`.
    ///
    /// Anything SQLite cannot express with a plain `ALTER TABLE` (and undo
    /// again) is rejected so that the revision can be written by hand.
    pub fn between(current: &SchemaShape, desired: &SchemaShape) -> Result<Self, AppError> {
        let current = current.clone().normalized();
        let desired = desired.clone().normalized();
        let mut created = BTreeMap::new();
        let mut dropped = BTreeMap::new();
        let mut changes = Vec::new();

        for (name, diff) in diff_map(current.tables, desired.tables) {
            match diff {
                EntryDiff::CurrentOnly(table) => {
                    dropped.insert(name, table);
                }
                EntryDiff::DesiredOnly(table) => {
                    table.validate(&name)?;
                    created.insert(name, table);
                }
                EntryDiff::Both { current, desired } => {
                    for (col, diff) in diff_map(current.columns, desired.columns) {
                        match diff {
                            EntryDiff::DesiredOnly(column) => {
                                check_alterable(&name, &col, &column, "add")?;
                                changes.push(Change::AddColumn {
                                    table: name.clone(),
                                    name: col,
                                    column,
                                });
                            }
                            EntryDiff::CurrentOnly(column) => {
                                check_alterable(&name, &col, &column, "drop")?;
                                changes.push(Change::DropColumn {
                                    table: name.clone(),
                                    name: col,
                                    column,
                                });
                            }
                            EntryDiff::Both { current, desired } => {
                                if current != desired {
                                    return Err(AppError::Validation(format!(
                                        "Column {}.{} changed from {:?} to {:?}; write this revision by hand",
                                        name, col, current, desired
                                    )));
                                }
                            }
                        }
                    }
                }
            }
        }

        // referenced tables are created first and dropped last
        changes.sort_by_key(Change::rank);
        let mut ordered: Vec<Change> = dependency_order(created)
            .into_iter()
            .map(|(name, table)| Change::CreateTable { name, table })
            .collect();
        ordered.extend(changes);
        ordered.extend(
            dependency_order(dropped)
                .into_iter()
                .rev()
                .map(|(name, table)| Change::DropTable { name, table }),
        );
        Ok(Self { changes: ordered })
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn forward(&self) -> Script {
        Script::new(self.changes.iter().map(Change::to_sql).collect())
    }

    pub fn backward(&self) -> Script {
        Script::new(
            self.changes
                .iter()
                .rev()
                .map(|c| c.inverse().to_sql())
                .collect(),
        )
    }

    /// One line per change, for operator output.
    pub fn summary(&self) -> Vec<String> {
        self.changes
            .iter()
            .map(|c| match c {
                Change::CreateTable { name, .. } => format!("+ table {}", name),
                Change::DropTable { name, .. } => format!("- table {}", name),
                Change::AddColumn { table, name, .. } => format!("+ column {}.{}", table, name),
                Change::DropColumn { table, name, .. } => format!("- column {}.{}", table, name),
            })
            .collect()
    }
}

/// Order tables so each one comes after the tables it references. References
/// to tables outside the set, self references and cycles fall back to name
/// order.
fn dependency_order(mut tables: BTreeMap<String, TableShape>) -> Vec<(String, TableShape)> {
    let mut ordered = Vec::with_capacity(tables.len());
    loop {
        let ready = tables
            .iter()
            .find(|(name, table)| {
                table
                    .columns
                    .values()
                    .filter_map(|c| c.references.as_ref())
                    .all(|fk| &fk.table == *name || !tables.contains_key(&fk.table))
            })
            .map(|(name, _)| name.clone());
        let Some(name) = ready.or_else(|| tables.keys().next().cloned()) else {
            break;
        };
        if let Some(table) = tables.remove(&name) {
            ordered.push((name, table));
        }
    }
    ordered
}

// A column can only be added or dropped when the inverse is also possible:
// SQLite refuses NOT NULL additions without a default, and drops of key or
// foreign-key columns.
fn check_alterable(table: &str, name: &str, column: &ColumnShape, verb: &str) -> Result<(), AppError> {
    let reason = if column.primary_key {
        Some("it is a primary key")
    } else if column.references.is_some() {
        Some("it is a foreign key")
    } else if !column.nullable {
        Some("it is NOT NULL")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(AppError::Validation(format!(
            "Cannot {} column {}.{} because {}; write this revision by hand",
            verb, table, name, reason
        ))),
        None => Ok(()),
    }
}
