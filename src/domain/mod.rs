//! Revision model, history chain and schema shapes.

pub mod history;
pub mod revision;
pub mod schema;

pub use history::{History, Target};
pub use revision::{AppliedState, Direction, Revision, RevisionId, Script, UNVERSIONED};
pub use schema::{Change, ColumnShape, ColumnType, ForeignRef, SchemaDiff, SchemaShape, TableShape};
