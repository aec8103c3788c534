//! Application use cases.

mod manager;

pub use manager::{
    CheckReport, HistoryEntry, MigrationReport, RoundTripFailure, SchemaVersionManager,
    StepOptions,
};
