//! Upgrade integration tests (in-memory SQLite)

use migrate_lib::app::{SchemaVersionManager, StepOptions};
use migrate_lib::domain::{
    AppliedState, ColumnShape, ColumnType, History, Revision, SchemaDiff, SchemaShape, Script,
    TableShape,
};
use migrate_lib::error::AppError;
use migrate_lib::infra::db::{read_log, read_schema};
use migrate_lib::infra::{open_db, open_in_memory, DbLocation};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

// ──────────────────────── Helper ────────────────────────

fn chain(steps: &[(&str, &str)]) -> Vec<Revision> {
    let mut out: Vec<Revision> = Vec::new();
    for (i, (up, down)) in steps.iter().enumerate() {
        let parent = out.last().map(|r| r.id.clone());
        out.push(Revision::with_timestamp(
            parent,
            &format!("r{}", i),
            "2026-01-01T00:00:00+00:00",
            Script::from(vec![*up]),
            Script::from(vec![*down]),
        ));
    }
    out
}

/// root -> R1 -> R2
fn shop_chain() -> Vec<Revision> {
    chain(&[
        (
            "CREATE TABLE shop (id TEXT PRIMARY KEY, name TEXT NOT NULL)",
            "DROP TABLE shop",
        ),
        (
            "CREATE TABLE product (id TEXT PRIMARY KEY, shop_id TEXT REFERENCES shop(id))",
            "DROP TABLE product",
        ),
        (
            "ALTER TABLE shop ADD COLUMN note TEXT",
            "ALTER TABLE shop DROP COLUMN note",
        ),
    ])
}

fn manager(revs: Vec<Revision>) -> SchemaVersionManager {
    SchemaVersionManager::new(
        open_in_memory().unwrap(),
        History::from_revisions(revs).unwrap(),
    )
}

fn at(rev: &Revision) -> AppliedState {
    AppliedState::At(rev.id.clone())
}

// ──────────────────────── Scenarios ────────────────────────

#[test]
fn init_on_empty_history() {
    let mut m = manager(Vec::new());
    assert_eq!(m.current_revision().unwrap(), AppliedState::Unversioned);

    let model = SchemaShape::default().with_table(
        "shop",
        TableShape::default()
            .with_column("id", ColumnShape::new(ColumnType::Text).primary_key())
            .with_column("name", ColumnShape::new(ColumnType::Text)),
    );
    let diff = SchemaDiff::between(&SchemaShape::default(), &model).unwrap();
    let r1 = m.generate_revision("init", &diff).unwrap();
    assert!(r1.parent.is_none());
    // authoring does not touch the database
    assert_eq!(m.current_revision().unwrap(), AppliedState::Unversioned);

    let report = m.upgrade("head").unwrap();
    assert_eq!(report.from, AppliedState::Unversioned);
    assert_eq!(report.to, at(&r1));
    assert_eq!(m.current_revision().unwrap(), at(&r1));
    assert!(read_schema(&m.db().conn).unwrap().tables.contains_key("shop"));
}

#[test]
fn upgrade_head_is_idempotent() {
    let revs = shop_chain();
    let mut m = manager(revs.clone());

    let first = m.upgrade("head").unwrap();
    assert_eq!(first.applied.len(), 3);
    assert_eq!(m.current_revision().unwrap(), at(&revs[2]));

    let second = m.upgrade("head").unwrap();
    assert!(second.applied.is_empty());
    assert_eq!(second.from, second.to);
    assert_eq!(m.current_revision().unwrap(), at(&revs[2]));
    assert_eq!(read_log(&m.db().conn).unwrap().len(), 3);
}

#[test]
fn upgrade_to_current_is_noop() {
    let revs = shop_chain();
    let mut m = manager(revs.clone());
    m.upgrade(revs[1].id.as_str()).unwrap();
    let report = m.upgrade(revs[1].id.as_str()).unwrap();
    assert!(report.applied.is_empty());
}

#[test]
fn unknown_target_leaves_state_unchanged() {
    let revs = shop_chain();
    let mut m = manager(revs.clone());

    let err = m.upgrade("R99").unwrap_err();
    assert!(matches!(err, AppError::UnknownRevision(ref id) if id == "R99"));
    assert_eq!(m.current_revision().unwrap(), AppliedState::Unversioned);

    m.upgrade(revs[0].id.as_str()).unwrap();
    let err = m.upgrade("deadbeef0000").unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_REVISION");
    assert_eq!(m.current_revision().unwrap(), at(&revs[0]));
}

#[test]
fn injected_failure_stops_at_last_good_step() {
    let revs = chain(&[
        ("CREATE TABLE shop (id TEXT PRIMARY KEY)", "DROP TABLE shop"),
        ("CREATE TABLE product (id TEXT PRIMARY KEY)", "DROP TABLE product"),
        ("INSERT INTO missing_table VALUES (1)", "DROP TABLE IF EXISTS missing_table"),
    ]);
    let mut m = manager(revs.clone());
    m.upgrade(revs[0].id.as_str()).unwrap();

    let err = m.upgrade("head").unwrap_err();
    match &err {
        AppError::Migration {
            revision,
            direction,
            cause,
        } => {
            assert_eq!(revision, revs[2].id.as_str());
            assert_eq!(*direction, "upgrade");
            assert!(cause.contains("missing_table"));
        }
        other => panic!("expected MigrationError, got {:?}", other),
    }
    assert_eq!(err.revision(), Some(revs[2].id.as_str()));
    assert_eq!(m.current_revision().unwrap(), at(&revs[1]));

    let schema = read_schema(&m.db().conn).unwrap();
    assert!(schema.tables.contains_key("product"));
}

#[test]
fn upgrade_resumes_from_applied_state() {
    let revs = shop_chain();
    let mut m = manager(revs.clone());
    m.upgrade(revs[0].id.as_str()).unwrap();

    let report = m.upgrade("head").unwrap();
    assert_eq!(report.applied, vec![revs[1].id.clone(), revs[2].id.clone()]);
}

#[test]
fn upgrade_to_ancestor_is_rejected() {
    let revs = shop_chain();
    let mut m = manager(revs.clone());
    m.upgrade("head").unwrap();

    let err = m.upgrade(revs[0].id.as_str()).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(m.current_revision().unwrap(), at(&revs[2]));

    assert!(m.upgrade("base").is_err());
}

#[test]
fn upgrade_accepts_unique_prefix() {
    let revs = shop_chain();
    let mut m = manager(revs.clone());
    let prefix = &revs[1].id.as_str()[..6];
    m.upgrade(prefix).unwrap();
    assert_eq!(m.current_revision().unwrap(), at(&revs[1]));
}

#[test]
fn empty_history_upgrade_is_noop() {
    let mut m = manager(Vec::new());
    let report = m.upgrade("head").unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.to, AppliedState::Unversioned);
}

#[test]
fn marker_outside_history_is_unknown_revision() {
    let dir = tempfile::tempdir().unwrap();
    let location = DbLocation::File(dir.path().join("app.db"));
    let revs = shop_chain();

    {
        let db = open_db(&location, Duration::from_secs(1)).unwrap();
        let mut m = SchemaVersionManager::new(db, History::from_revisions(revs.clone()).unwrap());
        m.upgrade("head").unwrap();
    }

    let db = open_db(&location, Duration::from_secs(1)).unwrap();
    let shorter = History::from_revisions(revs[..1].to_vec()).unwrap();
    let mut m = SchemaVersionManager::new(db, shorter);
    let err = m.upgrade("head").unwrap_err();
    assert!(matches!(err, AppError::UnknownRevision(ref id) if id == revs[2].id.as_str()));
}

#[test]
fn applied_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let location = DbLocation::File(dir.path().join("app.db"));
    let revs = shop_chain();

    {
        let db = open_db(&location, Duration::from_secs(1)).unwrap();
        let mut m = SchemaVersionManager::new(db, History::from_revisions(revs.clone()).unwrap());
        m.upgrade(revs[1].id.as_str()).unwrap();
    }

    let db = open_db(&location, Duration::from_secs(1)).unwrap();
    let m = SchemaVersionManager::new(db, History::from_revisions(revs.clone()).unwrap());
    assert_eq!(m.current_revision().unwrap(), at(&revs[1]));
}

// ──────────────────────── Stamp ────────────────────────

#[test]
fn stamp_moves_marker_without_running_scripts() {
    let revs = shop_chain();
    let mut m = manager(revs.clone());

    assert_eq!(m.stamp("head").unwrap(), at(&revs[2]));
    assert!(read_schema(&m.db().conn).unwrap().tables.is_empty());

    assert_eq!(m.stamp("base").unwrap(), AppliedState::Unversioned);
    assert_eq!(m.current_revision().unwrap(), AppliedState::Unversioned);

    let log = read_log(&m.db().conn).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].revision.as_deref(), Some(revs[2].id.as_str()));
    // back to unversioned names no revision
    assert_eq!(log[1].revision, None);
    assert_eq!(log[1].direction, "stamp");
}

// ──────────────────────── Abort / timeout ────────────────────────

#[test]
fn abort_flag_prevents_next_step() {
    let revs = shop_chain();
    let abort = Arc::new(AtomicBool::new(true));
    let mut m = manager(revs).with_options(StepOptions {
        timeout: None,
        abort: Some(abort),
    });

    let err = m.upgrade("head").unwrap_err();
    assert!(matches!(err, AppError::Aborted { ref at } if at == "unversioned"));
    assert!(err.is_retryable());
    assert_eq!(m.current_revision().unwrap(), AppliedState::Unversioned);
}

#[test]
fn step_timeout_is_migration_error() {
    let revs = chain(&[
        ("CREATE TABLE shop (id TEXT PRIMARY KEY)", "DROP TABLE shop"),
        (
            "CREATE TABLE spin AS WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) AS n FROM c",
            "DROP TABLE spin",
        ),
    ]);
    let mut m = manager(revs.clone()).with_options(StepOptions {
        timeout: Some(Duration::from_millis(200)),
        abort: None,
    });

    let err = m.upgrade("head").unwrap_err();
    match &err {
        AppError::Migration { revision, cause, .. } => {
            assert_eq!(revision, revs[1].id.as_str());
            assert!(cause.contains("timeout"), "cause was {}", cause);
        }
        other => panic!("expected MigrationError, got {:?}", other),
    }
    assert_eq!(m.current_revision().unwrap(), at(&revs[0]));
    assert!(!read_schema(&m.db().conn).unwrap().tables.contains_key("spin"));
}
