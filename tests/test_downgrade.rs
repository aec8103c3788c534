//! Downgrade integration tests (in-memory SQLite)

use migrate_lib::app::SchemaVersionManager;
use migrate_lib::domain::{AppliedState, History, Revision, Script};
use migrate_lib::error::AppError;
use migrate_lib::infra::db::{read_log, read_schema};
use migrate_lib::infra::open_in_memory;
use pretty_assertions::assert_eq;

// ──────────────────────── Helper ────────────────────────

/// root -> R1 -> R2
fn shop_chain() -> Vec<Revision> {
    let steps = [
        (
            "CREATE TABLE shop (id TEXT PRIMARY KEY, name TEXT NOT NULL)",
            "DROP TABLE shop",
        ),
        (
            "CREATE TABLE product (id TEXT PRIMARY KEY, shop_id TEXT REFERENCES shop(id), price REAL)",
            "DROP TABLE product",
        ),
        (
            "ALTER TABLE shop ADD COLUMN note TEXT",
            "ALTER TABLE shop DROP COLUMN note",
        ),
    ];
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

fn at_head() -> (SchemaVersionManager, Vec<Revision>) {
    let revs = shop_chain();
    let mut m = SchemaVersionManager::new(
        open_in_memory().unwrap(),
        History::from_revisions(revs.clone()).unwrap(),
    );
    m.upgrade("head").unwrap();
    (m, revs)
}

fn at(rev: &Revision) -> AppliedState {
    AppliedState::At(rev.id.clone())
}

// ──────────────────────── Scenarios ────────────────────────

#[test]
fn downgrade_two_reaches_root_newest_first() {
    let (mut m, revs) = at_head();

    let report = m.downgrade(2).unwrap();
    assert_eq!(report.to, at(&revs[0]));
    assert_eq!(report.applied, vec![revs[2].id.clone(), revs[1].id.clone()]);
    assert_eq!(m.current_revision().unwrap(), at(&revs[0]));

    let log = read_log(&m.db().conn).unwrap();
    let downgrades: Vec<_> = log
        .iter()
        .filter(|e| e.direction == "downgrade")
        .map(|e| e.revision.clone().unwrap())
        .collect();
    assert_eq!(
        downgrades,
        vec![revs[2].id.to_string(), revs[1].id.to_string()]
    );

    let schema = read_schema(&m.db().conn).unwrap();
    assert!(!schema.tables.contains_key("product"));
    assert!(!schema.tables["shop"].columns.contains_key("note"));
}

#[test]
fn downgrade_one_step_reaches_parent() {
    let (mut m, revs) = at_head();
    let report = m.downgrade(1).unwrap();
    assert_eq!(report.applied, vec![revs[2].id.clone()]);
    assert_eq!(m.current_revision().unwrap(), at(&revs[1]));
}

#[test]
fn downgrade_zero_is_noop() {
    let (mut m, revs) = at_head();
    let report = m.downgrade(0).unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(m.current_revision().unwrap(), at(&revs[2]));
}

#[test]
fn downgrade_past_root_fails_without_clamping() {
    let (mut m, revs) = at_head();

    let err = m.downgrade(3).unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientHistory {
            requested: 3,
            available: 2
        }
    ));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(m.current_revision().unwrap(), at(&revs[2]));
}

#[test]
fn downgrade_from_unversioned_fails() {
    let mut m = SchemaVersionManager::new(
        open_in_memory().unwrap(),
        History::from_revisions(shop_chain()).unwrap(),
    );
    let err = m.downgrade(1).unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientHistory {
            requested: 1,
            available: 0
        }
    ));
}

#[test]
fn downgrade_then_upgrade_restores() {
    for k in 0..=2 {
        let (mut m, revs) = at_head();
        let original = m.current_revision().unwrap();
        let before = read_schema(&m.db().conn).unwrap();

        m.downgrade(k).unwrap();
        m.upgrade(revs[2].id.as_str()).unwrap();

        assert_eq!(m.current_revision().unwrap(), original, "k = {}", k);
        assert_eq!(read_schema(&m.db().conn).unwrap(), before, "k = {}", k);
    }
}

#[test]
fn downgrade_to_base_clears_marker() {
    let (mut m, _) = at_head();
    let report = m.downgrade_to("base").unwrap();
    assert_eq!(report.applied.len(), 3);
    assert_eq!(m.current_revision().unwrap(), AppliedState::Unversioned);
    assert!(read_schema(&m.db().conn).unwrap().tables.is_empty());
}

#[test]
fn downgrade_to_revision() {
    let (mut m, revs) = at_head();
    m.downgrade_to(revs[1].id.as_str()).unwrap();
    assert_eq!(m.current_revision().unwrap(), at(&revs[1]));
}

#[test]
fn downgrade_to_ahead_is_rejected() {
    let (mut m, revs) = at_head();
    m.downgrade(2).unwrap();
    let err = m.downgrade_to(revs[2].id.as_str()).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert_eq!(m.current_revision().unwrap(), at(&revs[0]));
}

#[test]
fn failing_downgrade_keeps_state() {
    let revs = {
        let root = Revision::with_timestamp(
            None,
            "root",
            "2026-01-01T00:00:00+00:00",
            Script::from(vec!["CREATE TABLE shop (id TEXT PRIMARY KEY)"]),
            Script::from(vec!["DROP TABLE shop"]),
        );
        let broken = Revision::with_timestamp(
            Some(root.id.clone()),
            "broken downgrade",
            "2026-01-01T00:00:00+00:00",
            Script::from(vec!["CREATE TABLE product (id TEXT PRIMARY KEY)"]),
            Script::from(vec!["DROP TABLE no_such_table"]),
        );
        vec![root, broken]
    };
    let mut m = SchemaVersionManager::new(
        open_in_memory().unwrap(),
        History::from_revisions(revs.clone()).unwrap(),
    );
    m.upgrade("head").unwrap();

    let err = m.downgrade(1).unwrap_err();
    assert!(matches!(err, AppError::Migration { direction: "downgrade", .. }));
    assert_eq!(err.revision(), Some(revs[1].id.as_str()));
    assert_eq!(m.current_revision().unwrap(), at(&revs[1]));
}

// ──────────────────────── Round trip ────────────────────────

#[test]
fn each_revision_round_trips() {
    let revs = shop_chain();
    let mut m = SchemaVersionManager::new(
        open_in_memory().unwrap(),
        History::from_revisions(revs.clone()).unwrap(),
    );

    for rev in &revs {
        let snapshot = read_schema(&m.db().conn).unwrap();
        m.upgrade(rev.id.as_str()).unwrap();
        m.downgrade(1).unwrap_or_else(|_| m.downgrade_to("base").unwrap());
        assert_eq!(read_schema(&m.db().conn).unwrap(), snapshot, "revision {}", rev.id);
        m.upgrade(rev.id.as_str()).unwrap();
    }

    let report = m.check(None).unwrap();
    assert_eq!(report.revisions_checked, 3);
    assert!(report.is_clean());
}
