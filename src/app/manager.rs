//! Schema version manager: moves the applied state along the history.
//!
//! Every step commits its transformation together with the new marker, so a
//! run that fails or is aborted leaves the database at the last completed
//! step and a retry continues from there.

use crate::domain::{
    AppliedState, Direction, History, Revision, RevisionId, SchemaDiff, SchemaShape, Target,
};
use crate::error::AppError;
use crate::infra::db::{self, Db};
use crate::infra::{MigrationLock, RevisionStore};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// SQLite VM instructions between timeout checks.
const PROGRESS_INTERVAL: i32 = 1000;

#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Per-step limit. A step running longer is interrupted and fails.
    pub timeout: Option<Duration>,
    /// Checked before each step; once set, no further step is started.
    pub abort: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub from: AppliedState,
    pub to: AppliedState,
    pub applied: Vec<RevisionId>,
}

impl MigrationReport {
    fn unchanged(state: AppliedState) -> Self {
        Self {
            from: state.clone(),
            to: state,
            applied: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub parent: Option<String>,
    pub description: String,
    pub created_at: String,
    pub applied: bool,
    pub current: bool,
    pub head: bool,
    pub applied_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundTripFailure {
    pub revision: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub revisions_checked: usize,
    pub round_trip_failures: Vec<RoundTripFailure>,
    /// Changes the model still needs on top of head, if a model was given.
    pub pending_changes: Vec<String>,
    pub at_head: bool,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.round_trip_failures.is_empty() && self.pending_changes.is_empty() && self.at_head
    }
}

pub struct SchemaVersionManager {
    db: Db,
    history: History,
    store: Option<RevisionStore>,
    options: StepOptions,
}

impl SchemaVersionManager {
    pub fn new(db: Db, history: History) -> Self {
        Self {
            db,
            history,
            store: None,
            options: StepOptions::default(),
        }
    }

    /// Manager whose history lives in `store`; generated revisions are written there.
    pub fn open(db: Db, store: RevisionStore) -> Result<Self, AppError> {
        let history = store.load()?;
        Ok(Self {
            db,
            history,
            store: Some(store),
            options: StepOptions::default(),
        })
    }

    pub fn with_options(mut self, options: StepOptions) -> Self {
        self.options = options;
        self
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn current_revision(&self) -> Result<AppliedState, AppError> {
        db::read_marker(&self.db.conn)
    }

    /// Take the migration lock and reread the history from the store, so that
    /// revisions authored by another run are seen before anything is decided.
    fn lock(&mut self) -> Result<MigrationLock, AppError> {
        let lock = MigrationLock::acquire(self.db.location())?;
        if let Some(store) = &self.store {
            self.history = store.load()?;
        }
        Ok(lock)
    }

    fn current_position(&self) -> Result<(AppliedState, Option<usize>), AppError> {
        let state = self.current_revision()?;
        let position = self.history.position_of(&state)?;
        Ok((state, position))
    }

    /// Apply upgrades from the applied state up to `target` (`head` or a revision).
    pub fn upgrade(&mut self, target: &str) -> Result<MigrationReport, AppError> {
        let _lock = self.lock()?;
        self.upgrade_locked(target)
    }

    /// Generate a revision from `model` (if anything changed), then upgrade to
    /// `target`, all under one hold of the lock.
    pub fn upgrade_with_message(
        &mut self,
        message: &str,
        model: &SchemaShape,
        target: &str,
    ) -> Result<(Option<Revision>, MigrationReport), AppError> {
        let _lock = self.lock()?;
        let generated = self.autogenerate_locked(message, model)?;
        let report = self.upgrade_locked(target)?;
        Ok((generated, report))
    }

    // caller holds the lock
    fn upgrade_locked(&mut self, target: &str) -> Result<MigrationReport, AppError> {
        let (from_state, from) = self.current_position()?;

        let target = Target::parse(target);
        if target == Target::Base {
            return Err(AppError::Validation(
                "Cannot upgrade to base; use downgrade".into(),
            ));
        }
        let to = self.history.resolve(&target)?;
        if to == from {
            log::info!("Already at {}, nothing to upgrade", from_state);
            return Ok(MigrationReport::unchanged(from_state));
        }
        if to < from {
            return Err(AppError::Validation(format!(
                "Target {} is behind current revision {}; use downgrade",
                self.history.state_at(to),
                from_state
            )));
        }

        let path: Vec<Revision> = self.history.upgrade_path(from, to).to_vec();
        log::info!(
            "Upgrading {} -> {} ({} step(s))",
            from_state,
            self.history.state_at(to),
            path.len()
        );

        let mut current = from_state.clone();
        let mut applied = Vec::with_capacity(path.len());
        for rev in &path {
            self.check_abort(&current)?;
            let next = AppliedState::At(rev.id.clone());
            self.run_step(rev, Direction::Upgrade, &next)?;
            applied.push(rev.id.clone());
            current = next;
        }

        Ok(MigrationReport {
            from: from_state,
            to: current,
            applied,
        })
    }

    /// Revert exactly `steps` revisions. Never goes past the root.
    pub fn downgrade(&mut self, steps: usize) -> Result<MigrationReport, AppError> {
        let _lock = self.lock()?;
        let (from_state, from) = self.current_position()?;
        if steps == 0 {
            return Ok(MigrationReport::unchanged(from_state));
        }

        let available = self.history.distance_to_root(from);
        if steps > available {
            return Err(AppError::InsufficientHistory {
                requested: steps,
                available,
            });
        }
        let to = from.map(|p| p - steps);
        self.revert(from_state, from, to)
    }

    /// Revert until `target` is the applied state; `base` also reverts the root.
    pub fn downgrade_to(&mut self, target: &str) -> Result<MigrationReport, AppError> {
        let _lock = self.lock()?;
        let (from_state, from) = self.current_position()?;
        let to = self.history.resolve(&Target::parse(target))?;
        if to > from {
            return Err(AppError::Validation(format!(
                "Target {} is ahead of current revision {}; use upgrade",
                self.history.state_at(to),
                from_state
            )));
        }
        self.revert(from_state, from, to)
    }

    // caller holds the lock
    fn revert(
        &mut self,
        from_state: AppliedState,
        from: Option<usize>,
        to: Option<usize>,
    ) -> Result<MigrationReport, AppError> {
        let path: Vec<Revision> = self
            .history
            .downgrade_path(from, to)
            .into_iter()
            .cloned()
            .collect();
        if path.is_empty() {
            return Ok(MigrationReport::unchanged(from_state));
        }
        log::info!(
            "Downgrading {} -> {} ({} step(s))",
            from_state,
            self.history.state_at(to),
            path.len()
        );

        let mut current = from_state.clone();
        let mut applied = Vec::with_capacity(path.len());
        for rev in &path {
            self.check_abort(&current)?;
            let next = match &rev.parent {
                Some(parent) => AppliedState::At(parent.clone()),
                None => AppliedState::Unversioned,
            };
            self.run_step(rev, Direction::Downgrade, &next)?;
            applied.push(rev.id.clone());
            current = next;
        }

        Ok(MigrationReport {
            from: from_state,
            to: current,
            applied,
        })
    }

    /// Set the marker without running any transformation.
    pub fn stamp(&mut self, target: &str) -> Result<AppliedState, AppError> {
        let _lock = self.lock()?;
        let position = self.history.resolve(&Target::parse(target))?;
        let state = self.history.state_at(position);
        db::apply_step(
            &mut self.db.conn,
            state.revision(),
            None,
            Direction::Stamp,
            &state,
        )?;
        log::info!("Stamped database at {}", state);
        Ok(state)
    }

    /// Append a revision built from `diff` on top of head. Applied state is untouched.
    pub fn generate_revision(
        &mut self,
        description: &str,
        diff: &SchemaDiff,
    ) -> Result<Revision, AppError> {
        let _lock = self.lock()?;
        self.append_revision(description, diff)
    }

    fn append_revision(&mut self, description: &str, diff: &SchemaDiff) -> Result<Revision, AppError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(AppError::Validation("Revision description is required".into()));
        }
        let parent = self.history.head().map(|r| r.id.clone());
        let revision = Revision::new(parent, description, diff.forward(), diff.backward());

        if let Some(store) = &self.store {
            store.write(&revision)?;
        }
        self.history.append(revision.clone())?;
        log::info!(
            "Generated revision {} ({}) with {} change(s)",
            revision.id,
            revision.description,
            diff.changes().len()
        );
        Ok(revision)
    }

    /// Diff `model` against head and generate a revision if anything changed.
    pub fn autogenerate(
        &mut self,
        description: &str,
        model: &SchemaShape,
    ) -> Result<Option<Revision>, AppError> {
        let _lock = self.lock()?;
        self.autogenerate_locked(description, model)
    }

    fn autogenerate_locked(
        &mut self,
        description: &str,
        model: &SchemaShape,
    ) -> Result<Option<Revision>, AppError> {
        let current = self.head_shape()?;
        let diff = SchemaDiff::between(&current, model)?;
        if diff.is_empty() {
            log::info!("No schema changes detected");
            return Ok(None);
        }
        for line in diff.summary() {
            log::info!("Detected {}", line);
        }
        self.append_revision(description, &diff).map(Some)
    }

    /// Schema shape at head, replayed on a scratch in-memory database.
    pub fn head_shape(&self) -> Result<SchemaShape, AppError> {
        let scratch = db::open_in_memory()?;
        for rev in self.history.iter() {
            db::run_script(&scratch.conn, &rev.upgrade)
                .map_err(|e| step_error(rev, Direction::Upgrade, e.to_string()))?;
        }
        db::read_schema(&scratch.conn)
    }

    /// Replay the history on a scratch database, checking that every
    /// downgrade restores the shape before its upgrade.
    pub fn check(&self, model: Option<&SchemaShape>) -> Result<CheckReport, AppError> {
        let scratch = db::open_in_memory()?;
        let mut failures = Vec::new();
        let mut checked = 0;

        for rev in self.history.iter() {
            let before = db::read_schema(&scratch.conn)?;
            db::run_script(&scratch.conn, &rev.upgrade)
                .map_err(|e| step_error(rev, Direction::Upgrade, e.to_string()))?;
            db::run_script(&scratch.conn, &rev.downgrade)
                .map_err(|e| step_error(rev, Direction::Downgrade, e.to_string()))?;
            let restored = db::read_schema(&scratch.conn)?;
            checked += 1;

            if restored != before {
                let detail = SchemaDiff::between(&restored, &before)
                    .map(|d| format!("downgrade leaves {}", d.summary().join(", ")))
                    .unwrap_or_else(|_| "downgrade leaves a different schema shape".into());
                log::warn!("Round trip of {} failed: {}", rev.id, detail);
                failures.push(RoundTripFailure {
                    revision: rev.id.to_string(),
                    detail,
                });
                // later revisions would run against the wrong shape
                break;
            }

            db::run_script(&scratch.conn, &rev.upgrade)
                .map_err(|e| step_error(rev, Direction::Upgrade, e.to_string()))?;
        }

        let mut pending_changes = Vec::new();
        if let (Some(model), true) = (model, failures.is_empty()) {
            let head = db::read_schema(&scratch.conn)?;
            match SchemaDiff::between(&head, model) {
                Ok(diff) => pending_changes = diff.summary(),
                Err(e) => pending_changes.push(e.to_string()),
            }
        }

        let at_head = self.current_revision()? == self.history.state_at(self.history.head_position());

        Ok(CheckReport {
            revisions_checked: checked,
            round_trip_failures: failures,
            pending_changes,
            at_head,
        })
    }

    pub fn history_entries(&self) -> Result<Vec<HistoryEntry>, AppError> {
        let (_, current) = self.current_position()?;
        let log = db::read_log(&self.db.conn)?;
        let head = self.history.head_position();

        Ok(self
            .history
            .iter()
            .enumerate()
            .map(|(i, rev)| HistoryEntry {
                id: rev.id.to_string(),
                parent: rev.parent.as_ref().map(|p| p.to_string()),
                description: rev.description.clone(),
                created_at: rev.created_at.clone(),
                applied: current.is_some_and(|c| i <= c),
                current: current == Some(i),
                head: head == Some(i),
                applied_at: log
                    .iter()
                    .rev()
                    .find(|e| {
                        e.revision.as_deref() == Some(rev.id.as_str()) && e.direction != "downgrade"
                    })
                    .map(|e| e.applied_at.clone()),
            })
            .collect())
    }

    fn check_abort(&self, current: &AppliedState) -> Result<(), AppError> {
        if let Some(flag) = &self.options.abort {
            if flag.load(Ordering::SeqCst) {
                log::warn!("Migration aborted at {}", current);
                return Err(AppError::Aborted {
                    at: current.to_string(),
                });
            }
        }
        Ok(())
    }

    fn run_step(
        &mut self,
        rev: &Revision,
        direction: Direction,
        next: &AppliedState,
    ) -> Result<(), AppError> {
        log::info!(
            "Running {} of {} ({})",
            direction.as_str(),
            rev.id,
            rev.description
        );
        let started = Instant::now();
        let timed_out = Arc::new(AtomicBool::new(false));
        if let Some(timeout) = self.options.timeout {
            let deadline = started + timeout;
            let flag = Arc::clone(&timed_out);
            self.db.conn.progress_handler(
                PROGRESS_INTERVAL,
                Some(move || {
                    if Instant::now() >= deadline {
                        flag.store(true, Ordering::SeqCst);
                        true
                    } else {
                        false
                    }
                }),
            );
        }

        let result = db::apply_step(
            &mut self.db.conn,
            Some(&rev.id),
            rev.script(direction),
            direction,
            next,
        );

        if self.options.timeout.is_some() {
            self.db.conn.progress_handler(0, None::<fn() -> bool>);
        }
        if !self.db.conn.is_autocommit() {
            // an interrupted statement can leave the transaction open
            if let Err(e) = self.db.conn.execute_batch("ROLLBACK") {
                log::warn!("Rollback after {} of {} failed: {}", direction.as_str(), rev.id, e);
            }
        }

        match result {
            Ok(()) => {
                log::info!(
                    "{} of {} finished in {:?}",
                    direction.as_str(),
                    rev.id,
                    started.elapsed()
                );
                Ok(())
            }
            Err(e) => {
                let cause = match self.options.timeout {
                    Some(timeout) if timed_out.load(Ordering::SeqCst) => {
                        format!("step exceeded timeout of {:?}", timeout)
                    }
                    _ => e.to_string(),
                };
                log::warn!(
                    "{} of {} failed, applied state left at previous step: {}",
                    direction.as_str(),
                    rev.id,
                    cause
                );
                Err(step_error(rev, direction, cause))
            }
        }
    }
}

fn step_error(rev: &Revision, direction: Direction, cause: String) -> AppError {
    AppError::Migration {
        revision: rev.id.to_string(),
        direction: direction.as_str(),
        cause,
    }
}
