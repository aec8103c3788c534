//! Linear revision history and path computation.
//!
//! Positions are indexes into the root-to-head chain. `None` stands for the
//! unversioned state before the root.

use crate::domain::revision::{AppliedState, Revision, RevisionId};
use crate::error::AppError;
use std::collections::{HashMap, HashSet};

/// Shortest id prefix accepted when resolving a target.
pub const MIN_PREFIX_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Head,
    Base,
    Revision(String),
}

impl Target {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "head" => Self::Head,
            "base" => Self::Base,
            other => Self::Revision(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct History {
    revisions: Vec<Revision>,
}

impl History {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Order revisions root first, rejecting anything that is not a single chain.
    pub fn from_revisions(revisions: Vec<Revision>) -> Result<Self, AppError> {
        if revisions.is_empty() {
            return Ok(Self::empty());
        }

        let mut by_id: HashMap<RevisionId, Revision> = HashMap::new();
        for rev in revisions {
            if by_id.contains_key(&rev.id) {
                return Err(AppError::Conflict(format!("Duplicate revision id {}", rev.id)));
            }
            by_id.insert(rev.id.clone(), rev);
        }

        let mut roots = Vec::new();
        let mut children: HashMap<&RevisionId, &RevisionId> = HashMap::new();
        for rev in by_id.values() {
            match &rev.parent {
                None => roots.push(&rev.id),
                Some(parent) => {
                    if !by_id.contains_key(parent) {
                        return Err(AppError::Conflict(format!(
                            "Revision {} references missing parent {}",
                            rev.id, parent
                        )));
                    }
                    if let Some(other) = children.insert(parent, &rev.id) {
                        let (a, b) = if other < &rev.id { (other, &rev.id) } else { (&rev.id, other) };
                        return Err(AppError::Conflict(format!(
                            "Diverging heads: {} and {} both revise {}; merge them by hand",
                            a, b, parent
                        )));
                    }
                }
            }
        }

        let root = match roots.as_slice() {
            [root] => (*root).clone(),
            [] => return Err(AppError::Conflict("History has no root revision".into())),
            _ => {
                let mut ids: Vec<String> = roots.iter().map(|r| r.to_string()).collect();
                ids.sort();
                return Err(AppError::Conflict(format!(
                    "History has multiple roots: {}",
                    ids.join(", ")
                )));
            }
        };

        let mut order = vec![root.clone()];
        let mut seen: HashSet<&RevisionId> = HashSet::new();
        let mut cursor = by_id.get_key_value(&root).map(|(k, _)| k);
        while let Some(id) = cursor {
            seen.insert(id);
            cursor = children.get(id).copied();
            if let Some(next) = cursor {
                order.push(next.clone());
            }
        }
        if seen.len() != by_id.len() {
            return Err(AppError::Conflict(
                "History contains revisions unreachable from the root (cycle)".into(),
            ));
        }

        let mut by_id = by_id;
        let revisions = order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect();
        Ok(Self { revisions })
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.iter()
    }

    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    pub fn root(&self) -> Option<&Revision> {
        self.revisions.first()
    }

    pub fn head(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    pub fn head_position(&self) -> Option<usize> {
        self.revisions.len().checked_sub(1)
    }

    pub fn get(&self, id: &RevisionId) -> Option<&Revision> {
        self.revisions.iter().find(|r| &r.id == id)
    }

    pub fn at(&self, position: usize) -> Option<&Revision> {
        self.revisions.get(position)
    }

    pub fn position(&self, id: &RevisionId) -> Option<usize> {
        self.revisions.iter().position(|r| &r.id == id)
    }

    /// Position of the applied state; a marker naming an unknown revision is an error.
    pub fn position_of(&self, state: &AppliedState) -> Result<Option<usize>, AppError> {
        match state {
            AppliedState::Unversioned => Ok(None),
            AppliedState::At(id) => self
                .position(id)
                .map(Some)
                .ok_or_else(|| AppError::UnknownRevision(id.to_string())),
        }
    }

    pub fn state_at(&self, position: Option<usize>) -> AppliedState {
        match position.and_then(|p| self.revisions.get(p)) {
            Some(rev) => AppliedState::At(rev.id.clone()),
            None => AppliedState::Unversioned,
        }
    }

    /// Resolve `head`, `base`, a full id or a unique prefix to a position.
    pub fn resolve(&self, target: &Target) -> Result<Option<usize>, AppError> {
        match target {
            Target::Head => Ok(self.head_position()),
            Target::Base => Ok(None),
            Target::Revision(needle) => {
                if let Some(pos) = self.revisions.iter().position(|r| r.id.as_str() == needle) {
                    return Ok(Some(pos));
                }
                if needle.len() < MIN_PREFIX_LEN {
                    return Err(AppError::UnknownRevision(needle.clone()));
                }
                let matches: Vec<usize> = self
                    .revisions
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.id.as_str().starts_with(needle.as_str()))
                    .map(|(i, _)| i)
                    .collect();
                match matches.as_slice() {
                    [pos] => Ok(Some(*pos)),
                    [] => Err(AppError::UnknownRevision(needle.clone())),
                    _ => Err(AppError::Validation(format!(
                        "Revision prefix {} is ambiguous ({} matches)",
                        needle,
                        matches.len()
                    ))),
                }
            }
        }
    }

    /// Revisions to apply going forward from `from` to `to`, oldest first.
    pub fn upgrade_path(&self, from: Option<usize>, to: Option<usize>) -> &[Revision] {
        let start = from.map_or(0, |p| p + 1);
        let end = to.map_or(0, |p| p + 1);
        if start >= end {
            return &[];
        }
        &self.revisions[start..end]
    }

    /// Revisions to revert going back from `from` to `to`, newest first.
    pub fn downgrade_path(&self, from: Option<usize>, to: Option<usize>) -> Vec<&Revision> {
        let end = from.map_or(0, |p| p + 1);
        let start = to.map_or(0, |p| p + 1);
        if start >= end {
            return Vec::new();
        }
        self.revisions[start..end].iter().rev().collect()
    }

    /// Parent links between `position` and the root.
    pub fn distance_to_root(&self, position: Option<usize>) -> usize {
        position.unwrap_or(0)
    }

    /// Append a freshly authored revision; its parent must be the current head.
    pub fn append(&mut self, revision: Revision) -> Result<(), AppError> {
        let head = self.head().map(|r| r.id.clone());
        if revision.parent != head {
            return Err(AppError::Conflict(format!(
                "Revision {} revises {} but head is {}",
                revision.id,
                revision
                    .parent
                    .as_ref()
                    .map_or("nothing".to_string(), |p| p.to_string()),
                head.map_or("empty".to_string(), |h| h.to_string()),
            )));
        }
        if self.get(&revision.id).is_some() {
            return Err(AppError::Conflict(format!("Duplicate revision id {}", revision.id)));
        }
        self.revisions.push(revision);
        Ok(())
    }
}
