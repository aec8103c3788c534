//! Revision nodes, scripts and the applied-state marker.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the hex id derived from a revision's content.
pub const REVISION_ID_LEN: usize = 12;

pub const UNVERSIONED: &str = "unversioned";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionId(String);

impl RevisionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered SQL statements making up one transformation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Script {
    statements: Vec<String>,
}

impl Script {
    pub fn new(statements: Vec<String>) -> Self {
        Self { statements }
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl From<Vec<&str>> for Script {
    fn from(statements: Vec<&str>) -> Self {
        Self::new(statements.into_iter().map(str::to_string).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upgrade,
    Downgrade,
    Stamp,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
            Self::Stamp => "stamp",
        }
    }
}

/// One immutable schema change. Ids are derived from content, so an edited
/// revision file no longer verifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: RevisionId,
    pub parent: Option<RevisionId>,
    pub description: String,
    pub created_at: String,
    pub upgrade: Script,
    pub downgrade: Script,
}

impl Revision {
    /// Author a new revision stamped with the current time.
    pub fn new(
        parent: Option<RevisionId>,
        description: &str,
        upgrade: Script,
        downgrade: Script,
    ) -> Self {
        let created_at = chrono::Utc::now().to_rfc3339();
        Self::with_timestamp(parent, description, &created_at, upgrade, downgrade)
    }

    pub fn with_timestamp(
        parent: Option<RevisionId>,
        description: &str,
        created_at: &str,
        upgrade: Script,
        downgrade: Script,
    ) -> Self {
        let id = Self::compute_id(parent.as_ref(), description, created_at, &upgrade, &downgrade);
        Self {
            id,
            parent,
            description: description.to_string(),
            created_at: created_at.to_string(),
            upgrade,
            downgrade,
        }
    }

    pub fn compute_id(
        parent: Option<&RevisionId>,
        description: &str,
        created_at: &str,
        upgrade: &Script,
        downgrade: &Script,
    ) -> RevisionId {
        let mut hasher = Sha256::new();
        hasher.update(parent.map(RevisionId::as_str).unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(description.as_bytes());
        hasher.update([0u8]);
        hasher.update(created_at.as_bytes());
        for (tag, script) in [(b'u', upgrade), (b'd', downgrade)] {
            hasher.update([tag]);
            for stmt in script.statements() {
                hasher.update(stmt.as_bytes());
                hasher.update([0u8]);
            }
        }
        let digest = format!("{:x}", hasher.finalize());
        RevisionId(digest[..REVISION_ID_LEN].to_string())
    }

    /// True if the id still matches the revision content.
    pub fn verify(&self) -> bool {
        Self::compute_id(
            self.parent.as_ref(),
            &self.description,
            &self.created_at,
            &self.upgrade,
            &self.downgrade,
        ) == self.id
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn file_name(&self) -> String {
        let slug: String = self
            .description
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        let slug = slug.trim_matches('_');
        if slug.is_empty() {
            format!("{}.json", self.id)
        } else {
            format!("{}_{}.json", self.id, slug)
        }
    }

    pub fn script(&self, direction: Direction) -> Option<&Script> {
        match direction {
            Direction::Upgrade => Some(&self.upgrade),
            Direction::Downgrade => Some(&self.downgrade),
            Direction::Stamp => None,
        }
    }
}

/// The persisted marker of the most recently applied revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedState {
    Unversioned,
    At(RevisionId),
}

impl AppliedState {
    pub fn revision(&self) -> Option<&RevisionId> {
        match self {
            Self::Unversioned => None,
            Self::At(id) => Some(id),
        }
    }
}

impl fmt::Display for AppliedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unversioned => f.write_str(UNVERSIONED),
            Self::At(id) => write!(f, "{}", id),
        }
    }
}
