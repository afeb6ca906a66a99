//! Version bump policy for skill packages.
//!
//! The rule, evaluated in order:
//!
//! | Condition | Bump |
//! |-----------|------|
//! | no paths at all, or nothing changed | `None` |
//! | first build (every path is new) | `Major` |
//! | touched paths / total paths > `major_change_ratio` | `Major` |
//! | any path added, modified or deleted | `Minor` |
//! | only metadata changed | `Patch` |
//!
//! `Major` means a full rebuild, `Minor` and `Patch` ship a delta.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{ChangeSet, SemVer};

/// Fraction of touched paths above which an update is a full rebuild.
pub const DEFAULT_MAJOR_CHANGE_RATIO: f64 = 0.5;

/// Kind of version bump. Ordered by magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BumpKind {
    None,
    Patch,
    Minor,
    Major,
}

impl BumpKind {
    /// A `Major` bump rebuilds the whole package instead of shipping a delta.
    pub fn is_full_rebuild(&self) -> bool {
        matches!(self, BumpKind::Major)
    }
}

/// Thresholds for [`decide_bump`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VersionPolicy {
    #[serde(default = "default_ratio")]
    pub major_change_ratio: f64,
}

fn default_ratio() -> f64 {
    DEFAULT_MAJOR_CHANGE_RATIO
}

impl Default for VersionPolicy {
    fn default() -> Self {
        Self {
            major_change_ratio: DEFAULT_MAJOR_CHANGE_RATIO,
        }
    }
}

impl VersionPolicy {
    pub fn new(major_change_ratio: f64) -> Result<Self> {
        let policy = Self { major_change_ratio };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.major_change_ratio) {
            return Err(Error::Config(format!(
                "major_change_ratio must be in [0.0, 1.0], got {}",
                self.major_change_ratio
            )));
        }
        Ok(())
    }

    /// Classify a change set. `total_doc_count` is the number of distinct
    /// paths across the current documents and the previous manifest.
    pub fn decide_bump(&self, change_set: &ChangeSet, total_doc_count: usize) -> BumpKind {
        if total_doc_count == 0 || change_set.is_noop() {
            return BumpKind::None;
        }
        if change_set.is_first_build() {
            return BumpKind::Major;
        }

        let touched = change_set.touched_count();
        let ratio = touched as f64 / total_doc_count as f64;
        if ratio > self.major_change_ratio {
            BumpKind::Major
        } else if touched > 0 {
            BumpKind::Minor
        } else {
            BumpKind::Patch
        }
    }
}

/// [`VersionPolicy::decide_bump`] with the default policy.
pub fn decide_bump(change_set: &ChangeSet, total_doc_count: usize) -> BumpKind {
    VersionPolicy::default().decide_bump(change_set, total_doc_count)
}

/// Apply a bump. Never decreases the version.
pub fn apply_bump(current: SemVer, kind: BumpKind) -> SemVer {
    match kind {
        BumpKind::None => current,
        BumpKind::Patch => SemVer::new(current.major, current.minor, current.patch + 1),
        BumpKind::Minor => SemVer::new(current.major, current.minor + 1, 0),
        BumpKind::Major => SemVer::new(current.major + 1, 0, 0),
    }
}
