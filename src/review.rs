//! Human decisions on near-duplicate groups.
//!
//! The review UI is external; it hands back a JSON file:
//!
//! ```json
//! {"decisions": [{"path": "/in/b/Budget (1).xlsx", "decision": "delete"}]}
//! ```
//!
//! `keep` releases the file from its group so it is classified and moved
//! like any other file. `delete` schedules it for the trash.

use crate::dedupe::Resolution;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("failed to read review decisions {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse review decisions {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Keep,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub path: PathBuf,
    pub decision: Decision,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecisions {
    #[serde(default)]
    pub decisions: Vec<ReviewDecision>,
}

impl ReviewDecisions {
    pub fn load(path: &Path) -> Result<Self, ReviewError> {
        let content = fs::read_to_string(path).map_err(|source| ReviewError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| ReviewError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub kept: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    /// Decisions for paths that are not awaiting review.
    pub ignored: Vec<PathBuf>,
}

/// Applies decisions to the resolution's review members.
pub fn apply_decisions(resolution: &mut Resolution, decisions: &ReviewDecisions) -> ReviewOutcome {
    let mut outcome = ReviewOutcome::default();

    for item in &decisions.decisions {
        let keep_path = resolution.member(&item.path).map(|(group, _)| group.keep.clone());
        let applied = match (item.decision, keep_path) {
            (Decision::Keep, Some(_)) => resolution.release(&item.path),
            (Decision::Delete, Some(keep)) => resolution.confirm_delete(
                &item.path,
                format!("manual review: duplicate of {}", keep.display()),
            ),
            (_, None) => false,
        };

        if !applied {
            warn!("ignoring review decision for {}: not awaiting review", item.path.display());
            outcome.ignored.push(item.path.clone());
            continue;
        }
        debug!("review {:?} {}", item.decision, item.path.display());
        match item.decision {
            Decision::Keep => outcome.kept.push(item.path.clone()),
            Decision::Delete => outcome.deleted.push(item.path.clone()),
        }
    }

    info!(
        "applied review decisions: {} kept, {} deleted, {} ignored",
        outcome.kept.len(),
        outcome.deleted.len(),
        outcome.ignored.len()
    );
    outcome
}
