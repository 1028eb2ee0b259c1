//! Crate-level error type.

use crate::audit::AuditError;
use crate::config::ConfigError;
use crate::executor::ExecuteError;
use crate::manifest::ManifestError;
use crate::plan::PlanError;
use crate::review::ReviewError;
use crate::taxonomy::TaxonomyError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Review(#[from] ReviewError),

    #[error("failed to write {}: {reason}", path.display())]
    Output { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
