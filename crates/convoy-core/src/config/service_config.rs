//! Per-service configuration. The engine family is chosen here, at
//! configuration time, never by inspecting the service directory.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::ServiceId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub id: ServiceId,
    /// SQLite database the service's migrations run against.
    pub database: PathBuf,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum EngineConfig {
    /// `NNNN_name.up.sql` / `NNNN_name.down.sql` files.
    NumberedSql { migrations_dir: PathBuf },
    /// A `revisions.toml` describing a parent-linked revision chain.
    RevisionChain { revisions_file: PathBuf },
}

impl EngineConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NumberedSql { .. } => "numbered_sql",
            Self::RevisionChain { .. } => "revision_chain",
        }
    }
}
