//! Engine adapters. Each one implements `ServiceAdapter` over a different
//! migration-engine family; the family is picked from configuration.

pub mod numbered_sql;
pub mod revision_chain;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};

use convoy_core::config::{EngineConfig, ServiceConfig};
use convoy_core::errors::{AdapterError, AdapterResult, ConfigError};
use convoy_core::traits::{Clock, ServiceAdapter};
use convoy_core::types::ServiceId;

pub use numbered_sql::NumberedSqlAdapter;
pub use revision_chain::{
    ChainRevision, RevisionAction, RevisionChain, RevisionChainAdapter, RevisionChainError,
};

const SERVICE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the adapter a service's configuration asks for.
pub fn adapter_from_config(
    service: &ServiceConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn ServiceAdapter>, ConfigError> {
    Ok(match &service.engine {
        EngineConfig::NumberedSql { migrations_dir } => Arc::new(
            NumberedSqlAdapter::new(service.id.clone(), &service.database, migrations_dir)
                .with_clock(clock),
        ),
        EngineConfig::RevisionChain { revisions_file } => {
            let chain = RevisionChain::load(revisions_file)?;
            Arc::new(
                RevisionChainAdapter::new(service.id.clone(), &service.database, chain)
                    .with_clock(clock),
            )
        }
    })
}

/// Open the service database read-write. Never creates it: a missing file
/// means the service is unavailable, not empty.
pub(crate) fn open_read_write(service: &ServiceId, path: &Path) -> AdapterResult<Connection> {
    open(service, path, OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX)
}

pub(crate) fn open_read_only(service: &ServiceId, path: &Path) -> AdapterResult<Connection> {
    open(service, path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
}

fn open(service: &ServiceId, path: &Path, flags: OpenFlags) -> AdapterResult<Connection> {
    let unavailable = |e: rusqlite::Error| AdapterError::Unavailable {
        service: service.clone(),
        cause: format!("{}: {e}", path.display()),
    };
    let conn = Connection::open_with_flags(path, flags).map_err(unavailable)?;
    conn.busy_timeout(SERVICE_BUSY_TIMEOUT).map_err(unavailable)?;
    Ok(conn)
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [table],
        |row| row.get(0),
    )
}

/// Run `f` in one `BEGIN IMMEDIATE` transaction; commit on success.
pub(crate) fn in_transaction<T>(
    conn: &mut Connection,
    f: impl FnOnce(&Transaction<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

pub(crate) fn state_unreadable(service: &ServiceId, e: impl std::fmt::Display) -> AdapterError {
    AdapterError::StateUnreadable {
        service: service.clone(),
        message: e.to_string(),
    }
}

pub(crate) fn content_checksum(parts: &[&[u8]]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}
