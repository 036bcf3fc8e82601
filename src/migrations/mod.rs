pub mod packages;
pub mod runner;
pub mod schema;

use crate::db::{Database, DbError, DbResult};

pub use packages::{migration_number, package_range};
pub use runner::{rollback, rollback_to, run_pending, status, MigrationStatus, RunOptions};

pub type MigrationFn = fn(&dyn Database) -> DbResult<()>;

/// A numbered schema change. `id` is `NNN_name`; the leading number orders
/// the registry and places the migration in a package band.
#[derive(Clone, Copy)]
pub struct Migration {
    pub id: &'static str,
    pub description: &'static str,
    pub version: &'static str,
    pub date: &'static str,
    /// Seed or data-fix migrations that only run when explicitly requested.
    pub manual_only: bool,
    pub up: MigrationFn,
    pub down: Option<MigrationFn>,
}

impl Migration {
    pub fn number(&self) -> Option<u32> {
        migration_number(self.id)
    }

    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    pub fn package(&self) -> Option<char> {
        self.number().and_then(packages::package_of)
    }

    /// One-line listing: `id [package] date  description`.
    pub fn summary(&self) -> String {
        format!(
            "{} [{}] {}  {}",
            self.id,
            self.package().unwrap_or('-'),
            self.date,
            self.description
        )
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("manual_only", &self.manual_only)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("invalid package range {start}..{end} (packages are A-E, start must not follow end)")]
    InvalidPackageRange { start: String, end: String },

    #[error("invalid migration registry: {0}")]
    InvalidRegistry(String),

    #[error("migration {id} failed: {reason}")]
    Failed { id: String, reason: String },

    #[error("rollback of {id} failed: {reason}")]
    RollbackFailed { id: String, reason: String },

    #[error("migration {0} is not applied")]
    NotApplied(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Every shipped migration, in apply order.
pub fn registry() -> Vec<Migration> {
    schema::all()
}

/// Numbers must be present and strictly increasing.
pub fn validate(migrations: &[Migration]) -> Result<(), MigrationError> {
    let mut previous: Option<(u32, &str)> = None;
    for m in migrations {
        let n = m.number().ok_or_else(|| {
            MigrationError::InvalidRegistry(format!("{} has no migration number", m.id))
        })?;
        if let Some((prev, prev_id)) = previous {
            if n <= prev {
                return Err(MigrationError::InvalidRegistry(format!(
                    "{} does not follow {} (numbers must strictly increase)",
                    m.id, prev_id
                )));
            }
        }
        previous = Some((n, m.id));
    }
    Ok(())
}
