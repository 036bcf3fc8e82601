use std::ops::RangeInclusive;

use serde::Serialize;
use serde_json::Value;

use super::packages::{filter_by_package, migration_number, package_range};
use super::{Migration, MigrationError};
use crate::config::MigrationConfig;
use crate::db::{self, Database, DbResult};
use crate::params;

const TRACKING_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    id TEXT PRIMARY KEY,
    number INTEGER NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    version TEXT NOT NULL DEFAULT '',
    applied_at TEXT NOT NULL,
    success INTEGER NOT NULL DEFAULT 1,
    error TEXT
)";

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub range: RangeInclusive<u32>,
    pub run_manual: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            range: 0..=999,
            run_manual: false,
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &MigrationConfig) -> Result<Self, MigrationError> {
        Ok(RunOptions {
            range: package_range(
                config.start_package.as_deref(),
                config.end_package.as_deref(),
            )?,
            run_manual: config.run_manual,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub ran: Vec<String>,
    pub already_applied: usize,
    pub skipped_manual: Vec<String>,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub total: usize,
    pub completed: usize,
    pub pending: Vec<String>,
    pub failed: Vec<String>,
    pub last_applied: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RollbackReport {
    pub rolled_back: Vec<String>,
    pub skipped: Vec<String>,
}

/// A row of the tracking table.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, Serialize)]
pub struct AppliedMigration {
    pub id: String,
    pub number: i64,
    pub applied_at: String,
    pub success: i64,
    pub error: Option<String>,
}

impl AppliedMigration {
    pub fn succeeded(&self) -> bool {
        self.success != 0
    }
}

pub fn ensure_tracking_table(db: &dyn Database) -> DbResult<()> {
    db.exec(TRACKING_TABLE_SQL)
}

/// Tracking rows in apply order.
pub fn applied(db: &dyn Database) -> DbResult<Vec<AppliedMigration>> {
    ensure_tracking_table(db)?;
    db::fetch_all(
        db,
        "SELECT id, number, applied_at, success, error FROM schema_migrations ORDER BY number ASC, id ASC",
        &[],
    )
}

fn record(db: &dyn Database, m: &Migration, success: bool, error: Option<&str>) -> DbResult<()> {
    db.run(
        "INSERT INTO schema_migrations (id, number, description, version, applied_at, success, error)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (id) DO UPDATE SET
            applied_at = excluded.applied_at,
            success = excluded.success,
            error = excluded.error",
        &params![
            m.id,
            m.number().map(|n| n as i64).unwrap_or(-1),
            m.description,
            m.version,
            db::now(),
            if success { 1i64 } else { 0i64 },
            error
        ],
    )?;
    Ok(())
}

/// Apply every pending migration in the configured band, in order.
///
/// Each migration and its tracking row commit together. The first failure
/// rolls that migration back, records a failure row and stops the batch;
/// a later run retries it.
pub fn run_pending(
    db: &dyn Database,
    migrations: &[Migration],
    options: &RunOptions,
) -> Result<RunReport, MigrationError> {
    super::validate(migrations)?;
    ensure_tracking_table(db)?;

    let done: Vec<String> = applied(db)?
        .into_iter()
        .filter(AppliedMigration::succeeded)
        .map(|a| a.id)
        .collect();

    let selected = filter_by_package(migrations, &options.range);
    let mut report = RunReport {
        total: selected.len(),
        ..Default::default()
    };

    log::info!(
        "[migrate] {} migrations in range {}-{} ({} backend)",
        selected.len(),
        options.range.start(),
        options.range.end(),
        db.kind().as_str()
    );

    for m in selected {
        if done.iter().any(|id| id == m.id) {
            report.already_applied += 1;
            continue;
        }
        if m.manual_only && !options.run_manual {
            log::info!("[migrate] Skipping manual migration {}", m.id);
            report.skipped_manual.push(m.id.to_string());
            continue;
        }

        log::info!("[migrate] Running {}: {}", m.id, m.description);
        let result = db::with_transaction(db, |tx| {
            (m.up)(tx)?;
            record(tx, m, true, None)
        });

        if let Err(e) = result {
            let reason = e.to_string();
            log::error!("[migrate] {} failed: {}", m.id, reason);
            if let Err(re) = record(db, m, false, Some(&reason)) {
                log::error!("[migrate] Could not record failure of {}: {}", m.id, re);
            }
            return Err(MigrationError::Failed {
                id: m.id.to_string(),
                reason,
            });
        }
        report.ran.push(m.id.to_string());
    }

    if report.ran.is_empty() {
        log::info!("[migrate] Schema is up to date");
    } else {
        log::info!("[migrate] Applied {} migration(s)", report.ran.len());
    }
    Ok(report)
}

pub fn status(db: &dyn Database, migrations: &[Migration]) -> Result<MigrationStatus, MigrationError> {
    let rows = applied(db)?;
    let ok = |id: &str| rows.iter().any(|r| r.id == id && r.succeeded());

    let completed: Vec<&Migration> = migrations.iter().filter(|m| ok(m.id)).collect();
    Ok(MigrationStatus {
        total: migrations.len(),
        completed: completed.len(),
        pending: migrations
            .iter()
            .filter(|m| !ok(m.id))
            .map(|m| m.id.to_string())
            .collect(),
        failed: rows
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.id.clone())
            .collect(),
        last_applied: completed.last().map(|m| m.id.to_string()),
    })
}

/// Successful tracking rows, newest first.
fn applied_newest_first(db: &dyn Database) -> DbResult<Vec<AppliedMigration>> {
    let mut rows: Vec<AppliedMigration> = applied(db)?
        .into_iter()
        .filter(AppliedMigration::succeeded)
        .collect();
    rows.reverse();
    Ok(rows)
}

/// Ids that `rollback(count)` would touch, newest first.
pub fn plan_rollback(db: &dyn Database, count: usize) -> DbResult<Vec<String>> {
    Ok(applied_newest_first(db)?
        .into_iter()
        .take(count)
        .map(|r| r.id)
        .collect())
}

/// Resolve `020`, `20` or `020_project_images` to an applied migration id.
fn resolve_target(rows: &[AppliedMigration], target: &str) -> Option<String> {
    let target = target.trim();
    if let Some(row) = rows.iter().find(|r| r.id == target) {
        return Some(row.id.clone());
    }
    let is_number = !target.is_empty() && target.chars().all(|c| c.is_ascii_digit());
    if !is_number {
        return None;
    }
    let n = migration_number(target)?;
    rows.iter()
        .find(|r| r.number == n as i64)
        .map(|r| r.id.clone())
}

/// Ids that `rollback_to(target)` would touch, newest first.
pub fn plan_rollback_to(db: &dyn Database, target: &str) -> Result<Vec<String>, MigrationError> {
    let rows = applied_newest_first(db)?;
    let target_id =
        resolve_target(&rows, target).ok_or_else(|| MigrationError::NotApplied(target.to_string()))?;
    Ok(rows
        .into_iter()
        .take_while(|r| r.id != target_id)
        .map(|r| r.id)
        .collect())
}

fn rollback_ids(
    db: &dyn Database,
    migrations: &[Migration],
    ids: Vec<String>,
) -> Result<RollbackReport, MigrationError> {
    let mut report = RollbackReport::default();

    for id in ids {
        let Some(m) = migrations.iter().find(|m| m.id == id) else {
            log::warn!("[migrate] {} is not in the registry, skipping", id);
            report.skipped.push(id);
            continue;
        };
        let Some(down) = m.down else {
            log::warn!("[migrate] {} is not reversible, skipping", id);
            report.skipped.push(id);
            continue;
        };

        log::info!("[migrate] Rolling back {}", id);
        let result = db::with_transaction(db, |tx| {
            down(tx)?;
            tx.run("DELETE FROM schema_migrations WHERE id = ?", &params![m.id])?;
            Ok::<(), crate::db::DbError>(())
        });
        if let Err(e) = result {
            log::error!("[migrate] Rollback of {} failed: {}", id, e);
            return Err(MigrationError::RollbackFailed {
                id,
                reason: e.to_string(),
            });
        }
        report.rolled_back.push(id);
    }

    log::info!(
        "[migrate] Rolled back {}, skipped {}",
        report.rolled_back.len(),
        report.skipped.len()
    );
    Ok(report)
}

/// Undo the last `count` applied migrations, newest first. Irreversible
/// and unknown migrations count toward `count` but are left in place.
pub fn rollback(
    db: &dyn Database,
    migrations: &[Migration],
    count: usize,
) -> Result<RollbackReport, MigrationError> {
    let ids = plan_rollback(db, count)?;
    rollback_ids(db, migrations, ids)
}

/// Undo everything applied after `target`; `target` itself stays applied.
pub fn rollback_to(
    db: &dyn Database,
    migrations: &[Migration],
    target: &str,
) -> Result<RollbackReport, MigrationError> {
    let ids = plan_rollback_to(db, target)?;
    rollback_ids(db, migrations, ids)
}

/// Whether `table` has a column named `column`, on either back end.
pub fn column_exists(db: &dyn Database, table: &str, column: &str) -> DbResult<bool> {
    match db.kind() {
        db::DbKind::Sqlite => Ok(db
            .all(&format!("PRAGMA table_info({})", table), &[])?
            .iter()
            .any(|r| r.get("name").and_then(Value::as_str) == Some(column))),
        db::DbKind::Postgres => Ok(db
            .get(
                "SELECT 1 AS present FROM information_schema.columns
                 WHERE table_schema = current_schema() AND table_name = ? AND column_name = ?",
                &params![table, column],
            )?
            .is_some()),
    }
}
