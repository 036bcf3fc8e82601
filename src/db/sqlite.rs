use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, ToSql};
use serde_json::Value;

use super::{Database, DbError, DbKind, DbResult, Row, RunResult, SqlValue};

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Embedded back end over an r2d2 pool of rusqlite connections.
pub struct SqliteDb {
    pool: SqlitePool,
}

impl SqliteDb {
    pub fn open(path: &Path, pool_size: u32) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|c| c.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;"));
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| DbError::Pool(e.to_string()))?;

        // WAL for concurrent readers
        let conn = pool.get().map_err(|e| DbError::Pool(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(map_err)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> DbResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| DbError::Pool(e.to_string()))
    }
}

impl Database for SqliteDb {
    fn kind(&self) -> DbKind {
        DbKind::Sqlite
    }

    fn exec(&self, sql: &str) -> DbResult<()> {
        exec(&*self.conn()?, sql)
    }

    fn run(&self, sql: &str, params: &[SqlValue]) -> DbResult<RunResult> {
        run(&*self.conn()?, sql, params)
    }

    fn get(&self, sql: &str, params: &[SqlValue]) -> DbResult<Option<Row>> {
        Ok(query(&*self.conn()?, sql, params)?.into_iter().next())
    }

    fn all(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        query(&*self.conn()?, sql, params)
    }

    fn transaction(&self, f: &mut dyn FnMut(&dyn Database) -> DbResult<()>) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(map_err)?;
        let result = f(&SqliteTx { conn: &tx });
        match result {
            Ok(()) => tx.commit().map_err(map_err),
            Err(e) => {
                if let Err(rb) = tx.rollback() {
                    log::error!("[db] Rollback failed: {}", rb);
                }
                Err(e)
            }
        }
    }
}

/// Handle bound to the connection of an open transaction.
struct SqliteTx<'c> {
    conn: &'c Connection,
}

impl Database for SqliteTx<'_> {
    fn kind(&self) -> DbKind {
        DbKind::Sqlite
    }

    fn exec(&self, sql: &str) -> DbResult<()> {
        exec(self.conn, sql)
    }

    fn run(&self, sql: &str, params: &[SqlValue]) -> DbResult<RunResult> {
        run(self.conn, sql, params)
    }

    fn get(&self, sql: &str, params: &[SqlValue]) -> DbResult<Option<Row>> {
        Ok(query(self.conn, sql, params)?.into_iter().next())
    }

    fn all(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        query(self.conn, sql, params)
    }

    fn transaction(&self, f: &mut dyn FnMut(&dyn Database) -> DbResult<()>) -> DbResult<()> {
        f(self)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Bool(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v as i64)),
        })
    }
}

fn map_err(e: rusqlite::Error) -> DbError {
    match &e {
        rusqlite::Error::SqliteFailure(code, _) if code.code == ErrorCode::ConstraintViolation => {
            let msg = e.to_string();
            if msg.contains("UNIQUE") {
                DbError::Conflict(msg)
            } else {
                DbError::Query(msg)
            }
        }
        _ => DbError::Query(e.to_string()),
    }
}

fn exec(conn: &Connection, sql: &str) -> DbResult<()> {
    conn.execute_batch(sql).map_err(map_err)
}

fn run(conn: &Connection, sql: &str, params: &[SqlValue]) -> DbResult<RunResult> {
    if has_returning(sql) {
        let rows = query(conn, sql, params)?;
        let last_id = rows
            .first()
            .and_then(|r| r.get("id"))
            .and_then(Value::as_i64);
        return Ok(RunResult {
            changes: rows.len() as u64,
            last_id,
        });
    }
    let changes = conn
        .execute(sql, rusqlite::params_from_iter(params.iter()))
        .map_err(map_err)?;
    Ok(RunResult {
        changes: changes as u64,
        last_id: None,
    })
}

fn query(conn: &Connection, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
    let mut stmt = conn.prepare(sql).map_err(map_err)?;
    let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(map_err)?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(map_err)? {
        let mut map = Row::new();
        for (i, name) in names.iter().enumerate() {
            let value = match row.get_ref(i).map_err(map_err)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::from(v),
                ValueRef::Real(v) => Value::from(v),
                ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(b) => Value::String(hex::encode(b)),
            };
            map.insert(name.clone(), value);
        }
        out.push(map);
    }
    Ok(out)
}

pub(super) fn has_returning(sql: &str) -> bool {
    sql.to_ascii_uppercase().contains("RETURNING")
}
