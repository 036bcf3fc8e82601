use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::config::DatabaseConfig;

pub mod postgres;
pub mod sqlite;

/// A result row: column name → JSON value, in select order.
pub type Row = Map<String, Value>;

pub type DbResult<T> = Result<T, DbError>;

/// Handle shared through Rocket managed state and the CLI.
pub type SharedDb = Arc<dyn Database + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("could not decode row: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

impl DbKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbKind::Sqlite => "sqlite",
            DbKind::Postgres => "postgresql",
        }
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunResult {
    pub changes: u64,
    /// `id` of the first returned row for statements with a `RETURNING` clause.
    pub last_id: Option<i64>,
}

/// Bind parameter accepted by both back ends.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<u16> for SqlValue {
    fn from(v: u16) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

impl SqlValue {
    /// Convert a JSON body value into a bind parameter. Objects and arrays are
    /// stored as JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

/// `params![a, b, c]` → `Vec<SqlValue>`.
#[macro_export]
macro_rules! params {
    () => { Vec::<$crate::db::SqlValue>::new() };
    ($($v:expr),+ $(,)?) => { vec![$($crate::db::SqlValue::from($v)),+] };
}

/// Uniform access to either back end. SQL is written with `?` placeholders.
pub trait Database {
    fn kind(&self) -> DbKind;

    /// Run a batch of statements without parameters.
    fn exec(&self, sql: &str) -> DbResult<()>;

    fn run(&self, sql: &str, params: &[SqlValue]) -> DbResult<RunResult>;

    fn get(&self, sql: &str, params: &[SqlValue]) -> DbResult<Option<Row>>;

    fn all(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>>;

    /// Run `f` on a single connection inside `BEGIN … COMMIT`. Any `Err`
    /// from `f` (or from commit) rolls the transaction back.
    /// Calling this on a transaction-bound handle joins the open transaction.
    fn transaction(&self, f: &mut dyn FnMut(&dyn Database) -> DbResult<()>) -> DbResult<()>;
}

/// Typed wrapper around [`Database::transaction`].
pub fn with_transaction<T, E, F>(db: &dyn Database, f: F) -> Result<T, E>
where
    F: FnOnce(&dyn Database) -> Result<T, E>,
    E: From<DbError>,
{
    let mut f = Some(f);
    let mut outcome: Option<Result<T, E>> = None;
    let tx_result = db.transaction(&mut |tx| {
        let Some(f) = f.take() else {
            return Ok(());
        };
        match f(tx) {
            Ok(v) => {
                outcome = Some(Ok(v));
                Ok(())
            }
            Err(e) => {
                outcome = Some(Err(e));
                Err(DbError::Query("transaction aborted".to_string()))
            }
        }
    });
    match (outcome, tx_result) {
        (Some(Err(e)), _) => Err(e),
        (_, Err(e)) => Err(e.into()),
        (Some(Ok(v)), Ok(())) => Ok(v),
        (None, Ok(())) => Err(DbError::Query("transaction body did not run".to_string()).into()),
    }
}

pub fn from_row<T: DeserializeOwned>(row: Row) -> DbResult<T> {
    serde_json::from_value(Value::Object(row)).map_err(|e| DbError::Decode(e.to_string()))
}

pub fn fetch_one<T: DeserializeOwned>(
    db: &dyn Database,
    sql: &str,
    params: &[SqlValue],
) -> DbResult<Option<T>> {
    db.get(sql, params)?.map(from_row).transpose()
}

pub fn fetch_all<T: DeserializeOwned>(
    db: &dyn Database,
    sql: &str,
    params: &[SqlValue],
) -> DbResult<Vec<T>> {
    db.all(sql, params)?.into_iter().map(from_row).collect()
}

/// Single integer column of the first row (`COUNT(*)`, `SELECT id …`).
pub fn scalar_i64(db: &dyn Database, sql: &str, params: &[SqlValue]) -> DbResult<Option<i64>> {
    Ok(db
        .get(sql, params)?
        .and_then(|row| row.values().next().and_then(Value::as_i64)))
}

/// Open the configured back end.
pub fn open(config: &DatabaseConfig, pool_size: u32) -> DbResult<SharedDb> {
    match config {
        DatabaseConfig::Sqlite { path } => {
            let db = sqlite::SqliteDb::open(path, pool_size)?;
            log::info!("[db] Connected to SQLite database at {}", path.display());
            Ok(Arc::new(db))
        }
        DatabaseConfig::Postgres { url } => {
            let db = postgres::PgDb::connect(url, pool_size)?;
            log::info!("[db] Connected to PostgreSQL database");
            Ok(Arc::new(db))
        }
    }
}

/// Current UTC time as stored in TEXT timestamp columns.
pub fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
