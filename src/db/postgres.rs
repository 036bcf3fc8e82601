use std::cell::RefCell;
use std::error::Error;

use bytes::BytesMut;
use postgres::error::SqlState;
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::{GenericClient, NoTls};
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use serde_json::Value;

use super::{Database, DbError, DbKind, DbResult, Row, RunResult, SqlValue};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Client/server back end over an r2d2 pool of synchronous postgres clients.
pub struct PgDb {
    pool: PgPool,
}

impl PgDb {
    pub fn connect(url: &str, pool_size: u32) -> DbResult<Self> {
        let config: postgres::Config = url
            .parse()
            .map_err(|e: postgres::Error| DbError::Pool(e.to_string()))?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| DbError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    fn client(&self) -> DbResult<r2d2::PooledConnection<PostgresConnectionManager<NoTls>>> {
        self.pool.get().map_err(|e| DbError::Pool(e.to_string()))
    }
}

impl Database for PgDb {
    fn kind(&self) -> DbKind {
        DbKind::Postgres
    }

    fn exec(&self, sql: &str) -> DbResult<()> {
        self.client()?.batch_execute(sql).map_err(map_err)
    }

    fn run(&self, sql: &str, params: &[SqlValue]) -> DbResult<RunResult> {
        run(&mut *self.client()?, sql, params)
    }

    fn get(&self, sql: &str, params: &[SqlValue]) -> DbResult<Option<Row>> {
        Ok(query(&mut *self.client()?, sql, params)?.into_iter().next())
    }

    fn all(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        query(&mut *self.client()?, sql, params)
    }

    fn transaction(&self, f: &mut dyn FnMut(&dyn Database) -> DbResult<()>) -> DbResult<()> {
        let mut client = self.client()?;
        let tx = client.transaction().map_err(map_err)?;
        let handle = PgTx {
            tx: RefCell::new(tx),
        };
        let result = f(&handle);
        let tx = handle.tx.into_inner();
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

/// Handle bound to an open transaction. The postgres client API needs
/// `&mut`, the adapter trait hands out `&self`.
struct PgTx<'c> {
    tx: RefCell<postgres::Transaction<'c>>,
}

impl Database for PgTx<'_> {
    fn kind(&self) -> DbKind {
        DbKind::Postgres
    }

    fn exec(&self, sql: &str) -> DbResult<()> {
        self.tx.borrow_mut().batch_execute(sql).map_err(map_err)
    }

    fn run(&self, sql: &str, params: &[SqlValue]) -> DbResult<RunResult> {
        run(&mut *self.tx.borrow_mut(), sql, params)
    }

    fn get(&self, sql: &str, params: &[SqlValue]) -> DbResult<Option<Row>> {
        Ok(query(&mut *self.tx.borrow_mut(), sql, params)?
            .into_iter()
            .next())
    }

    fn all(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        query(&mut *self.tx.borrow_mut(), sql, params)
    }

    fn transaction(&self, f: &mut dyn FnMut(&dyn Database) -> DbResult<()>) -> DbResult<()> {
        f(self)
    }
}

fn map_err(e: postgres::Error) -> DbError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        return DbError::Conflict(e.to_string());
    }
    match e.as_db_error() {
        Some(db) => DbError::Query(format!("{}: {}", db.code().code(), db.message())),
        None => DbError::Query(e.to_string()),
    }
}

fn bind(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn run<C: GenericClient>(client: &mut C, sql: &str, params: &[SqlValue]) -> DbResult<RunResult> {
    let sql = rewrite_placeholders(sql);
    if super::sqlite::has_returning(&sql) {
        let rows = client.query(sql.as_str(), &bind(params)).map_err(map_err)?;
        let last_id = rows.first().and_then(|r| read_id(r));
        return Ok(RunResult {
            changes: rows.len() as u64,
            last_id,
        });
    }
    let changes = client.execute(sql.as_str(), &bind(params)).map_err(map_err)?;
    Ok(RunResult {
        changes,
        last_id: None,
    })
}

fn read_id(row: &postgres::Row) -> Option<i64> {
    let idx = row.columns().iter().position(|c| c.name() == "id")?;
    match *row.columns()[idx].type_() {
        Type::INT2 => row.try_get::<_, i16>(idx).ok().map(i64::from),
        Type::INT4 => row.try_get::<_, i32>(idx).ok().map(i64::from),
        Type::INT8 => row.try_get::<_, i64>(idx).ok(),
        _ => None,
    }
}

fn query<C: GenericClient>(client: &mut C, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
    let sql = rewrite_placeholders(sql);
    let rows = client.query(sql.as_str(), &bind(params)).map_err(map_err)?;
    rows.iter().map(row_to_json).collect()
}

fn row_to_json(row: &postgres::Row) -> DbResult<Row> {
    let mut map = Row::new();
    for (i, col) in row.columns().iter().enumerate() {
        let value = column_value(row, i, col.type_())
            .map_err(|e| DbError::Decode(format!("column {}: {}", col.name(), e)))?;
        map.insert(col.name().to_string(), value);
    }
    Ok(map)
}

fn column_value(row: &postgres::Row, i: usize, ty: &Type) -> Result<Value, postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(i)?.map(Value::from),
        Type::INT2 => row.try_get::<_, Option<i16>>(i)?.map(Value::from),
        Type::INT4 => row.try_get::<_, Option<i32>>(i)?.map(Value::from),
        Type::INT8 => row.try_get::<_, Option<i64>>(i)?.map(Value::from),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(i)?.map(|v| Value::from(v as f64)),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(i)?.map(Value::from),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(i)?,
        Type::TIMESTAMP => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(i)?
            .map(|t| Value::String(t.format("%Y-%m-%dT%H:%M:%S").to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)?
            .map(|t| Value::String(t.to_rfc3339())),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(i)?
            .map(|b| Value::String(hex::encode(b))),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.try_get::<_, Option<String>>(i)?.map(Value::String)
        }
        _ => {
            log::debug!("[db] Unsupported column type {} read as null", ty);
            None
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Rewrite `?` placeholders to `$1, $2, …`, leaving quoted literals,
/// quoted identifiers and comments untouched.
pub fn rewrite_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut chars = sql.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
            }
            '-' if !in_single && !in_double && chars.peek() == Some(&'-') => {
                // line comment runs to end of line
                out.push(c);
                for c in chars.by_ref() {
                    out.push(c);
                    if c == '\n' {
                        break;
                    }
                }
            }
            '?' if !in_single && !in_double => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            _ => out.push(c),
        }
    }
    out
}

impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Integer(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                Type::BOOL => (*v != 0).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().to_sql(ty, out),
                Type::JSON | Type::JSONB => Value::from(*v).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            SqlValue::Real(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().to_sql(ty, out),
                Type::JSON | Type::JSONB => Value::from(*v).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            SqlValue::Bool(b) => match *ty {
                Type::INT2 => (*b as i16).to_sql(ty, out),
                Type::INT4 => (*b as i32).to_sql(ty, out),
                Type::INT8 => (*b as i64).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => b.to_string().to_sql(ty, out),
                _ => b.to_sql(ty, out),
            },
            SqlValue::Text(s) => match *ty {
                Type::INT2 => s.trim().parse::<i16>()?.to_sql(ty, out),
                Type::INT4 => s.trim().parse::<i32>()?.to_sql(ty, out),
                Type::INT8 => s.trim().parse::<i64>()?.to_sql(ty, out),
                Type::FLOAT4 => s.trim().parse::<f32>()?.to_sql(ty, out),
                Type::FLOAT8 => s.trim().parse::<f64>()?.to_sql(ty, out),
                Type::BOOL => matches!(s.as_str(), "true" | "1" | "t").to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::from_str::<Value>(s)?.to_sql(ty, out),
                _ => s.as_str().to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
