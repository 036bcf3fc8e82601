pub mod event;
pub mod image;
pub mod page;
pub mod project;
pub mod session;
pub mod status;
pub mod task;
pub mod user;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::db::{self, Database, DbResult, SqlValue};

/// Column assignments for a partial `UPDATE … WHERE id = ?`.
#[derive(Debug, Default)]
pub struct Changes {
    sets: Vec<String>,
    params: Vec<SqlValue>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, column: &str, value: impl Into<SqlValue>) -> &mut Self {
        self.sets.push(format!("{} = ?", column));
        self.params.push(value.into());
        self
    }

    /// Assignment without a bound value, e.g. `completed_at = NULL`.
    pub fn set_raw(&mut self, assignment: &str) -> &mut Self {
        self.sets.push(assignment.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn columns(&self) -> Vec<&str> {
        self.sets
            .iter()
            .filter_map(|s| s.split_whitespace().next())
            .collect()
    }

    /// Apply to row `id` of `table`, stamping `updated_at`. Returns the number
    /// of rows changed.
    pub fn apply(mut self, db: &dyn Database, table: &str, id: i64) -> DbResult<u64> {
        self.sets.push("updated_at = ?".to_string());
        self.params.push(db::now().into());
        self.params.push(id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", table, self.sets.join(", "));
        Ok(db.run(&sql, &self.params)?.changes)
    }
}

/// Integer 0/1 columns as `bool`.
pub fn int_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.as_str(), "1" | "true" | "t"),
        _ => false,
    })
}

/// JSON stored as TEXT, decoded back into a value. Unparsable text stays a string.
pub fn json_text<'de, D: Deserializer<'de>>(d: D) -> Result<Value, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Value::Null => Value::Object(Default::default()),
        other => other,
    })
}
