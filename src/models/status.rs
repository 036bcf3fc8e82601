use serde::{Deserialize, Serialize};

use crate::db::{self, Database, DbResult};
use crate::status;

/// Row of the `status` registry table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatusRow {
    pub value: i64,
    pub name: String,
    pub hex: String,
    pub legacy_id: i64,
    pub scope: String,
}

impl StatusRow {
    pub fn list_all(db: &dyn Database) -> DbResult<Vec<StatusRow>> {
        db::fetch_all(
            db,
            "SELECT value, name, hex, legacy_id, scope FROM status ORDER BY value ASC",
            &[],
        )
    }

    /// Entries compiled into the binary, for databases that predate the registry table.
    pub fn builtin() -> Vec<StatusRow> {
        status::all()
            .into_iter()
            .map(|s| StatusRow {
                value: s.value.0 as i64,
                name: s.name.to_string(),
                hex: s.hex,
                legacy_id: s.legacy_id,
                scope: s.scope.to_string(),
            })
            .collect()
    }
}
