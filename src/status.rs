//! Status bit-mapping.
//!
//! Entities used to carry an integer `status_id` pointing into a shared
//! status table. They now carry `status_val`, a 16-bit flag value whose
//! bytes are the on-disk encoding. The table below is the complete mapping
//! between the two.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Encoded entity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusVal(pub u16);

struct StatusEntry {
    legacy_id: i64,
    value: u16,
    name: &'static str,
    scope: &'static str,
}

const STATUS_TABLE: &[StatusEntry] = &[
    StatusEntry { legacy_id: 1, value: 0x0000, name: "new", scope: "events" },
    StatusEntry { legacy_id: 2, value: 0x0001, name: "demo", scope: "events" },
    StatusEntry { legacy_id: 3, value: 0x0002, name: "progress", scope: "events" },
    StatusEntry { legacy_id: 5, value: 0x0003, name: "publish", scope: "events" },
    StatusEntry { legacy_id: 6, value: 0x0004, name: "released", scope: "events" },
    StatusEntry { legacy_id: 67, value: 0x0005, name: "final", scope: "tasks" },
    StatusEntry { legacy_id: 8, value: 0x0006, name: "confirmed", scope: "events" },
    StatusEntry { legacy_id: 9, value: 0x0008, name: "running", scope: "events" },
    StatusEntry { legacy_id: 10, value: 0x0009, name: "passed", scope: "events" },
    StatusEntry { legacy_id: 11, value: 0x000c, name: "documented", scope: "events" },
    StatusEntry { legacy_id: 12, value: 0x0010, name: "trash", scope: "events" },
    StatusEntry { legacy_id: 13, value: 0x0020, name: "archived", scope: "events" },
    StatusEntry { legacy_id: 14, value: 0x0030, name: "linked", scope: "events" },
];

/// One row of the status registry as exposed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusInfo {
    pub value: StatusVal,
    pub hex: String,
    pub name: &'static str,
    pub legacy_id: i64,
    pub scope: &'static str,
}

impl StatusVal {
    pub const NEW: StatusVal = StatusVal(0x0000);

    fn entry(self) -> Option<&'static StatusEntry> {
        STATUS_TABLE.iter().find(|e| e.value == self.0)
    }

    pub fn from_legacy_id(id: i64) -> Option<StatusVal> {
        STATUS_TABLE
            .iter()
            .find(|e| e.legacy_id == id)
            .map(|e| StatusVal(e.value))
    }

    pub fn legacy_id(self) -> Option<i64> {
        self.entry().map(|e| e.legacy_id)
    }

    pub fn name(self) -> Option<&'static str> {
        self.entry().map(|e| e.name)
    }

    pub fn from_name(name: &str) -> Option<StatusVal> {
        STATUS_TABLE
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name.trim()))
            .map(|e| StatusVal(e.value))
    }

    /// Big-endian byte encoding, as stored in the old BYTEA columns.
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<StatusVal> {
        match bytes {
            [hi, lo] => Some(StatusVal(u16::from_be_bytes([*hi, *lo]))),
            [lo] => Some(StatusVal(*lo as u16)),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(s: &str) -> Option<StatusVal> {
        let bytes = hex::decode(s.trim().trim_start_matches("\\x")).ok()?;
        StatusVal::from_bytes(&bytes)
    }

    /// Whether the value is one of the registered statuses.
    pub fn is_known(self) -> bool {
        self.entry().is_some()
    }

    pub fn info(self) -> Option<StatusInfo> {
        self.entry().map(|e| StatusInfo {
            value: self,
            hex: self.to_hex(),
            name: e.name,
            legacy_id: e.legacy_id,
            scope: e.scope,
        })
    }
}

impl fmt::Display for StatusVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "0x{:04x}", self.0),
        }
    }
}

impl From<StatusVal> for i64 {
    fn from(v: StatusVal) -> i64 {
        v.0 as i64
    }
}

impl From<StatusVal> for crate::db::SqlValue {
    fn from(v: StatusVal) -> Self {
        crate::db::SqlValue::Integer(v.0 as i64)
    }
}

/// True when `value` (an entity's `status_val`) decodes to `name`.
pub fn has_status(value: Option<i64>, name: &str) -> bool {
    value
        .and_then(|v| u16::try_from(v).ok())
        .and_then(|v| StatusVal(v).name())
        .map(|n| n.eq_ignore_ascii_case(name))
        .unwrap_or(false)
}

/// Every registered status in ascending value order.
pub fn all() -> Vec<StatusInfo> {
    let mut out: Vec<StatusInfo> = STATUS_TABLE
        .iter()
        .filter_map(|e| StatusVal(e.value).info())
        .collect();
    out.sort_by_key(|s| s.value);
    out
}
