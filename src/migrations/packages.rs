//! Package bands used to stage schema rollouts.
//!
//! Each package letter covers a fixed range of migration numbers. A
//! deployment picks a start and end package and only migrations whose
//! number falls inside the combined range are considered.

use std::ops::RangeInclusive;

use super::{Migration, MigrationError};

/// (code, first number, last number, label)
pub const PACKAGES: &[(char, u32, u32, &str)] = &[
    ('A', 0, 18, "setup"),
    ('B', 19, 20, "core schema"),
    ('C', 22, 29, "alpha"),
    ('D', 30, 39, "beta"),
    ('E', 40, 999, "final"),
];

fn lookup(code: &str) -> Option<(usize, u32, u32)> {
    let code = code.trim().to_ascii_uppercase();
    let mut chars = code.chars();
    let c = chars.next()?;
    if chars.next().is_some() {
        return None;
    }
    PACKAGES
        .iter()
        .enumerate()
        .find(|(_, p)| p.0 == c)
        .map(|(i, p)| (i, p.1, p.2))
}

/// Inclusive number range from the start of `start` to the end of `end`.
/// Missing codes default to `A` and `E`.
pub fn package_range(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<RangeInclusive<u32>, MigrationError> {
    let start = start.filter(|s| !s.trim().is_empty()).unwrap_or("A");
    let end = end.filter(|s| !s.trim().is_empty()).unwrap_or("E");

    let invalid = || MigrationError::InvalidPackageRange {
        start: start.to_string(),
        end: end.to_string(),
    };
    let (si, first, _) = lookup(start).ok_or_else(invalid)?;
    let (ei, _, last) = lookup(end).ok_or_else(invalid)?;
    if si > ei {
        return Err(invalid());
    }
    Ok(first..=last)
}

/// Leading decimal digits of a migration id (`"027_migrate_status"` → 27).
pub fn migration_number(id: &str) -> Option<u32> {
    let digits: String = id
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Which package a migration number belongs to, if any. 21 sits between
/// bands and belongs to none.
pub fn package_of(number: u32) -> Option<char> {
    PACKAGES
        .iter()
        .find(|p| (p.1..=p.2).contains(&number))
        .map(|p| p.0)
}

/// Keep the migrations whose number lies inside `range`. Ids without a
/// number are always kept.
pub fn filter_by_package<'a>(
    migrations: &'a [Migration],
    range: &RangeInclusive<u32>,
) -> Vec<&'a Migration> {
    migrations
        .iter()
        .filter(|m| match migration_number(m.id) {
            Some(n) => range.contains(&n),
            None => true,
        })
        .collect()
}
