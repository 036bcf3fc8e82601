use serde_json::Value;

use super::runner::column_exists;
use super::Migration;
use crate::db::{Database, DbKind, DbResult};
use crate::params;
use crate::status::{self, StatusVal};
use crate::xmlid;

/// Column types that differ between SQLite and PostgreSQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect(pub DbKind);

impl Dialect {
    pub fn of(db: &dyn Database) -> Self {
        Dialect(db.kind())
    }

    pub fn primary_key(&self) -> &'static str {
        match self.0 {
            DbKind::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            DbKind::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }

    pub fn integer(&self) -> &'static str {
        match self.0 {
            DbKind::Sqlite => "INTEGER",
            DbKind::Postgres => "BIGINT",
        }
    }
}

/// Tables that carried a legacy `status_id` and now carry `status_val`.
const STATUS_TABLES: &[&str] = &["users", "projects", "events", "images"];

pub fn all() -> Vec<Migration> {
    vec![
        Migration {
            id: "000_base_schema",
            description: "Users, projects, events and tasks",
            version: "0.1.0",
            date: "2024-10-01",
            manual_only: false,
            up: base_schema_up,
            down: None,
        },
        Migration {
            id: "001_sessions",
            description: "Server-side login sessions",
            version: "0.1.0",
            date: "2024-10-01",
            manual_only: false,
            up: sessions_up,
            down: Some(sessions_down),
        },
        Migration {
            id: "013_pages",
            description: "Per-project page configuration",
            version: "0.2.0",
            date: "2024-11-04",
            manual_only: false,
            up: pages_up,
            down: Some(pages_down),
        },
        Migration {
            id: "017_project_members",
            description: "Project membership and roles",
            version: "0.2.0",
            date: "2024-11-12",
            manual_only: false,
            up: project_members_up,
            down: Some(project_members_down),
        },
        Migration {
            id: "019_images_xmlid",
            description: "Image records addressed by xmlid",
            version: "0.3.0",
            date: "2024-12-02",
            manual_only: false,
            up: images_up,
            down: Some(images_down),
        },
        Migration {
            id: "022_status_registry",
            description: "Status registry seeded from the status bit table",
            version: "0.4.0",
            date: "2025-01-13",
            manual_only: false,
            up: status_registry_up,
            down: Some(status_registry_down),
        },
        Migration {
            id: "023_seed_demo_data",
            description: "Demo project with sample events",
            version: "0.4.0",
            date: "2025-01-14",
            manual_only: true,
            up: demo_data_up,
            down: Some(demo_data_down),
        },
        Migration {
            id: "027_migrate_status_data",
            description: "Add status_val and convert legacy status ids",
            version: "0.5.0",
            date: "2025-02-10",
            manual_only: false,
            up: status_data_up,
            down: Some(status_data_down),
        },
        Migration {
            id: "030_drop_legacy_status_columns",
            description: "Drop status_id columns",
            version: "0.6.0",
            date: "2025-03-03",
            manual_only: false,
            up: drop_legacy_status_up,
            down: None,
        },
        Migration {
            id: "040_image_blurhash",
            description: "Blurhash placeholder column for images",
            version: "1.0.0",
            date: "2025-04-22",
            manual_only: false,
            up: image_blurhash_up,
            down: Some(image_blurhash_down),
        },
        Migration {
            id: "069_xmlid_format",
            description: "Rewrite legacy dotted xmlids to domaincode.entity__slug",
            version: "1.2.0",
            date: "2025-09-15",
            manual_only: false,
            up: xmlid_format_up,
            down: None,
        },
    ]
}

// ── 000 ──

fn base_schema_up(db: &dyn Database) -> DbResult<()> {
    let d = Dialect::of(db);
    let pk = d.primary_key();
    let int = d.integer();
    db.exec(&format!(
        "CREATE TABLE IF NOT EXISTS users (
            id {pk},
            sysmail TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
            partner_id {int},
            img_id {int},
            status_id {int} DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS projects (
            id {pk},
            domaincode TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            owner_id {int} REFERENCES users(id) ON DELETE SET NULL,
            heading TEXT,
            description TEXT,
            teaser TEXT,
            theme {int},
            config TEXT,
            status_id {int} DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS events (
            id {pk},
            xmlid TEXT UNIQUE,
            name TEXT NOT NULL,
            project_id {int} REFERENCES projects(id) ON DELETE CASCADE,
            event_type TEXT NOT NULL DEFAULT 'workshop',
            isbase INTEGER NOT NULL DEFAULT 0,
            date_begin TEXT,
            date_end TEXT,
            teaser TEXT,
            description TEXT,
            cimg TEXT,
            creator_id {int} REFERENCES users(id) ON DELETE SET NULL,
            status_id {int} DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_project ON events(project_id);
        CREATE TABLE IF NOT EXISTS tasks (
            id {pk},
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'todo'
                CHECK (status IN ('todo', 'in-progress', 'done', 'archived')),
            priority TEXT NOT NULL DEFAULT 'medium'
                CHECK (priority IN ('low', 'medium', 'high', 'urgent')),
            record_type TEXT,
            record_id TEXT,
            assigned_to {int} REFERENCES users(id) ON DELETE SET NULL,
            due_date TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_record ON tasks(record_type, record_id);"
    ))
}

// ── 001 ──

fn sessions_up(db: &dyn Database) -> DbResult<()> {
    let int = Dialect::of(db).integer();
    db.exec(&format!(
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id {int} NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            active_project_id {int} REFERENCES projects(id) ON DELETE SET NULL,
            ip_address TEXT,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);"
    ))
}

fn sessions_down(db: &dyn Database) -> DbResult<()> {
    db.exec("DROP TABLE IF EXISTS sessions")
}

// ── 013 ──

fn pages_up(db: &dyn Database) -> DbResult<()> {
    let d = Dialect::of(db);
    let (pk, int) = (d.primary_key(), d.integer());
    db.exec(&format!(
        "CREATE TABLE IF NOT EXISTS pages (
            id {pk},
            project {int} NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            page_type TEXT NOT NULL,
            header_type TEXT NOT NULL DEFAULT 'simple',
            header_size TEXT NOT NULL DEFAULT 'mini',
            page_options TEXT NOT NULL DEFAULT '{{}}',
            header_options TEXT NOT NULL DEFAULT '{{}}',
            aside_options TEXT NOT NULL DEFAULT '{{}}',
            footer_options TEXT NOT NULL DEFAULT '{{}}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (project, page_type)
        )"
    ))
}

fn pages_down(db: &dyn Database) -> DbResult<()> {
    db.exec("DROP TABLE IF EXISTS pages")
}

// ── 017 ──

fn project_members_up(db: &dyn Database) -> DbResult<()> {
    let int = Dialect::of(db).integer();
    db.exec(&format!(
        "CREATE TABLE IF NOT EXISTS project_members (
            project_id {int} NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            user_id {int} NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role TEXT NOT NULL DEFAULT 'member',
            added_at TEXT NOT NULL,
            PRIMARY KEY (project_id, user_id)
        )"
    ))
}

fn project_members_down(db: &dyn Database) -> DbResult<()> {
    db.exec("DROP TABLE IF EXISTS project_members")
}

// ── 019 ──

fn images_up(db: &dyn Database) -> DbResult<()> {
    let d = Dialect::of(db);
    let (pk, int) = (d.primary_key(), d.integer());
    db.exec(&format!(
        "CREATE TABLE IF NOT EXISTS images (
            id {pk},
            xmlid TEXT UNIQUE,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            fileformat TEXT NOT NULL DEFAULT 'none',
            mediaformat TEXT,
            alt_text TEXT,
            title TEXT,
            copyright TEXT,
            domaincode TEXT,
            owner_id {int} REFERENCES users(id) ON DELETE SET NULL,
            is_public INTEGER NOT NULL DEFAULT 0,
            width {int},
            height {int},
            status_id {int} DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_images_domaincode ON images(domaincode);"
    ))
}

fn images_down(db: &dyn Database) -> DbResult<()> {
    db.exec("DROP TABLE IF EXISTS images")
}

// ── 022 ──

fn status_registry_up(db: &dyn Database) -> DbResult<()> {
    db.exec(
        "CREATE TABLE IF NOT EXISTS status (
            value INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            hex TEXT NOT NULL,
            legacy_id INTEGER NOT NULL,
            scope TEXT NOT NULL
        )",
    )?;
    for s in status::all() {
        db.run(
            "INSERT INTO status (value, name, hex, legacy_id, scope) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (value) DO NOTHING",
            &params![s.value.0, s.name, s.hex, s.legacy_id, s.scope],
        )?;
    }
    Ok(())
}

fn status_registry_down(db: &dyn Database) -> DbResult<()> {
    db.exec("DROP TABLE IF EXISTS status")
}

// ── 023 (manual) ──

const DEMO_DOMAINCODE: &str = "demo";

fn demo_data_up(db: &dyn Database) -> DbResult<()> {
    let now = crate::db::now();
    let project = db.run(
        "INSERT INTO projects (domaincode, name, heading, teaser, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        &params![
            DEMO_DOMAINCODE,
            "Demo project",
            "Theatre workshops for everyone",
            "A sample project to explore the admin",
            &now,
            &now
        ],
    )?;
    let project_id = project.last_id;

    let events = [
        ("Summer Intensive", "workshop", "2025-07-14", 1i64),
        ("Open Stage Evening", "performance", "2025-08-02", 5),
        ("Improvisation Basics", "course", "2025-09-10", 3),
    ];
    // Manual migrations may run before or after the status columns change.
    let status_column = if column_exists(db, "events", "status_id")? {
        "status_id"
    } else {
        "status_val"
    };
    for (name, event_type, date, legacy_status) in events {
        let slug = xmlid::slugify(name);
        let status = match status_column {
            "status_id" => legacy_status,
            _ => StatusVal::from_legacy_id(legacy_status).unwrap_or(StatusVal::NEW).0 as i64,
        };
        db.run(
            &format!(
                "INSERT INTO events (xmlid, name, project_id, event_type, isbase, date_begin, {status_column}, created_at, updated_at)
                 VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?)"
            ),
            &params![
                format!("{}.event__{}", DEMO_DOMAINCODE, slug),
                name,
                project_id,
                event_type,
                date,
                status,
                &now,
                &now
            ],
        )?;
    }
    Ok(())
}

fn demo_data_down(db: &dyn Database) -> DbResult<()> {
    db.run(
        "DELETE FROM events WHERE project_id IN (SELECT id FROM projects WHERE domaincode = ?)",
        &params![DEMO_DOMAINCODE],
    )?;
    db.run("DELETE FROM projects WHERE domaincode = ?", &params![DEMO_DOMAINCODE])?;
    Ok(())
}

// ── 027 ──

/// `CASE status_id WHEN 1 THEN 0 … ELSE 0 END`, built from the status table.
fn legacy_status_case() -> String {
    let mut sql = String::from("CASE status_id");
    for s in status::all() {
        sql.push_str(&format!(" WHEN {} THEN {}", s.legacy_id, s.value.0));
    }
    sql.push_str(&format!(" ELSE {} END", StatusVal::NEW.0));
    sql
}

fn status_data_up(db: &dyn Database) -> DbResult<()> {
    let int = Dialect::of(db).integer();
    let case = legacy_status_case();
    for table in STATUS_TABLES {
        // status_val survives a rollback past 030, so a re-run may find it.
        if !column_exists(db, table, "status_val")? {
            db.exec(&format!(
                "ALTER TABLE {table} ADD COLUMN status_val {int} NOT NULL DEFAULT 0"
            ))?;
        }
        if !column_exists(db, table, "status_id")? {
            continue;
        }
        let converted = db.run(
            &format!("UPDATE {table} SET status_val = {case} WHERE status_id IS NOT NULL"),
            &[],
        )?;
        if converted.changes > 0 {
            log::info!("[migrate] Converted {} {} status values", converted.changes, table);
        }
    }
    Ok(())
}

/// Drops `status_val` only where the legacy `status_id` column is still
/// there to fall back on.
fn status_data_down(db: &dyn Database) -> DbResult<()> {
    for table in STATUS_TABLES {
        if column_exists(db, table, "status_id")? {
            db.exec(&format!("ALTER TABLE {table} DROP COLUMN status_val"))?;
        } else {
            log::warn!("[migrate] {} has no status_id column, keeping status_val", table);
        }
    }
    Ok(())
}

// ── 030 ──

fn drop_legacy_status_up(db: &dyn Database) -> DbResult<()> {
    for table in STATUS_TABLES {
        db.exec(&format!("ALTER TABLE {table} DROP COLUMN status_id"))?;
    }
    Ok(())
}

// ── 040 ──

fn image_blurhash_up(db: &dyn Database) -> DbResult<()> {
    db.exec("ALTER TABLE images ADD COLUMN blurhash TEXT")
}

fn image_blurhash_down(db: &dyn Database) -> DbResult<()> {
    db.exec("ALTER TABLE images DROP COLUMN blurhash")
}

// ── 069 ──

fn rewrite_xmlids(db: &dyn Database, table: &str) -> DbResult<u64> {
    let rows = db.all(
        &format!("SELECT id, xmlid FROM {table} WHERE xmlid IS NOT NULL"),
        &[],
    )?;
    let mut changed = 0;
    for row in rows {
        let (Some(id), Some(old)) = (
            row.get("id").and_then(Value::as_i64),
            row.get("xmlid").and_then(Value::as_str),
        ) else {
            continue;
        };
        match xmlid::migrate_legacy(old) {
            Some(new) if new != old => {
                db.run(
                    &format!("UPDATE {table} SET xmlid = ? WHERE id = ?"),
                    &params![new, id],
                )?;
                changed += 1;
            }
            Some(_) => {}
            None => log::warn!("[migrate] Leaving unrecognised xmlid '{}' in {}", old, table),
        }
    }
    Ok(changed)
}

fn xmlid_format_up(db: &dyn Database) -> DbResult<()> {
    for table in ["events", "images"] {
        let changed = rewrite_xmlids(db, table)?;
        log::info!("[migrate] Rewrote {} {} xmlids", changed, table);
    }
    Ok(())
}
