#![cfg(test)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rocket::http::{ContentType, Status};
use rocket::local::blocking::Client;
use serde_json::{json, Value};

use crate::config::Config;
use crate::db::sqlite::SqliteDb;
use crate::db::{self, Database, DbError, DbResult, SharedDb};
use crate::migrations::{self, runner, Migration, MigrationError, RunOptions};
use crate::models::event::{Event, EventFilter, NewEvent};
use crate::models::project::Project;
use crate::models::session::Session;
use crate::models::user::User;
use crate::params;
use crate::security::auth;
use crate::security::credentials::{self, CredentialError};

/// Atomic counter for unique shared-cache DB names so parallel tests don't collide.
static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh named shared-cache in-memory SQLite database, no migrations applied.
/// Shared cache lets the pool's connections see the same data.
fn empty_db() -> SharedDb {
    let id = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let uri = format!("file:testdb_{}?mode=memory&cache=shared", id);
    Arc::new(SqliteDb::open(Path::new(&uri), 2).expect("Failed to open test database"))
}

/// Fresh database with every non-manual migration applied.
fn test_db() -> SharedDb {
    let db = empty_db();
    migrations::run_pending(&*db, &migrations::registry(), &RunOptions::default())
        .expect("Failed to run migrations");
    db
}

fn test_config() -> Config {
    let mut config = Config::sqlite(":memory:");
    config.bcrypt_cost = 4;
    config.login_max_attempts = 3;
    config
}

fn scratch_dir(name: &str) -> PathBuf {
    let id = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("crearis_{}_{}_{}", name, std::process::id(), id));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn make_user(db: &dyn Database, name: &str, role: &str) -> i64 {
    let (id, _) = credentials::create_user(
        db,
        &format!("{}@example.org", name),
        name,
        role,
        Some(&format!("{}-password", name)),
        4,
    )
    .unwrap();
    id
}

fn table_exists(db: &dyn Database, table: &str) -> bool {
    db.get(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
        &params![table],
    )
    .unwrap()
    .is_some()
}

fn tracking_row(db: &dyn Database, id: &str) -> Option<runner::AppliedMigration> {
    runner::applied(db).unwrap().into_iter().find(|a| a.id == id)
}

// ═══════════════════════════════════════════════════════════
// Migration runner
// ═══════════════════════════════════════════════════════════

#[test]
fn migrations_apply_in_order_and_skip_manual() {
    let db = empty_db();
    let registry = migrations::registry();
    let report = migrations::run_pending(&*db, &registry, &RunOptions::default()).unwrap();

    assert_eq!(report.total, registry.len());
    assert_eq!(report.skipped_manual, vec!["023_seed_demo_data".to_string()]);
    assert_eq!(report.ran.len(), registry.len() - 1);
    assert_eq!(report.ran.first().map(String::as_str), Some("000_base_schema"));
    assert_eq!(report.ran.last().map(String::as_str), Some("069_xmlid_format"));

    let applied: Vec<String> = runner::applied(&*db).unwrap().into_iter().map(|a| a.id).collect();
    assert_eq!(applied, report.ran);
    assert!(table_exists(&*db, "sessions"));
    assert!(runner::column_exists(&*db, "images", "blurhash").unwrap());
    assert!(!runner::column_exists(&*db, "events", "status_id").unwrap());
}

#[test]
fn migrations_rerun_is_a_no_op() {
    let db = test_db();
    let registry = migrations::registry();
    let report = migrations::run_pending(&*db, &registry, &RunOptions::default()).unwrap();
    assert!(report.ran.is_empty());
    assert_eq!(report.already_applied, registry.len() - 1);

    let status = migrations::status(&*db, &registry).unwrap();
    assert_eq!(status.completed, registry.len() - 1);
    assert_eq!(status.pending, vec!["023_seed_demo_data".to_string()]);
    assert!(status.failed.is_empty());
    assert_eq!(status.last_applied.as_deref(), Some("069_xmlid_format"));
}

#[test]
fn migrations_respect_package_range() {
    let db = empty_db();
    let registry = migrations::registry();
    let options = RunOptions {
        range: migrations::package_range(Some("A"), Some("A")).unwrap(),
        run_manual: false,
    };
    let report = migrations::run_pending(&*db, &registry, &options).unwrap();
    assert_eq!(
        report.ran,
        vec!["000_base_schema", "001_sessions", "013_pages", "017_project_members"]
    );
    assert!(!table_exists(&*db, "images"));

    assert!(matches!(
        migrations::package_range(Some("E"), Some("A")),
        Err(MigrationError::InvalidPackageRange { .. })
    ));
}

#[test]
fn manual_migrations_run_when_requested() {
    let db = test_db();
    let options = RunOptions {
        run_manual: true,
        ..Default::default()
    };
    let report = migrations::run_pending(&*db, &migrations::registry(), &options).unwrap();
    assert_eq!(report.ran, vec!["023_seed_demo_data".to_string()]);

    let demo = Project::get_by_domaincode(&*db, "demo").unwrap().unwrap();
    let events = Event::list(
        &*db,
        &EventFilter {
            project_id: Some(demo.id),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.xmlid.as_deref().is_some_and(|x| x.starts_with("demo.event__"))));
    let open_stage = events.iter().find(|e| e.name == "Open Stage Evening").unwrap();
    assert_eq!(open_stage.status_val, 0x0003);
}

// ── A failing batch ──

fn create_alpha(db: &dyn Database) -> DbResult<()> {
    db.exec("CREATE TABLE alpha (id INTEGER PRIMARY KEY)")
}

fn create_half_then_fail(db: &dyn Database) -> DbResult<()> {
    db.exec("CREATE TABLE half_done (id INTEGER PRIMARY KEY)")?;
    Err(DbError::Query("simulated failure".to_string()))
}

fn create_beta(db: &dyn Database) -> DbResult<()> {
    db.exec("CREATE TABLE beta (id INTEGER PRIMARY KEY)")
}

fn create_gamma(db: &dyn Database) -> DbResult<()> {
    db.exec("CREATE TABLE gamma (id INTEGER PRIMARY KEY)")
}

fn migration(id: &'static str, up: migrations::MigrationFn) -> Migration {
    Migration {
        id,
        description: id,
        version: "0.0.0",
        date: "2025-01-01",
        manual_only: false,
        up,
        down: None,
    }
}

#[test]
fn failed_migration_rolls_back_and_stops_batch() {
    let db = empty_db();
    let broken = [
        migration("001_alpha", create_alpha),
        migration("002_beta", create_half_then_fail),
        migration("003_gamma", create_gamma),
    ];
    let err = migrations::run_pending(&*db, &broken, &RunOptions::default()).unwrap_err();
    assert!(matches!(err, MigrationError::Failed { ref id, .. } if id == "002_beta"));

    assert!(table_exists(&*db, "alpha"));
    assert!(!table_exists(&*db, "half_done"));
    assert!(!table_exists(&*db, "gamma"));

    let failed = tracking_row(&*db, "002_beta").unwrap();
    assert!(!failed.succeeded());
    assert!(failed.error.unwrap_or_default().contains("simulated failure"));
    assert!(tracking_row(&*db, "003_gamma").is_none());

    let status = migrations::status(&*db, &broken).unwrap();
    assert_eq!(status.failed, vec!["002_beta".to_string()]);

    // Fixed migration is retried on the next run
    let fixed = [
        migration("001_alpha", create_alpha),
        migration("002_beta", create_beta),
        migration("003_gamma", create_gamma),
    ];
    let report = migrations::run_pending(&*db, &fixed, &RunOptions::default()).unwrap();
    assert_eq!(report.ran, vec!["002_beta", "003_gamma"]);
    assert!(tracking_row(&*db, "002_beta").unwrap().succeeded());
    assert!(migrations::status(&*db, &fixed).unwrap().failed.is_empty());
}

#[test]
fn registry_must_be_ordered() {
    let db = empty_db();
    let unordered = [
        migration("002_beta", create_beta),
        migration("001_alpha", create_alpha),
    ];
    assert!(matches!(
        migrations::run_pending(&*db, &unordered, &RunOptions::default()),
        Err(MigrationError::InvalidRegistry(_))
    ));
    assert!(!table_exists(&*db, "alpha"));
}

// ── Rollback ──

#[test]
fn rollback_skips_irreversible_migrations() {
    let db = test_db();
    let registry = migrations::registry();

    assert_eq!(runner::plan_rollback(&*db, 2).unwrap(), vec!["069_xmlid_format", "040_image_blurhash"]);

    let report = migrations::rollback(&*db, &registry, 2).unwrap();
    assert_eq!(report.rolled_back, vec!["040_image_blurhash".to_string()]);
    assert_eq!(report.skipped, vec!["069_xmlid_format".to_string()]);
    assert!(!runner::column_exists(&*db, "images", "blurhash").unwrap());

    let status = migrations::status(&*db, &registry).unwrap();
    assert!(status.pending.contains(&"040_image_blurhash".to_string()));

    // Re-applying restores the column
    let report = migrations::run_pending(&*db, &registry, &RunOptions::default()).unwrap();
    assert_eq!(report.ran, vec!["040_image_blurhash".to_string()]);
    assert!(runner::column_exists(&*db, "images", "blurhash").unwrap());
}

#[test]
fn rollback_to_target_keeps_target_applied() {
    let db = test_db();
    let registry = migrations::registry();

    let report = migrations::rollback_to(&*db, &registry, "022").unwrap();
    assert_eq!(report.rolled_back, vec!["040_image_blurhash", "027_migrate_status_data"]);
    assert_eq!(report.skipped, vec!["069_xmlid_format", "030_drop_legacy_status_columns"]);
    assert!(tracking_row(&*db, "022_status_registry").is_some());
    // 030 stays applied, so status_val is the only status column left.
    assert!(!runner::column_exists(&*db, "users", "status_id").unwrap());
    assert!(runner::column_exists(&*db, "users", "status_val").unwrap());

    assert!(matches!(
        migrations::rollback_to(&*db, &registry, "999_unknown"),
        Err(MigrationError::NotApplied(_))
    ));
}

#[test]
fn rollback_past_irreversible_migration_can_be_reapplied() {
    let db = test_db();
    let registry = migrations::registry();
    make_user(&*db, "rolf", "user");
    db.run("UPDATE users SET status_val = ? WHERE username = ?", &params![0x0003, "rolf"])
        .unwrap();

    migrations::rollback_to(&*db, &registry, "022").unwrap();
    let status = migrations::status(&*db, &registry).unwrap();
    assert!(status.pending.contains(&"027_migrate_status_data".to_string()));

    let report = migrations::run_pending(&*db, &registry, &RunOptions::default()).unwrap();
    assert_eq!(report.ran, vec!["027_migrate_status_data", "040_image_blurhash"]);
    assert!(migrations::status(&*db, &registry).unwrap().failed.is_empty());
    assert!(runner::column_exists(&*db, "images", "blurhash").unwrap());

    let rolf = User::get_by_login(&*db, "rolf").unwrap().unwrap();
    assert_eq!(rolf.status_val, 0x0003);
}

// ── Data migrations ──

#[test]
fn status_and_xmlid_data_are_converted() {
    let db = empty_db();
    let registry = migrations::registry();
    let before_status = RunOptions {
        range: migrations::package_range(Some("A"), Some("B")).unwrap(),
        run_manual: false,
    };
    migrations::run_pending(&*db, &registry, &before_status).unwrap();

    let now = db::now();
    for (xmlid, name, status_id) in [
        ("tp.event.summer-camp", "Summer Camp", 5i64),
        ("tp.event_online.intro_talk", "Intro Talk", 13),
        ("tp.event__already_new", "Already New", 99),
    ] {
        db.run(
            "INSERT INTO events (xmlid, name, status_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            &params![xmlid, name, status_id, &now, &now],
        )
        .unwrap();
    }
    db.run(
        "INSERT INTO images (xmlid, name, url, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        &params!["tp.image.scene-photo_1", "Scene", "/uploads/scene.jpg", &now, &now],
    )
    .unwrap();

    migrations::run_pending(&*db, &registry, &RunOptions::default()).unwrap();

    let events = Event::list(&*db, &EventFilter::default()).unwrap();
    let by_name = |name: &str| events.iter().find(|e| e.name == name).unwrap().clone();

    let camp = by_name("Summer Camp");
    assert_eq!(camp.status_val, 0x0003);
    assert_eq!(camp.xmlid.as_deref(), Some("tp.event__summer_camp"));

    let talk = by_name("Intro Talk");
    assert_eq!(talk.status_val, 0x0020);
    assert_eq!(talk.xmlid.as_deref(), Some("tp.event-online__intro_talk"));

    let unknown = by_name("Already New");
    assert_eq!(unknown.status_val, 0);
    assert_eq!(unknown.xmlid.as_deref(), Some("tp.event__already_new"));

    let image = db.get("SELECT xmlid FROM images", &[]).unwrap().unwrap();
    assert_eq!(image["xmlid"], "tp.image-scene__photo_1");
}

// ═══════════════════════════════════════════════════════════
// Models & credentials
// ═══════════════════════════════════════════════════════════

#[test]
fn event_create_and_filter() {
    let db = test_db();
    let project_id = Project::create(&*db, "tp", "Theater", None).unwrap();
    let id = Event::create(
        &*db,
        &NewEvent {
            name: "Base Event".to_string(),
            project_id: Some(project_id),
            isbase: Some(1),
            ..Default::default()
        },
    )
    .unwrap();
    Event::create(
        &*db,
        &NewEvent {
            name: "Loose Event".to_string(),
            ..Default::default()
        },
    )
    .unwrap();

    let event = Event::get_by_id(&*db, id).unwrap().unwrap();
    assert_eq!(event.event_type, "workshop");
    assert_eq!(event.domaincode.as_deref(), Some("tp"));

    let base = Event::list(
        &*db,
        &EventFilter {
            isbase: Some(1),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(base.len(), 1);
    assert_eq!(base[0].id, id);
    assert_eq!(Event::list(&*db, &EventFilter::default()).unwrap().len(), 2);
}

#[test]
fn project_membership_grants_access() {
    let db = test_db();
    let owner = make_user(&*db, "owner", "user");
    let member = make_user(&*db, "member", "user");
    let admin = make_user(&*db, "root", "admin");
    let project_id = Project::create(&*db, "tp", "Theater", Some(owner)).unwrap();
    let project = Project::get_by_id(&*db, project_id).unwrap().unwrap();

    let user = |id| User::get_by_id(&*db, id).unwrap().unwrap();
    assert!(project.can_access(&*db, &user(owner)).unwrap());
    assert!(project.can_access(&*db, &user(admin)).unwrap());
    assert!(!project.can_access(&*db, &user(member)).unwrap());

    Project::add_member(&*db, project_id, member, "member").unwrap();
    Project::add_member(&*db, project_id, member, "author").unwrap();
    assert!(project.can_access(&*db, &user(member)).unwrap());
    let members = Project::members(&*db, project_id).unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, "author");
}

#[test]
fn sessions_expire_and_are_swept() {
    let db = test_db();
    let user_id = make_user(&*db, "sam", "user");
    let live = Session::create(&*db, user_id, Some("127.0.0.1"), 1).unwrap();
    db.run(
        "INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        &params!["stale", user_id, "2020-01-01T00:00:00Z", "2020-01-02T00:00:00Z"],
    )
    .unwrap();

    assert!(Session::get_valid(&*db, &live).unwrap().is_some());
    assert!(Session::get_valid(&*db, "stale").unwrap().is_none());
    assert_eq!(Session::cleanup_expired(&*db).unwrap(), 1);
    assert_eq!(Session::cleanup_expired(&*db).unwrap(), 0);
}

#[test]
fn reset_password_rotates_hash_and_ends_sessions() {
    let db = test_db();
    let user_id = make_user(&*db, "alex", "user");
    Session::create(&*db, user_id, None, 1).unwrap();

    let password = credentials::reset_password(&*db, "ALEX@example.org", 4).unwrap();
    assert_eq!(password.len(), credentials::DEFAULT_PASSWORD_LENGTH);

    let user = User::get_by_id(&*db, user_id).unwrap().unwrap();
    assert!(auth::verify_password(&password, &user.password));
    assert!(!auth::verify_password("alex-password", &user.password));
    assert!(!user.password.contains(&password));

    let sessions = db::scalar_i64(
        &*db,
        "SELECT COUNT(*) AS n FROM sessions WHERE user_id = ?",
        &params![user_id],
    )
    .unwrap();
    assert_eq!(sessions, Some(0));

    assert!(matches!(
        credentials::reset_password(&*db, "nobody@example.org", 4),
        Err(CredentialError::UnknownUser(_))
    ));
}

#[test]
fn create_user_validates_input() {
    let db = test_db();
    let (id, generated) =
        credentials::create_user(&*db, "ops@example.org", "ops", "admin", None, 4).unwrap();
    let pw = generated.unwrap();
    let user = User::get_by_login(&*db, "ops").unwrap().unwrap();
    assert_eq!(user.id, id);
    assert!(user.is_admin());
    assert!(auth::verify_password(&pw, &user.password));

    assert!(matches!(
        credentials::create_user(&*db, "x@example.org", "x", "superuser", None, 4),
        Err(CredentialError::InvalidRole(_))
    ));
    assert!(matches!(
        credentials::create_user(&*db, "y@example.org", "y", "user", Some("short"), 4),
        Err(CredentialError::TooShort)
    ));
    assert!(matches!(
        credentials::create_user(&*db, "ops@example.org", "ops2", "user", None, 4),
        Err(CredentialError::Db(DbError::Conflict(_)))
    ));
    assert_eq!(User::count(&*db).unwrap(), 1);
}

#[test]
fn boot_creates_missing_directories() {
    let root = scratch_dir("boot");
    let mut config = Config::sqlite(root.join("db/crearis.db"));
    config.uploads_dir = root.join("uploads/media");

    let report = crate::boot::run(&config).unwrap();
    assert_eq!(report.errors, 0);
    assert!(root.join("db").is_dir());
    assert!(root.join("uploads/media").is_dir());
    assert!(!root.join("uploads/media/.write_test").exists());

    let _ = std::fs::remove_dir_all(&root);
}

// ═══════════════════════════════════════════════════════════
// HTTP API
// ═══════════════════════════════════════════════════════════

fn client_with(config: Config) -> (Client, SharedDb) {
    let db = test_db();
    let client = Client::tracked(crate::build_rocket(config, db.clone())).expect("valid rocket instance");
    (client, db)
}

fn client() -> (Client, SharedDb) {
    client_with(test_config())
}

fn post_json(client: &Client, uri: &str, body: Value) -> (Status, Value) {
    let response = client
        .post(uri.to_string())
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    let status = response.status();
    (status, response.into_json::<Value>().unwrap_or(Value::Null))
}

fn send_json(client: &Client, method: &str, uri: &str, body: Value) -> (Status, Value) {
    let request = match method {
        "PUT" => client.put(uri.to_string()),
        "PATCH" => client.patch(uri.to_string()),
        _ => client.post(uri.to_string()),
    };
    let response = request.header(ContentType::JSON).body(body.to_string()).dispatch();
    let status = response.status();
    (status, response.into_json::<Value>().unwrap_or(Value::Null))
}

fn get_json(client: &Client, uri: &str) -> (Status, Value) {
    let response = client.get(uri.to_string()).dispatch();
    let status = response.status();
    (status, response.into_json::<Value>().unwrap_or(Value::Null))
}

fn login(client: &Client, name: &str) {
    let (status, body) = post_json(
        client,
        "/api/auth/login",
        json!({ "username": name, "password": format!("{}-password", name) }),
    );
    assert_eq!(status, Status::Ok, "login failed: {}", body);
}

#[test]
fn api_login_session_logout() {
    let (client, db) = client();
    make_user(&*db, "alice", "user");

    let (status, body) = get_json(&client, "/api/auth/session");
    assert_eq!(status, Status::Ok);
    assert_eq!(body["authenticated"], false);

    let (status, body) = post_json(
        &client,
        "/api/auth/login",
        json!({ "username": "alice", "password": "alice-password" }),
    );
    assert_eq!(status, Status::Ok);
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["username"], "alice");
    assert!(body["user"].get("password").is_none());
    assert!(client.cookies().get_private(auth::SESSION_COOKIE).is_some());

    let (_, body) = get_json(&client, "/api/auth/session");
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["user"]["sysmail"], "alice@example.org");
    assert!(body["activeProject"].is_null());

    let (status, _) = post_json(&client, "/api/auth/logout", json!({}));
    assert_eq!(status, Status::Ok);
    let (_, body) = get_json(&client, "/api/auth/session");
    assert_eq!(body["authenticated"], false);
}

#[test]
fn api_login_errors_and_rate_limit() {
    let (client, db) = client();
    make_user(&*db, "bob", "user");

    let (status, body) = post_json(&client, "/api/auth/login", json!({ "username": "bob" }));
    assert_eq!(status, Status::BadRequest);
    assert_eq!(body["error"], true);
    assert_eq!(body["statusCode"], 400);

    // max_attempts = 3 in the test config
    for _ in 0..3 {
        let (status, _) = post_json(
            &client,
            "/api/auth/login",
            json!({ "username": "bob", "password": "wrong-password" }),
        );
        assert_eq!(status, Status::Unauthorized);
    }
    let (status, body) = post_json(
        &client,
        "/api/auth/login",
        json!({ "username": "bob", "password": "bob-password" }),
    );
    assert_eq!(status, Status::TooManyRequests);
    assert_eq!(body["statusCode"], 429);
}

#[test]
fn api_guards_return_json_errors() {
    let (client, db) = client();
    make_user(&*db, "carol", "user");

    let (status, body) = get_json(&client, "/api/admin/migrations");
    assert_eq!(status, Status::Unauthorized);
    assert_eq!(body["statusCode"], 401);

    login(&client, "carol");
    let (status, body) = get_json(&client, "/api/admin/migrations");
    assert_eq!(status, Status::Forbidden);
    assert_eq!(body["statusCode"], 403);

    let (status, body) = get_json(&client, "/api/does-not-exist");
    assert_eq!(status, Status::NotFound);
    assert_eq!(body["error"], true);
}

#[test]
fn api_admin_sees_migration_status() {
    let (client, db) = client();
    make_user(&*db, "root", "admin");
    login(&client, "root");

    let (status, body) = get_json(&client, "/api/admin/migrations");
    assert_eq!(status, Status::Ok);
    assert_eq!(body["total"], migrations::registry().len());
    assert_eq!(body["pending"], json!(["023_seed_demo_data"]));
    assert_eq!(body["last_applied"], "069_xmlid_format");
}

#[test]
fn api_projects_and_members() {
    let (client, db) = client();
    make_user(&*db, "root", "admin");
    let dana = make_user(&*db, "dana", "user");

    login(&client, "dana");
    let (status, _) = post_json(&client, "/api/projects", json!({ "domaincode": "tp", "name": "Theater" }));
    assert_eq!(status, Status::Forbidden);

    login(&client, "root");
    let (status, body) = post_json(&client, "/api/projects", json!({ "domaincode": "tp", "name": "Theater" }));
    assert_eq!(status, Status::Ok, "{}", body);
    assert_eq!(body["project"]["domaincode"], "tp");
    let (status, _) = post_json(&client, "/api/projects", json!({ "domaincode": "tp", "name": "Again" }));
    assert_eq!(status, Status::Conflict);
    let (status, _) = post_json(&client, "/api/projects", json!({ "domaincode": "Bad Code", "name": "X" }));
    assert_eq!(status, Status::BadRequest);

    let (status, body) = send_json(&client, "PATCH", "/api/projects/tp", json!({ "heading": "Welcome" }));
    assert_eq!(status, Status::Ok);
    assert_eq!(body["project"]["heading"], "Welcome");
    let (status, _) = send_json(&client, "PATCH", "/api/projects/tp", json!({ "unknown": 1 }));
    assert_eq!(status, Status::BadRequest);

    // Dana cannot select the project before joining it
    login(&client, "dana");
    let (status, _) = post_json(&client, "/api/auth/set-project", json!({ "domaincode": "tp" }));
    assert_eq!(status, Status::Forbidden);

    login(&client, "root");
    let (status, body) = post_json(
        &client,
        "/api/projects/add-member",
        json!({ "project": "tp", "user_id": dana, "role": "member" }),
    );
    assert_eq!(status, Status::Ok);
    assert_eq!(body["members"][0]["username"], "dana");

    let (status, body) = get_json(&client, "/api/projects/tp/members");
    assert_eq!(status, Status::Ok);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    login(&client, "dana");
    let (status, _) = post_json(&client, "/api/auth/set-project", json!({ "domaincode": "tp" }));
    assert_eq!(status, Status::Ok);
    let (_, body) = get_json(&client, "/api/auth/session");
    assert_eq!(body["activeProject"]["domaincode"], "tp");

    let (status, _) = get_json(&client, "/api/projects/nope");
    assert_eq!(status, Status::NotFound);
    let (_, body) = get_json(&client, "/api/projects");
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

#[test]
fn api_events_create_and_patch() {
    let (client, db) = client();
    let owner = make_user(&*db, "erin", "user");
    make_user(&*db, "frank", "user");
    let project_id = Project::create(&*db, "tp", "Theater", Some(owner)).unwrap();

    let (status, _) = post_json(&client, "/api/events", json!({ "name": "Open Stage" }));
    assert_eq!(status, Status::Unauthorized);

    login(&client, "erin");
    let (status, _) = post_json(&client, "/api/events", json!({ "project_id": project_id }));
    assert_eq!(status, Status::BadRequest);

    let (status, body) = post_json(
        &client,
        "/api/events",
        json!({ "name": "Open Stage", "project_id": project_id }),
    );
    assert_eq!(status, Status::Ok, "{}", body);
    let event = &body["event"];
    assert_eq!(event["xmlid"], "tp.event__open_stage");
    assert_eq!(event["event_type"], "workshop");
    assert_eq!(event["isbase"], 0);
    let id = event["id"].as_i64().unwrap();

    let (status, _) = post_json(
        &client,
        "/api/events",
        json!({ "name": "Open Stage", "project_id": project_id }),
    );
    assert_eq!(status, Status::Conflict);

    let (_, body) = get_json(&client, "/api/events?project=tp");
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["domaincode"], "tp");
    let (_, body) = get_json(&client, "/api/events?project=unknown");
    assert_eq!(body, json!([]));

    let (status, body) = send_json(
        &client,
        "PATCH",
        &format!("/api/events/{}", id),
        json!({ "teaser": "Bring your own scene", "status_val": 3 }),
    );
    assert_eq!(status, Status::Ok);
    assert_eq!(body["event"]["teaser"], "Bring your own scene");
    assert_eq!(body["event"]["status_val"], 3);

    login(&client, "frank");
    let (status, _) = send_json(&client, "PATCH", &format!("/api/events/{}", id), json!({ "teaser": "x" }));
    assert_eq!(status, Status::Forbidden);

    let (status, _) = get_json(&client, "/api/events/9999");
    assert_eq!(status, Status::NotFound);
}

#[test]
fn api_pages_by_type() {
    let (client, db) = client();
    make_user(&*db, "gina", "user");
    let project_id = Project::create(&*db, "tp", "Theater", None).unwrap();
    login(&client, "gina");

    let (status, body) = post_json(
        &client,
        "/api/pages",
        json!({ "project": project_id, "page_type": "landing", "page_options": { "columns": 2 } }),
    );
    assert_eq!(status, Status::Ok, "{}", body);
    assert_eq!(body["page"]["header_type"], "simple");
    assert_eq!(body["page"]["header_size"], "mini");
    let id = body["page"]["id"].as_i64().unwrap();

    let (status, _) = post_json(&client, "/api/pages", json!({ "project": project_id, "page_type": "landing" }));
    assert_eq!(status, Status::Conflict);

    let uri = format!("/api/pages/by-type?project_id={}&page_type=landing", project_id);
    let (status, body) = get_json(&client, &uri);
    assert_eq!(status, Status::Ok);
    assert_eq!(body["page_options"]["columns"], 2);
    assert_eq!(body["aside_options"], json!({}));

    let (status, _) = get_json(&client, "/api/pages/by-type?page_type=landing");
    assert_eq!(status, Status::BadRequest);
    let (status, _) = get_json(&client, &format!("/api/pages/by-type?project_id={}&page_type=Bad%20Type", project_id));
    assert_eq!(status, Status::BadRequest);
    let (status, _) = get_json(&client, &format!("/api/pages/by-type?project_id={}&page_type=team", project_id));
    assert_eq!(status, Status::NotFound);

    let (status, _) = send_json(&client, "PUT", &format!("/api/pages/{}", id), json!({}));
    assert_eq!(status, Status::BadRequest);
    let (status, body) = send_json(
        &client,
        "PUT",
        &format!("/api/pages/{}", id),
        json!({ "header_type": "banner", "header_options": { "overlay": true } }),
    );
    assert_eq!(status, Status::Ok);
    assert_eq!(body["page"]["header_type"], "banner");
    assert_eq!(body["page"]["header_options"]["overlay"], true);
}

#[test]
fn api_tasks_flow() {
    let (client, db) = client();
    make_user(&*db, "hank", "user");
    login(&client, "hank");

    let (status, _) = post_json(&client, "/api/tasks", json!({ "title": "  " }));
    assert_eq!(status, Status::BadRequest);
    let (status, _) = post_json(&client, "/api/tasks", json!({ "title": "X", "priority": "someday" }));
    assert_eq!(status, Status::BadRequest);

    let (_, low) = post_json(&client, "/api/tasks", json!({ "title": "Tidy up", "priority": "low" }));
    let (_, urgent) = post_json(
        &client,
        "/api/tasks",
        json!({ "title": "Fix stage lights", "priority": "urgent", "record_type": "event", "record_id": "7" }),
    );
    assert_eq!(low["task"]["status"], "todo");

    let (status, body) = get_json(&client, "/api/tasks");
    assert_eq!(status, Status::Ok);
    assert_eq!(body["success"], true);
    assert_eq!(body["tasks"][0]["title"], "Fix stage lights");
    assert_eq!(body["counts"]["total"], 2);
    assert_eq!(body["counts"]["todo"], 2);

    let id = urgent["task"]["id"].as_i64().unwrap();
    let (status, body) = send_json(&client, "PUT", &format!("/api/tasks/{}", id), json!({ "status": "done" }));
    assert_eq!(status, Status::Ok);
    assert!(body["task"]["completed_at"].is_string());

    let (_, body) = get_json(&client, "/api/tasks?record_type=event&record_id=7");
    assert_eq!(body["tasks"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["counts"]["done"], 1);
    assert_eq!(body["counts"]["inProgress"], 0);

    let (status, body) = send_json(&client, "PUT", &format!("/api/tasks/{}", id), json!({ "status": "in-progress" }));
    assert_eq!(status, Status::Ok);
    assert!(body["task"]["completed_at"].is_null());

    let (status, _) = send_json(&client, "PUT", &format!("/api/tasks/{}", id), json!({}));
    assert_eq!(status, Status::BadRequest);
    let (status, _) = send_json(&client, "PUT", "/api/tasks/9999", json!({ "status": "done" }));
    assert_eq!(status, Status::NotFound);
    let (status, _) = get_json(&client, "/api/tasks?status=someday");
    assert_eq!(status, Status::BadRequest);
}

#[test]
fn api_users_admin_patch() {
    let (client, db) = client();
    make_user(&*db, "root", "admin");
    let ivy = make_user(&*db, "ivy", "user");

    login(&client, "ivy");
    let (status, body) = get_json(&client, &format!("/api/users/{}", ivy));
    assert_eq!(status, Status::Ok);
    assert_eq!(body["username"], "ivy");
    assert!(body.get("password").is_none());

    let (status, _) = send_json(&client, "PATCH", &format!("/api/users/{}", ivy), json!({ "role": "admin" }));
    assert_eq!(status, Status::Forbidden);

    login(&client, "root");
    let (status, _) = send_json(&client, "PATCH", &format!("/api/users/{}", ivy), json!({ "role": "owner" }));
    assert_eq!(status, Status::BadRequest);
    let (status, _) = send_json(&client, "PATCH", &format!("/api/users/{}", ivy), json!({ "password": "short" }));
    assert_eq!(status, Status::BadRequest);

    let (status, body) = send_json(
        &client,
        "PATCH",
        &format!("/api/users/{}", ivy),
        json!({ "username": "ivy2", "password": "a-much-longer-password", "status_val": 4 }),
    );
    assert_eq!(status, Status::Ok, "{}", body);
    assert_eq!(body["user"]["username"], "ivy2");
    assert_eq!(body["user"]["status_val"], 4);

    let user = User::get_by_id(&*db, ivy).unwrap().unwrap();
    assert!(auth::verify_password("a-much-longer-password", &user.password));
    let sessions = db::scalar_i64(
        &*db,
        "SELECT COUNT(*) AS n FROM sessions WHERE user_id = ?",
        &params![ivy],
    )
    .unwrap();
    assert_eq!(sessions, Some(0));

    let (status, _) = get_json(&client, "/api/users/9999");
    assert_eq!(status, Status::NotFound);
}

#[test]
fn api_status_registry() {
    let (client, _db) = client();
    let (status, body) = get_json(&client, "/api/status/all");
    assert_eq!(status, Status::Ok);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), crate::status::all().len());
    assert_eq!(rows[0]["name"], "new");
    assert!(rows.iter().any(|r| r["name"] == "archived" && r["value"] == 0x20));
}

#[test]
fn api_images_blurhash_round() {
    let uploads = scratch_dir("uploads");
    let mut config = test_config();
    config.uploads_dir = uploads.clone();
    let (client, db) = client_with(config);
    make_user(&*db, "jo", "user");
    login(&client, "jo");

    let img = image::RgbaImage::from_fn(24, 16, |x, y| {
        image::Rgba([(x * 10) as u8, (y * 15) as u8, 120, 255])
    });
    img.save(uploads.join("stage.png")).unwrap();

    let (status, _) = post_json(&client, "/api/images", json!({ "name": "Stage" }));
    assert_eq!(status, Status::BadRequest);
    let (status, body) = post_json(
        &client,
        "/api/images",
        json!({ "name": "Stage", "url": "/uploads/stage.png", "domaincode": "tp", "xmlid": "tp.image-scene__stage" }),
    );
    assert_eq!(status, Status::Ok, "{}", body);
    let id = body["image"]["id"].as_i64().unwrap();
    assert!(body["image"]["blurhash"].is_null());

    // No hash yet
    let response = client.get(format!("/api/images/{}/placeholder", id)).dispatch();
    assert_eq!(response.status(), Status::NotFound);

    let (status, body) = post_json(&client, &format!("/api/images/{}/regenerate-blur", id), json!({}));
    assert_eq!(status, Status::Ok, "{}", body);
    let hash = body["blurhash"].as_str().unwrap().to_string();
    assert!(crate::blurhash::is_valid(&hash));
    assert!(body["placeholder"]
        .as_str()
        .is_some_and(|url| url.starts_with("data:image/png;base64,")));

    let (_, body) = get_json(&client, "/api/images/xmlid/tp.image-scene__stage");
    assert_eq!(body["blurhash"], hash.as_str());

    let response = client
        .get(format!("/api/images/{}/placeholder?w=8&h=6", id))
        .dispatch();
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::PNG));
    let png = response.into_bytes().unwrap();
    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (8, 6));

    let (_, list) = get_json(&client, "/api/images?project=tp");
    assert_eq!(list.as_array().map(Vec::len), Some(1));

    let (status, body) = send_json(&client, "PATCH", &format!("/api/images/{}", id), json!({ "alt_text": "The stage" }));
    assert_eq!(status, Status::Ok);
    assert_eq!(body["image"]["alt_text"], "The stage");

    let response = client.delete(format!("/api/images/{}", id)).dispatch();
    assert_eq!(response.status(), Status::Ok);
    let (status, _) = get_json(&client, &format!("/api/images/{}", id));
    assert_eq!(status, Status::NotFound);

    let _ = std::fs::remove_dir_all(&uploads);
}

const BOUNDARY: &str = "crearis-test-boundary";

fn multipart(fields: &[(&str, &str)], file: Option<(&str, &str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((filename, content_type, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, filename, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn post_multipart(client: &Client, uri: &str, body: Vec<u8>) -> (Status, Value) {
    let content_type = ContentType::new("multipart", "form-data").with_params(("boundary", BOUNDARY));
    let response = client.post(uri.to_string()).header(content_type).body(body).dispatch();
    let status = response.status();
    (status, response.into_json::<Value>().unwrap_or(Value::Null))
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x * 12) as u8, 90, (y * 20) as u8, 255])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[test]
fn api_image_upload_stores_and_hashes() {
    let uploads = scratch_dir("upload");
    let mut config = test_config();
    config.uploads_dir = uploads.clone();
    let (client, db) = client_with(config);
    let kim = make_user(&*db, "kim", "user");
    let png = png_bytes(20, 10);

    let fields = [("domaincode", "tp"), ("title", "Main Stage"), ("alt_text", "The stage")];
    let (status, _) = post_multipart(
        &client,
        "/api/images/upload",
        multipart(&fields, Some(("stage.png", "image/png", png.as_slice()))),
    );
    assert_eq!(status, Status::Unauthorized);

    login(&client, "kim");

    let (status, body) = post_multipart(
        &client,
        "/api/images/upload",
        multipart(&fields, Some(("notes.txt", "text/plain", &b"hello"[..]))),
    );
    assert_eq!(status, Status::BadRequest, "{}", body);

    let (status, body) = post_multipart(
        &client,
        "/api/images/upload",
        multipart(&fields, Some(("stage.gif", "image/png", png.as_slice()))),
    );
    assert_eq!(status, Status::BadRequest, "{}", body);

    let (status, body) = post_multipart(
        &client,
        "/api/images/upload",
        multipart(&[("title", "No Project")], Some(("stage.png", "image/png", png.as_slice()))),
    );
    assert_eq!(status, Status::BadRequest, "{}", body);

    let (status, body) = post_multipart(
        &client,
        "/api/images/upload",
        multipart(&fields, Some(("stage.png", "image/png", png.as_slice()))),
    );
    assert_eq!(status, Status::Ok, "{}", body);
    assert_eq!(body["image"]["xmlid"], "tp.image__main_stage");
    assert_eq!(body["image"]["width"], 20);
    assert_eq!(body["image"]["height"], 10);
    assert_eq!(body["image"]["fileformat"], "png");
    assert_eq!(body["image"]["owner_id"], kim);
    assert_eq!(body["image"]["alt_text"], "The stage");
    let hash = body["blurhash"].as_str().unwrap();
    assert!(crate::blurhash::is_valid(hash));
    assert_eq!(body["image"]["blurhash"], hash);

    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("/uploads/tp/main_stage_") && url.ends_with(".png"), "{}", url);
    assert!(uploads.join(url.trim_start_matches("/uploads/")).is_file());
    assert_eq!(files_in(&uploads.join("tp")), 1);

    // Same xmlid again: the record conflicts and the stored copy is removed
    let (status, _) = post_multipart(
        &client,
        "/api/images/upload",
        multipart(&fields, Some(("stage.png", "image/png", png.as_slice()))),
    );
    assert_eq!(status, Status::Conflict);
    assert_eq!(files_in(&uploads.join("tp")), 1);

    // Declared PNG that does not decode
    let (status, _) = post_multipart(
        &client,
        "/api/images/upload",
        multipart(
            &[("xmlid", "tp.image-scene__broken")],
            Some(("broken.png", "image/png", &b"not really a png"[..])),
        ),
    );
    assert_eq!(status, Status::BadRequest);
    assert_eq!(files_in(&uploads.join("tp")), 1);

    let (status, _) = post_multipart(
        &client,
        "/api/images/upload",
        multipart(&[("xmlid", "tp.event__stage")], Some(("stage.png", "image/png", png.as_slice()))),
    );
    assert_eq!(status, Status::BadRequest);

    let _ = std::fs::remove_dir_all(&uploads);
}

#[test]
fn api_images_batch_regenerates_missing_hashes() {
    let uploads = scratch_dir("batch");
    let mut config = test_config();
    config.uploads_dir = uploads.clone();
    let (client, db) = client_with(config);
    make_user(&*db, "lee", "user");
    login(&client, "lee");

    std::fs::write(uploads.join("a.png"), png_bytes(8, 8)).unwrap();
    std::fs::write(uploads.join("b.png"), png_bytes(12, 6)).unwrap();
    let mut ids = Vec::new();
    for (name, url) in [("A", "/uploads/a.png"), ("B", "/uploads/b.png"), ("Gone", "/uploads/gone.png")] {
        let (status, body) = post_json(&client, "/api/images", json!({ "name": name, "url": url }));
        assert_eq!(status, Status::Ok, "{}", body);
        ids.push(body["image"]["id"].as_i64().unwrap());
    }

    let (status, body) = post_json(&client, "/api/images/regenerate-blur-batch", json!({}));
    assert_eq!(status, Status::Ok, "{}", body);
    assert_eq!(body["processed"], 3);
    assert_eq!(body["successCount"], 2);
    assert_eq!(body["failCount"], 1);
    let failed: Vec<i64> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["success"] == false)
        .filter_map(|r| r["id"].as_i64())
        .collect();
    assert_eq!(failed, vec![ids[2]]);

    let (_, image) = get_json(&client, &format!("/api/images/{}", ids[0]));
    assert!(image["blurhash"].as_str().is_some_and(crate::blurhash::is_valid));

    // Only the broken image is still missing a hash
    let response = client.post("/api/images/regenerate-blur-batch").dispatch();
    assert_eq!(response.status(), Status::Ok);
    let body = response.into_json::<Value>().unwrap();
    assert_eq!(body["processed"], 1);
    assert_eq!(body["successCount"], 0);

    let (_, body) = post_json(&client, "/api/images/regenerate-blur-batch", json!({ "force": true, "limit": 2 }));
    assert_eq!(body["processed"], 2);
    assert_eq!(body["successCount"], 2);

    let _ = std::fs::remove_dir_all(&uploads);
}
