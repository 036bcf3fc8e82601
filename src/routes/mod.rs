pub mod admin;
pub mod auth;
pub mod events;
pub mod images;
pub mod pages;
pub mod projects;
pub mod status;
pub mod tasks;
pub mod users;

use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{Request, Response, State};
use serde_json::{json, Map, Value};

use crate::db::{Database, DbError, SharedDb, SqlValue};
use crate::models::Changes;

/// Error returned by every JSON handler. Rendered as
/// `{"error": true, "statusCode": <u16>, "message": "<text>"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    TooManyRequests(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::Unauthorized(_) => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::TooManyRequests(_) => Status::TooManyRequests,
            ApiError::Internal(_) => Status::InternalServerError,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ApiError::NotFound(msg.into())
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Conflict(_) => ApiError::Conflict("Record already exists".to_string()),
            other => {
                log::error!("[api] Database error: {}", other);
                ApiError::Internal("Database error".to_string())
            }
        }
    }
}

pub fn error_body(status: Status, message: &str) -> Value {
    json!({
        "error": true,
        "statusCode": status.code,
        "message": message,
    })
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        Response::build_from(Json(error_body(status, &self.to_string())).respond_to(req)?)
            .status(status)
            .ok()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run blocking database work off the async executor.
pub async fn with_db<T, F>(db: &State<SharedDb>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&dyn Database) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let db = db.inner().clone();
    rocket::tokio::task::spawn_blocking(move || f(&*db))
        .await
        .map_err(|e| {
            log::error!("[api] Blocking task failed: {}", e);
            ApiError::Internal("Internal server error".to_string())
        })?
}

// ── Request body helpers ──

pub fn body_object(body: &Value) -> Result<&Map<String, Value>, ApiError> {
    body.as_object()
        .ok_or_else(|| ApiError::bad_request("Request body must be a JSON object"))
}

/// Column assignments for every allowed key present in `body`.
pub fn changes_from(body: &Map<String, Value>, allowed: &[&str]) -> Changes {
    let mut changes = Changes::new();
    for field in allowed {
        if let Some(value) = body.get(*field) {
            changes.set(field, SqlValue::from_json(value));
        }
    }
    changes
}

/// Non-empty trimmed string field.
pub fn text_field<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

// ── Catchers ──

#[catch(default)]
pub fn default_catcher(status: Status, _req: &Request<'_>) -> (Status, Json<Value>) {
    let message = match status.code {
        401 => "Not authenticated",
        403 => "Forbidden",
        404 => "Not found",
        422 => "Invalid request body",
        _ => status.reason().unwrap_or("Error"),
    };
    (status, Json(error_body(status, message)))
}

/// All `/api` routes.
pub fn api_routes() -> Vec<rocket::Route> {
    let mut all = Vec::new();
    all.extend(auth::routes());
    all.extend(projects::routes());
    all.extend(events::routes());
    all.extend(images::routes());
    all.extend(pages::routes());
    all.extend(users::routes());
    all.extend(tasks::routes());
    all.extend(status::routes());
    all.extend(admin::routes());
    all
}
