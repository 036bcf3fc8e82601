use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Map, Value};

use super::{body_object, text_field, with_db, ApiError, ApiResult};
use crate::db::{self, SharedDb, SqlValue};
use crate::models::task::{self, NewTask, Task, TaskCounts, TaskFilter};
use crate::models::Changes;
use crate::security::auth::AuthenticatedUser;

#[get("/tasks?<status>&<record_type>&<record_id>")]
pub async fn tasks_list(
    status: Option<String>,
    record_type: Option<String>,
    record_id: Option<String>,
    db: &State<SharedDb>,
) -> ApiResult<Value> {
    let filter = TaskFilter {
        status: status.filter(|s| !s.is_empty()),
        record_type: record_type.filter(|s| !s.is_empty()),
        record_id: record_id.filter(|s| !s.is_empty()),
    };
    if let Some(s) = filter.status.as_deref() {
        if !task::valid_status(s) {
            return Err(invalid_status());
        }
    }

    let tasks = with_db(db, move |db| Ok(Task::list(db, &filter)?)).await?;
    let counts = TaskCounts::of(&tasks);
    Ok(Json(json!({
        "success": true,
        "tasks": tasks,
        "counts": counts,
    })))
}

#[post("/tasks", data = "<form>")]
pub async fn task_create(
    form: Json<NewTask>,
    _current: AuthenticatedUser,
    db: &State<SharedDb>,
) -> ApiResult<Value> {
    let form = form.into_inner();
    let Some(title) = form
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
    else {
        return Err(ApiError::bad_request("Title is required"));
    };
    if let Some(p) = form.priority.as_deref() {
        if !task::valid_priority(p) {
            return Err(invalid_priority());
        }
    }

    let task = with_db(db, move |db| {
        let id = Task::create(db, &title, &form)?;
        Ok(Task::get_by_id(db, id)?)
    })
    .await?;

    Ok(Json(json!({ "success": true, "task": task })))
}

#[put("/tasks/<id>", data = "<body>")]
pub async fn task_update(
    id: i64,
    body: Json<Value>,
    _current: AuthenticatedUser,
    db: &State<SharedDb>,
) -> ApiResult<Value> {
    let changes = task_changes(body_object(&body)?)?;
    if changes.is_empty() {
        return Err(ApiError::bad_request("No valid fields to update"));
    }

    let task = with_db(db, move |db| {
        if Task::get_by_id(db, id)?.is_none() {
            return Err(ApiError::not_found("Task not found"));
        }
        changes.apply(db, "tasks", id)?;
        Ok(Task::get_by_id(db, id)?)
    })
    .await?;

    Ok(Json(json!({ "success": true, "task": task })))
}

/// Validated assignments for a task update. Moving to `done` stamps
/// `completed_at` unless one is given; any other status clears it.
pub fn task_changes(body: &Map<String, Value>) -> Result<Changes, ApiError> {
    let mut changes = Changes::new();

    let status = body.get("status").map(|v| v.as_str().unwrap_or_default());
    if let Some(s) = status {
        if !task::valid_status(s) {
            return Err(invalid_status());
        }
    }
    if let Some(p) = body.get("priority") {
        if !p.as_str().is_some_and(task::valid_priority) {
            return Err(invalid_priority());
        }
    }

    if body.contains_key("title") {
        let title = text_field(body, "title").ok_or_else(|| ApiError::bad_request("Title cannot be empty"))?;
        changes.set("title", title);
    }
    for field in ["description", "due_date", "record_type", "record_id"] {
        if let Some(value) = body.get(field) {
            changes.set(field, optional_text(value));
        }
    }
    if let Some(value) = body.get("assigned_to") {
        changes.set("assigned_to", value.as_i64());
    }
    if let Some(p) = body.get("priority").and_then(Value::as_str) {
        changes.set("priority", p);
    }

    if let Some(s) = status {
        changes.set("status", s);
        if !body.contains_key("completed_at") {
            if s == "done" {
                changes.set("completed_at", db::now());
            } else {
                changes.set_raw("completed_at = NULL");
            }
        }
    }
    if let Some(value) = body.get("completed_at") {
        changes.set("completed_at", optional_text(value));
    }

    Ok(changes)
}

/// Empty strings and non-strings store NULL.
fn optional_text(value: &Value) -> SqlValue {
    match value.as_str().map(str::trim) {
        Some(s) if !s.is_empty() => SqlValue::Text(s.to_string()),
        _ => SqlValue::Null,
    }
}

fn invalid_status() -> ApiError {
    ApiError::bad_request(format!(
        "Invalid status. Must be one of: {}",
        task::STATUSES.join(", ")
    ))
}

fn invalid_priority() -> ApiError {
    ApiError::bad_request(format!(
        "Invalid priority. Must be one of: {}",
        task::PRIORITIES.join(", ")
    ))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![tasks_list, task_create, task_update]
}
