use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use super::{body_object, with_db, ApiError, ApiResult};
use crate::db::SharedDb;
use crate::models::page::{self, NewPage, Page};
use crate::models::project::Project;
use crate::models::Changes;
use crate::security::auth::AuthenticatedUser;

#[get("/pages/by-type?<project_id>&<page_type>")]
pub async fn page_by_type(
    project_id: Option<i64>,
    page_type: Option<String>,
    db: &State<SharedDb>,
) -> ApiResult<Page> {
    let (Some(project_id), Some(page_type)) = (project_id, page_type) else {
        return Err(ApiError::bad_request("project_id and page_type are required"));
    };
    if !page::valid_page_type(&page_type) {
        return Err(ApiError::bad_request("Invalid page_type"));
    }

    let page = with_db(db, move |db| Ok(Page::get_by_type(db, project_id, &page_type)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Page not found"))?;
    Ok(Json(page))
}

/// One page per project and page type.
#[post("/pages", data = "<form>")]
pub async fn page_create(
    form: Json<NewPage>,
    _current: AuthenticatedUser,
    db: &State<SharedDb>,
) -> ApiResult<Value> {
    let form = form.into_inner();
    let (Some(project_id), Some(page_type)) = (form.project.or(form.project_id), form.page_type.clone()) else {
        return Err(ApiError::bad_request("project and page_type are required"));
    };
    if !page::valid_page_type(&page_type) {
        return Err(ApiError::bad_request("Invalid page_type"));
    }

    let page = with_db(db, move |db| {
        if Project::get_by_id(db, project_id)?.is_none() {
            return Err(ApiError::not_found("Project not found"));
        }
        if Page::get_by_type(db, project_id, &page_type)?.is_some() {
            return Err(ApiError::Conflict(format!(
                "A '{}' page already exists for this project",
                page_type
            )));
        }
        let id = Page::create(db, project_id, &page_type, &form)?;
        Ok(Page::get_by_id(db, id)?)
    })
    .await?;

    Ok(Json(json!({ "success": true, "page": page })))
}

#[put("/pages/<id>", data = "<body>")]
pub async fn page_update(
    id: i64,
    body: Json<Value>,
    _current: AuthenticatedUser,
    db: &State<SharedDb>,
) -> ApiResult<Value> {
    let fields = body_object(&body)?;
    let mut changes = Changes::new();
    for field in page::TEXT_FIELDS {
        if let Some(value) = fields.get(*field).and_then(Value::as_str) {
            changes.set(field, value);
        }
    }
    for field in page::OPTION_FIELDS {
        if let Some(value) = fields.get(*field) {
            changes.set(field, page::options_text(Some(value)));
        }
    }
    if changes.is_empty() {
        return Err(ApiError::bad_request("No valid fields to update"));
    }

    let page = with_db(db, move |db| {
        if Page::get_by_id(db, id)?.is_none() {
            return Err(ApiError::not_found("Page not found"));
        }
        changes.apply(db, "pages", id)?;
        Ok(Page::get_by_id(db, id)?)
    })
    .await?;

    Ok(Json(json!({ "success": true, "page": page })))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![page_by_type, page_create, page_update]
}
