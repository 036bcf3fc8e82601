use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{body_object, changes_from, text_field, with_db, ApiError, ApiResult};
use crate::db::SharedDb;
use crate::models::project::{self, Member, Project};
use crate::models::user::User;
use crate::security::auth::{AdminUser, AuthenticatedUser};

#[derive(Debug, Deserialize)]
pub struct AddMemberForm {
    /// Project id or domaincode.
    pub project: Value,
    pub user_id: i64,
    pub role: Option<String>,
}

const MEMBER_ROLES: &[&str] = &["member", "author", "instructor"];

#[get("/projects")]
pub async fn projects_list(db: &State<SharedDb>) -> ApiResult<Vec<Project>> {
    let projects = with_db(db, |db| Ok(Project::list_all(db)?)).await?;
    Ok(Json(projects))
}

#[get("/projects/<domaincode>")]
pub async fn project_get(domaincode: &str, db: &State<SharedDb>) -> ApiResult<Project> {
    let dc = domaincode.to_string();
    let project = with_db(db, move |db| Ok(Project::get_by_domaincode(db, &dc)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;
    Ok(Json(project))
}

#[post("/projects", data = "<body>")]
pub async fn project_create(body: Json<Value>, admin: AdminUser, db: &State<SharedDb>) -> ApiResult<Value> {
    let body = body_object(&body)?;
    let (Some(domaincode), Some(name)) = (text_field(body, "domaincode"), text_field(body, "name")) else {
        return Err(ApiError::bad_request("domaincode and name are required"));
    };
    if !valid_domaincode(domaincode) {
        return Err(ApiError::bad_request(
            "domaincode may only contain lowercase letters, digits and underscores",
        ));
    }
    let owner_id = body
        .get("owner_id")
        .and_then(Value::as_i64)
        .or(Some(admin.user.id));

    let dc = domaincode.to_string();
    let name = name.to_string();
    let project = with_db(db, move |db| {
        if Project::get_by_domaincode(db, &dc)?.is_some() {
            return Err(ApiError::Conflict("Project with this domaincode already exists".to_string()));
        }
        let id = Project::create(db, &dc, &name, owner_id)?;
        Ok(Project::get_by_id(db, id)?)
    })
    .await?;

    log::info!("[projects] Project created by {}", admin.user.username);
    Ok(Json(json!({ "success": true, "project": project })))
}

#[patch("/projects/<domaincode>", data = "<body>")]
pub async fn project_update(
    domaincode: &str,
    body: Json<Value>,
    current: AuthenticatedUser,
    db: &State<SharedDb>,
) -> ApiResult<Value> {
    let changes = changes_from(body_object(&body)?, project::PATCHABLE);
    if changes.is_empty() {
        return Err(ApiError::bad_request("No valid fields to update"));
    }

    let dc = domaincode.to_string();
    let user = current.user;
    let project = with_db(db, move |db| {
        let project = Project::get_by_domaincode(db, &dc)?
            .ok_or_else(|| ApiError::not_found("Project not found"))?;
        if !project.is_owner(&user) && !user.is_admin() {
            return Err(ApiError::Forbidden("Only the project owner can update the project".to_string()));
        }
        changes.apply(db, "projects", project.id)?;
        Ok(Project::get_by_id(db, project.id)?)
    })
    .await?;

    Ok(Json(json!({ "success": true, "project": project })))
}

// ── Members ─────────────────────────────────────────────

#[get("/projects/<domaincode>/members")]
pub async fn project_members(domaincode: &str, db: &State<SharedDb>) -> ApiResult<Vec<Member>> {
    let dc = domaincode.to_string();
    let members = with_db(db, move |db| {
        let project = Project::get_by_domaincode(db, &dc)?
            .ok_or_else(|| ApiError::not_found("Project not found"))?;
        Ok(Project::members(db, project.id)?)
    })
    .await?;
    Ok(Json(members))
}

#[post("/projects/add-member", data = "<form>")]
pub async fn project_add_member(
    form: Json<AddMemberForm>,
    current: AuthenticatedUser,
    db: &State<SharedDb>,
) -> ApiResult<Value> {
    let form = form.into_inner();
    let role = form.role.unwrap_or_else(|| "member".to_string());
    if !MEMBER_ROLES.contains(&role.as_str()) {
        return Err(ApiError::bad_request(format!(
            "Invalid role. Must be one of: {}",
            MEMBER_ROLES.join(", ")
        )));
    }

    let user = current.user;
    let member_id = form.user_id;
    let project_ref = form.project;
    let members = with_db(db, move |db| {
        let project = match &project_ref {
            Value::Number(n) => match n.as_i64() {
                Some(id) => Project::get_by_id(db, id)?,
                None => None,
            },
            Value::String(dc) => Project::get_by_domaincode(db, dc)?,
            _ => return Err(ApiError::bad_request("project must be an id or a domaincode")),
        }
        .ok_or_else(|| ApiError::not_found("Project not found"))?;

        if !project.is_owner(&user) && !user.is_admin() {
            return Err(ApiError::Forbidden("Only the project owner can add members".to_string()));
        }
        if User::get_by_id(db, member_id)?.is_none() {
            return Err(ApiError::not_found("User not found"));
        }
        Project::add_member(db, project.id, member_id, &role)?;
        Ok(Project::members(db, project.id)?)
    })
    .await?;

    Ok(Json(json!({ "success": true, "members": members })))
}

fn valid_domaincode(dc: &str) -> bool {
    dc.len() <= 64
        && !dc.starts_with(|c: char| c.is_ascii_digit())
        && dc
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        projects_list,
        project_get,
        project_create,
        project_update,
        project_members,
        project_add_member
    ]
}
