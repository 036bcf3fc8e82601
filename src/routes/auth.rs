use std::sync::Arc;

use rocket::http::CookieJar;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{with_db, ApiError, ApiResult};
use crate::config::Config;
use crate::db::SharedDb;
use crate::models::project::Project;
use crate::models::session::Session;
use crate::models::user::User;
use crate::rate_limit::RateLimiter;
use crate::security::auth::{self, AuthenticatedUser, ClientIp};

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetProjectForm {
    pub domaincode: Option<String>,
}

// ── Login / Logout ──────────────────────────────────────

#[post("/auth/login", data = "<form>")]
pub async fn login(
    form: Json<LoginForm>,
    client_ip: ClientIp,
    cookies: &CookieJar<'_>,
    db: &State<SharedDb>,
    config: &State<Config>,
    limiter: &State<Arc<RateLimiter>>,
) -> ApiResult<Value> {
    let form = form.into_inner();
    let (Some(username), Some(password)) = (
        form.username.filter(|u| !u.trim().is_empty()),
        form.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Username and password are required"));
    };

    let rate_key = format!("login:{}", auth::hash_ip(&client_ip.0));
    if !limiter.check_and_record(&rate_key) {
        log::warn!("[auth] Login rate limit hit for {}", rate_key);
        return Err(ApiError::TooManyRequests(
            "Too many login attempts. Please try again later.".to_string(),
        ));
    }

    let ttl = config.session_ttl_hours;
    let ip = client_ip.0.clone();
    let found = with_db(db, move |db| {
        let Some(user) = User::get_by_login(db, &username)? else {
            return Ok(None);
        };
        if !auth::verify_password(&password, &user.password) {
            return Ok(None);
        }
        let session_id = Session::create(db, user.id, Some(&ip), ttl)?;
        Ok(Some((user, session_id)))
    })
    .await?;

    let Some((user, session_id)) = found else {
        log::warn!(
            "[auth] Failed login from {} ({} attempts left)",
            rate_key,
            limiter.remaining(&rate_key)
        );
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    };

    limiter.reset(&rate_key);
    auth::set_session_cookie(cookies, &session_id, config.cookie_secure, ttl);
    log::info!("[auth] User {} logged in", user.username);

    Ok(Json(json!({ "success": true, "user": user })))
}

#[post("/auth/logout")]
pub async fn logout(cookies: &CookieJar<'_>, db: &State<SharedDb>) -> ApiResult<Value> {
    if let Some(cookie) = cookies.get_private(auth::SESSION_COOKIE) {
        let session_id = cookie.value().to_string();
        with_db(db, move |db| Ok(Session::delete(db, &session_id)?)).await?;
    }
    auth::clear_session_cookie(cookies);
    Ok(Json(json!({ "success": true })))
}

// ── Session ─────────────────────────────────────────────

#[get("/auth/session")]
pub async fn auth_session(current: Option<AuthenticatedUser>, db: &State<SharedDb>) -> ApiResult<Value> {
    let Some(current) = current else {
        return Ok(Json(json!({
            "authenticated": false,
            "user": null,
            "activeProject": null,
        })));
    };

    let active_project = match current.session.active_project_id {
        Some(project_id) => with_db(db, move |db| Ok(Project::get_by_id(db, project_id)?)).await?,
        None => None,
    };

    Ok(Json(json!({
        "authenticated": true,
        "user": current.user,
        "activeProject": active_project,
    })))
}

/// Select the project the session works in. `{"domaincode": null}` clears it.
#[post("/auth/set-project", data = "<form>")]
pub async fn auth_set_project(
    form: Json<SetProjectForm>,
    current: AuthenticatedUser,
    db: &State<SharedDb>,
) -> ApiResult<Value> {
    let session_id = current.session.id.clone();
    let Some(domaincode) = form.into_inner().domaincode else {
        with_db(db, move |db| Ok(Session::set_active_project(db, &session_id, None)?)).await?;
        return Ok(Json(json!({ "success": true, "activeProject": null })));
    };

    let user = current.user;
    let project = with_db(db, move |db| {
        let project = Project::get_by_domaincode(db, domaincode.trim())?
            .ok_or_else(|| ApiError::not_found("Project not found"))?;
        if !project.can_access(db, &user)? {
            return Err(ApiError::Forbidden(
                "You are not a member of this project".to_string(),
            ));
        }
        Session::set_active_project(db, &session_id, Some(project.id))?;
        Ok(project)
    })
    .await?;

    Ok(Json(json!({ "success": true, "activeProject": project })))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![login, logout, auth_session, auth_set_project]
}
