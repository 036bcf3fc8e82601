use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use super::{body_object, changes_from, text_field, with_db, ApiError, ApiResult};
use crate::db::SharedDb;
use crate::models::event::{self, Event, EventFilter, NewEvent};
use crate::models::project::Project;
use crate::security::auth::AuthenticatedUser;
use crate::xmlid::XmlId;

/// `project` is a domaincode. An unknown project yields an empty list.
#[get("/events?<isbase>&<project>")]
pub async fn events_list(isbase: Option<i64>, project: Option<String>, db: &State<SharedDb>) -> ApiResult<Vec<Event>> {
    let events = with_db(db, move |db| {
        let mut filter = EventFilter {
            isbase,
            project_id: None,
        };
        if let Some(dc) = project.as_deref().filter(|dc| !dc.is_empty()) {
            match Project::get_by_domaincode(db, dc)? {
                Some(p) => filter.project_id = Some(p.id),
                None => return Ok(Vec::new()),
            }
        }
        Ok(Event::list(db, &filter)?)
    })
    .await?;
    Ok(Json(events))
}

#[get("/events/<id>")]
pub async fn event_get(id: i64, db: &State<SharedDb>) -> ApiResult<Event> {
    let event = with_db(db, move |db| Ok(Event::get_by_id(db, id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Event not found"))?;
    Ok(Json(event))
}

#[post("/events", data = "<body>")]
pub async fn event_create(body: Json<Value>, current: AuthenticatedUser, db: &State<SharedDb>) -> ApiResult<Value> {
    let fields = body_object(&body)?;
    if text_field(fields, "name").is_none() {
        return Err(ApiError::bad_request("Event name is required"));
    }
    let mut new: NewEvent = serde_json::from_value(body.into_inner())
        .map_err(|e| ApiError::bad_request(format!("Invalid event: {}", e)))?;
    if new.creator_id.is_none() {
        new.creator_id = Some(current.user.id);
    }

    let event = with_db(db, move |db| {
        if new.xmlid.as_deref().map_or(true, str::is_empty) {
            new.xmlid = match new.project_id {
                Some(project_id) => {
                    let project = Project::get_by_id(db, project_id)?
                        .ok_or_else(|| ApiError::bad_request("Project not found"))?;
                    let xmlid = XmlId::from_name(&project.domaincode, "event", None, &new.name)
                        .map_err(|e| ApiError::bad_request(e.to_string()))?;
                    Some(xmlid.to_string())
                }
                None => None,
            };
        }
        if let Some(xmlid) = new.xmlid.as_deref() {
            if Event::xmlid_exists(db, xmlid)? {
                return Err(ApiError::Conflict(format!("Event with xmlid '{}' already exists", xmlid)));
            }
        }
        let id = Event::create(db, &new)?;
        Ok(Event::get_by_id(db, id)?)
    })
    .await?;

    Ok(Json(json!({ "success": true, "event": event })))
}

/// Event creators, project owners, project members and admins may edit.
#[patch("/events/<id>", data = "<body>")]
pub async fn event_update(
    id: i64,
    body: Json<Value>,
    current: AuthenticatedUser,
    db: &State<SharedDb>,
) -> ApiResult<Value> {
    let changes = changes_from(body_object(&body)?, event::PATCHABLE);
    if changes.is_empty() {
        return Err(ApiError::bad_request("No valid fields to update"));
    }

    let user = current.user;
    let event = with_db(db, move |db| {
        let existing = Event::get_by_id(db, id)?.ok_or_else(|| ApiError::not_found("Event not found"))?;
        let allowed = user.is_admin()
            || existing.creator_id == Some(user.id)
            || match existing.project_id {
                Some(pid) => match Project::get_by_id(db, pid)? {
                    Some(project) => project.can_access(db, &user)?,
                    None => false,
                },
                None => false,
            };
        if !allowed {
            return Err(ApiError::Forbidden("You do not have permission to edit this event".to_string()));
        }
        changes.apply(db, "events", id)?;
        Ok(Event::get_by_id(db, id)?)
    })
    .await?;

    Ok(Json(json!({ "success": true, "event": event })))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![events_list, event_get, event_create, event_update]
}
