use rocket::http::{Cookie, CookieJar, HeaderMap, SameSite, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::tokio::task::spawn_blocking;
use rocket::State;
use sha2::{Digest, Sha256};

use crate::db::{DbResult, SharedDb};
use crate::models::session::Session;
use crate::models::user::User;

/// Private cookie holding the session id.
pub const SESSION_COOKIE: &str = "crearis_session";

// ── Client address ──

/// Caller address used as the login rate-limit key. A proxy-supplied
/// `X-Real-IP` wins over the leftmost `X-Forwarded-For` entry, which wins
/// over the socket peer.
pub struct ClientIp(pub String);

fn proxied_ip(headers: &HeaderMap<'_>) -> Option<String> {
    let real = headers.get_one("X-Real-IP").map(str::trim);
    let forwarded = headers
        .get_one("X-Forwarded-For")
        .and_then(|chain| chain.split(',').next())
        .map(str::trim);
    real.into_iter()
        .chain(forwarded)
        .find(|ip| !ip.is_empty())
        .map(str::to_string)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = proxied_ip(request.headers())
            .or_else(|| request.client_ip().map(|ip| ip.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

// ── Session guards ──

/// Any caller with a live session. Forwards with 401 otherwise, which the
/// JSON catcher renders.
pub struct AuthenticatedUser {
    pub user: User,
    pub session: Session,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match session_user(request).await {
            Some((user, session)) => Outcome::Success(AuthenticatedUser { user, session }),
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}

/// A session whose user has role `admin`; 403 for other users.
pub struct AdminUser {
    pub user: User,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminUser {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match session_user(request).await {
            Some((user, _)) if user.is_admin() => Outcome::Success(AdminUser { user }),
            Some(_) => Outcome::Forward(Status::Forbidden),
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}

/// Resolve the session cookie to its user. A cookie pointing at an expired
/// or deleted session is cleared.
async fn session_user(request: &Request<'_>) -> Option<(User, Session)> {
    let session_id = request
        .cookies()
        .get_private(SESSION_COOKIE)?
        .value()
        .to_string();
    let db: SharedDb = request
        .guard::<&State<SharedDb>>()
        .await
        .succeeded()?
        .inner()
        .clone();

    let found = spawn_blocking(move || -> DbResult<Option<(User, Session)>> {
        match Session::get_valid(&*db, &session_id)? {
            Some(session) => Ok(User::get_by_id(&*db, session.user_id)?.map(|u| (u, session))),
            None => Ok(None),
        }
    })
    .await;

    match found {
        Ok(Ok(None)) => {
            clear_session_cookie(request.cookies());
            None
        }
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            log::error!("[auth] Session lookup failed: {}", e);
            None
        }
        Err(e) => {
            log::error!("[auth] Session lookup task failed: {}", e);
            None
        }
    }
}

// ── Passwords ──

pub fn hash_password(password: &str, cost: u32) -> Result<String, String> {
    bcrypt::hash(password, cost).map_err(|e| e.to_string())
}

/// Malformed hashes never verify.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

// ── Cookie ──

pub fn set_session_cookie(cookies: &CookieJar<'_>, session_id: &str, secure: bool, ttl_hours: i64) {
    let cookie = Cookie::build((SESSION_COOKIE, session_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(rocket::time::Duration::hours(ttl_hours.max(1)));
    cookies.add_private(cookie);
}

pub fn clear_session_cookie(cookies: &CookieJar<'_>) {
    cookies.remove_private(Cookie::build(SESSION_COOKIE).path("/"));
}

/// Rate-limit keys carry a digest of the address rather than the address.
pub fn hash_ip(ip: &str) -> String {
    hex::encode(Sha256::digest(ip.as_bytes()))
}
