use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::ContentType;
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{body_object, changes_from, text_field, with_db, ApiError, ApiResult};
use crate::blurhash;
use crate::config::Config;
use crate::db::{self, Database, DbResult, SharedDb};
use crate::models::image::{self, Image, ImageFilter, NewImage};
use crate::security::auth::AuthenticatedUser;
use crate::xmlid::XmlId;

/// Largest image fetched for hashing or accepted as an upload.
const MAX_SOURCE_BYTES: u64 = 20 * 1024 * 1024;

#[get("/images?<project>&<status>&<creator_id>")]
pub async fn images_list(
    project: Option<String>,
    status: Option<i64>,
    creator_id: Option<i64>,
    db: &State<SharedDb>,
) -> ApiResult<Vec<Image>> {
    let filter = ImageFilter {
        domaincode: project.filter(|p| !p.is_empty()),
        status_val: status,
        owner_id: creator_id,
    };
    let images = with_db(db, move |db| Ok(Image::list(db, &filter)?)).await?;
    Ok(Json(images))
}

#[get("/images/<id>")]
pub async fn image_get(id: i64, db: &State<SharedDb>) -> ApiResult<Image> {
    let image = with_db(db, move |db| Ok(Image::get_by_id(db, id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Image not found"))?;
    Ok(Json(image))
}

#[get("/images/xmlid/<xmlid>")]
pub async fn image_by_xmlid(xmlid: &str, db: &State<SharedDb>) -> ApiResult<Image> {
    let xmlid = xmlid.to_string();
    let image = with_db(db, move |db| Ok(Image::get_by_xmlid(db, &xmlid)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Image not found"))?;
    Ok(Json(image))
}

#[post("/images", data = "<body>")]
pub async fn image_create(body: Json<Value>, current: AuthenticatedUser, db: &State<SharedDb>) -> ApiResult<Value> {
    let fields = body_object(&body)?;
    if text_field(fields, "name").is_none() || text_field(fields, "url").is_none() {
        return Err(ApiError::bad_request("name and url are required"));
    }
    let mut new: NewImage = serde_json::from_value(body.into_inner())
        .map_err(|e| ApiError::bad_request(format!("Invalid image: {}", e)))?;
    if new.owner_id.is_none() {
        new.owner_id = Some(current.user.id);
    }

    let image = with_db(db, move |db| {
        let id = Image::create(db, &new)?;
        Ok(Image::get_by_id(db, id)?)
    })
    .await?;

    Ok(Json(json!({ "success": true, "image": image })))
}

#[patch("/images/<id>", data = "<body>")]
pub async fn image_update(
    id: i64,
    body: Json<Value>,
    _current: AuthenticatedUser,
    db: &State<SharedDb>,
) -> ApiResult<Value> {
    let changes = changes_from(body_object(&body)?, image::PATCHABLE);
    if changes.is_empty() {
        return Err(ApiError::bad_request("No valid fields to update"));
    }

    let image = with_db(db, move |db| {
        if Image::get_by_id(db, id)?.is_none() {
            return Err(ApiError::not_found("Image not found"));
        }
        changes.apply(db, "images", id)?;
        Ok(Image::get_by_id(db, id)?)
    })
    .await?;

    Ok(Json(json!({ "success": true, "image": image })))
}

#[delete("/images/<id>")]
pub async fn image_delete(id: i64, current: AuthenticatedUser, db: &State<SharedDb>) -> ApiResult<Value> {
    let deleted = with_db(db, move |db| Ok(Image::delete(db, id)?)).await?;
    if !deleted {
        return Err(ApiError::not_found("Image not found"));
    }
    log::info!("[images] Image {} deleted by {}", id, current.user.username);
    Ok(Json(json!({ "success": true, "id": id })))
}

// ── Upload ──────────────────────────────────────────────

/// Extensions accepted from the uploaded file name.
const UPLOAD_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

#[derive(FromForm)]
pub struct ImageUpload<'f> {
    pub file: TempFile<'f>,
    pub xmlid: Option<String>,
    pub domaincode: Option<String>,
    pub title: Option<String>,
    pub alt_text: Option<String>,
    pub copyright: Option<String>,
    pub owner_id: Option<i64>,
    #[field(default = false)]
    pub is_public: bool,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Stored extension, from the part's content type. A file name, when sent,
/// must carry an image extension too.
fn upload_extension(file: &TempFile<'_>) -> Result<&'static str, ApiError> {
    let ext = match file.content_type() {
        Some(ct) if ct.is_jpeg() => "jpg",
        Some(ct) if ct.is_png() => "png",
        Some(ct) if ct.is_webp() => "webp",
        _ => {
            return Err(ApiError::bad_request(
                "Invalid file type. Allowed types: image/jpeg, image/png, image/webp",
            ))
        }
    };
    let named = file
        .raw_name()
        .map(|rn| rn.dangerous_unsafe_unsanitized_raw().as_str())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, e)| e.to_lowercase());
    if let Some(named) = named {
        if !UPLOAD_EXTENSIONS.contains(&named.as_str()) {
            return Err(ApiError::bad_request(format!(
                "Invalid file extension. Allowed: {}",
                UPLOAD_EXTENSIONS.join(", ")
            )));
        }
    }
    Ok(ext)
}

/// The explicit xmlid, or one built from the domaincode and the title or
/// file name.
fn upload_xmlid(form: &ImageUpload<'_>) -> Result<XmlId, ApiError> {
    if let Some(raw) = present(&form.xmlid) {
        let id = XmlId::parse(raw).map_err(|e| ApiError::bad_request(format!("Invalid xmlid: {}", e)))?;
        if id.entity != "image" {
            return Err(ApiError::bad_request("xmlid entity must be 'image'"));
        }
        return Ok(id);
    }
    let domaincode = present(&form.domaincode)
        .ok_or_else(|| ApiError::bad_request("xmlid or domaincode is required"))?;
    let name = present(&form.title).or_else(|| form.file.name()).unwrap_or("upload");
    XmlId::from_name(domaincode, "image", None, name)
        .map_err(|e| ApiError::bad_request(format!("Invalid xmlid: {}", e)))
}

/// Store an uploaded image under `<uploads>/<domaincode>/`, record it and
/// hash it.
#[post("/images/upload", data = "<form>")]
pub async fn image_upload(
    mut form: Form<ImageUpload<'_>>,
    current: AuthenticatedUser,
    db: &State<SharedDb>,
    config: &State<Config>,
) -> ApiResult<Value> {
    if form.file.len() > MAX_SOURCE_BYTES {
        return Err(ApiError::bad_request(format!(
            "File too large. Maximum size is {}MB",
            MAX_SOURCE_BYTES / 1024 / 1024
        )));
    }
    let ext = upload_extension(&form.file)?;
    let xmlid = upload_xmlid(&form)?;

    let dir = config.uploads_dir.join(&xmlid.domaincode);
    std::fs::create_dir_all(&dir).map_err(|e| {
        log::error!("[images] Cannot create {}: {}", dir.display(), e);
        ApiError::Internal("Upload storage unavailable".to_string())
    })?;
    let filename = format!("{}_{}.{}", xmlid.slug, uuid::Uuid::new_v4().simple(), ext);
    let dest = dir.join(&filename);
    form.file.copy_to(&dest).await.map_err(|e| {
        log::error!("[images] Cannot store upload at {}: {}", dest.display(), e);
        ApiError::Internal("Failed to store upload".to_string())
    })?;

    let url = format!("/uploads/{}/{}", xmlid.domaincode, filename);
    let new = NewImage {
        xmlid: Some(xmlid.to_string()),
        name: present(&form.title).unwrap_or(xmlid.slug.as_str()).to_string(),
        url: url.clone(),
        fileformat: Some(ext.to_string()),
        alt_text: present(&form.alt_text).map(str::to_string),
        title: present(&form.title).map(str::to_string),
        copyright: present(&form.copyright).map(str::to_string),
        domaincode: Some(xmlid.domaincode.clone()),
        owner_id: Some(form.owner_id.unwrap_or(current.user.id)),
        is_public: form.is_public,
        ..Default::default()
    };

    let stored = dest.clone();
    let registered = with_db(db, move |db| register_upload(db, &stored, new)).await;
    let (image, hash) = match registered {
        Ok(done) => done,
        Err(e) => {
            let _ = std::fs::remove_file(&dest);
            return Err(e);
        }
    };

    log::info!("[images] {} uploaded {} ({})", current.user.username, url, xmlid);
    Ok(Json(json!({
        "success": true,
        "imageId": image.as_ref().map(|i| i.id),
        "url": url,
        "blurhash": hash,
        "image": image,
    })))
}

fn register_upload(db: &dyn Database, path: &Path, mut new: NewImage) -> Result<(Option<Image>, String), ApiError> {
    let bytes = std::fs::read(path).map_err(|e| {
        log::error!("[images] Cannot read stored upload {}: {}", path.display(), e);
        ApiError::Internal("Failed to read upload".to_string())
    })?;
    let img = ::image::load_from_memory(&bytes)
        .map_err(|e| ApiError::bad_request(format!("Could not decode image: {}", e)))?;
    new.width = Some(img.width() as i64);
    new.height = Some(img.height() as i64);
    let hash = blurhash::from_image(&img).map_err(|e| ApiError::bad_request(format!("Could not hash image: {}", e)))?;

    let id = db::with_transaction(db, |tx| -> DbResult<i64> {
        let id = Image::create(tx, &new)?;
        Image::set_blurhash(tx, id, &hash)?;
        Ok(id)
    })?;
    Ok((Image::get_by_id(db, id)?, hash))
}

// ── Blurhash ────────────────────────────────────────────

/// Size of the inline placeholder returned with a fresh hash.
const PREVIEW_SIZE: u32 = 32;

/// Fetch or read the image source, hash it and store the hash.
#[post("/images/<id>/regenerate-blur")]
pub async fn image_regenerate_blur(
    id: i64,
    _current: AuthenticatedUser,
    db: &State<SharedDb>,
    config: &State<Config>,
) -> ApiResult<Value> {
    let uploads_dir = config.uploads_dir.clone();
    let (image, hash) = with_db(db, move |db| {
        let image = Image::get_by_id(db, id)?.ok_or_else(|| ApiError::not_found("Image not found"))?;
        let hash = hash_source(&image, &uploads_dir).map_err(|e| {
            log::warn!("[images] Could not hash image {}: {}", id, e);
            ApiError::bad_request(e)
        })?;
        Image::set_blurhash(db, id, &hash)?;
        Ok((image, hash))
    })
    .await?;

    log::info!("[images] Updated blurhash for image {}", id);
    Ok(Json(json!({
        "success": true,
        "imageId": id,
        "xmlid": image.xmlid,
        "blurhash": hash,
        "placeholder": blurhash::placeholder_data_url(&hash, PREVIEW_SIZE, PREVIEW_SIZE).ok(),
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct BlurBatch {
    pub limit: Option<i64>,
    #[serde(default)]
    pub force: bool,
}

/// Hash every image that has no blurhash yet (every image with `force`),
/// at most `limit` per call. Per-image failures are reported, not raised.
#[post("/images/regenerate-blur-batch", data = "<body>")]
pub async fn images_regenerate_blur_batch(
    body: Option<Json<BlurBatch>>,
    _current: AuthenticatedUser,
    db: &State<SharedDb>,
    config: &State<Config>,
) -> ApiResult<Value> {
    let options = body.map(Json::into_inner).unwrap_or_default();
    let limit = options.limit.filter(|l| *l > 0).unwrap_or(50).min(500);
    let uploads_dir = config.uploads_dir.clone();

    let results = with_db(db, move |db| {
        let images = Image::needing_blurhash(db, options.force, limit)?;
        let mut results = Vec::with_capacity(images.len());
        for image in images {
            let outcome = hash_source(&image, &uploads_dir).and_then(|hash| {
                Image::set_blurhash(db, image.id, &hash).map_err(|e| e.to_string())?;
                Ok(hash)
            });
            results.push(match outcome {
                Ok(hash) => json!({ "id": image.id, "xmlid": image.xmlid, "success": true, "blurhash": hash }),
                Err(e) => {
                    log::warn!("[images] Batch blurhash failed for image {}: {}", image.id, e);
                    json!({ "id": image.id, "xmlid": image.xmlid, "success": false, "error": e })
                }
            });
        }
        Ok(results)
    })
    .await?;

    let success_count = results.iter().filter(|r| r["success"] == true).count();
    let fail_count = results.len() - success_count;
    if !results.is_empty() {
        log::info!(
            "[images] Batch blurhash: {} updated, {} failed",
            success_count,
            fail_count
        );
    }
    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Processed {} images: {} success, {} failed",
            results.len(),
            success_count,
            fail_count
        ),
        "processed": results.len(),
        "successCount": success_count,
        "failCount": fail_count,
        "results": results,
    })))
}

#[get("/images/<id>/placeholder?<w>&<h>&<punch>")]
pub async fn image_placeholder(
    id: i64,
    w: Option<u32>,
    h: Option<u32>,
    punch: Option<f32>,
    db: &State<SharedDb>,
) -> Result<(ContentType, Vec<u8>), ApiError> {
    let image = with_db(db, move |db| Ok(Image::get_by_id(db, id)?))
        .await?
        .ok_or_else(|| ApiError::not_found("Image not found"))?;
    let hash = image
        .blurhash
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ApiError::not_found("Image has no blurhash"))?;
    if !blurhash::is_valid(&hash) {
        log::warn!("[images] Stored blurhash for image {} is malformed", id);
        return Err(ApiError::Internal("Stored blurhash is invalid".to_string()));
    }

    let png = blurhash::placeholder_png(&hash, w.unwrap_or(32), h.unwrap_or(32), punch.unwrap_or(1.0))
        .map_err(|e| {
            log::warn!("[images] Stored blurhash for image {} is invalid: {}", id, e);
            ApiError::Internal("Stored blurhash is invalid".to_string())
        })?;
    Ok((ContentType::PNG, png))
}

// ── Source loading ──────────────────────────────────────

fn hash_source(image: &Image, uploads_dir: &Path) -> Result<String, String> {
    let bytes = load_source(&image.url, uploads_dir).map_err(|e| format!("Could not load image source: {}", e))?;
    blurhash::from_image_bytes(&bytes).map_err(|e| format!("Could not decode image: {}", e))
}

fn load_source(url: &str, uploads_dir: &Path) -> Result<Vec<u8>, String> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return fetch_remote(url);
    }
    let path = local_path(url, uploads_dir).ok_or_else(|| format!("invalid local path '{}'", url))?;
    std::fs::read(&path).map_err(|e| format!("{}: {}", path.display(), e))
}

fn fetch_remote(url: &str) -> Result<Vec<u8>, String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| format!("HTTP client error: {}", e))?;

    let resp = client
        .get(url)
        .send()
        .map_err(|e| format!("request failed: {}", e))?;
    if !resp.status().is_success() {
        return Err(format!("source returned {}", resp.status()));
    }
    if resp.content_length().is_some_and(|len| len > MAX_SOURCE_BYTES) {
        return Err("source image too large".to_string());
    }
    read_limited(resp, MAX_SOURCE_BYTES)
}

/// Read at most `limit` bytes; a longer body is an error, whatever its
/// declared length.
fn read_limited(reader: impl Read, limit: u64) -> Result<Vec<u8>, String> {
    let mut buf = Vec::new();
    reader
        .take(limit + 1)
        .read_to_end(&mut buf)
        .map_err(|e| format!("read failed: {}", e))?;
    if buf.len() as u64 > limit {
        return Err("source image too large".to_string());
    }
    Ok(buf)
}

/// Map `/uploads/a/b.jpg` (or `a/b.jpg`) into the uploads directory. Paths
/// that climb out of it are rejected.
pub fn local_path(url: &str, uploads_dir: &Path) -> Option<PathBuf> {
    let relative = url
        .trim_start_matches('/')
        .trim_start_matches("uploads/");
    let relative = Path::new(relative);
    if relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(uploads_dir.join(relative))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        images_list,
        image_get,
        image_by_xmlid,
        image_create,
        image_update,
        image_delete,
        image_upload,
        image_regenerate_blur,
        images_regenerate_blur_batch,
        image_placeholder
    ]
}
