use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::app_state::AppState;
use crate::error::ServerError;
use crate::store::PublishFile;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/publish/list", post(list_sites))
        .route("/api/list", post(list_sites))
        .route("/publish/create", post(create_site))
        .route("/publish/delete", post(delete_site))
        .route("/api/slugs", post(site_slugs))
        .route("/api/site", post(site_info))
        .route("/api/remove", post(remove_file))
        .route("/api/upload", post(upload_file))
        .route("/api/slug", post(configure_slug))
        .route("/publish/{slug}", get(site_index))
        .route("/publish/{slug}/{*path}", get(published_file))
}

#[derive(Deserialize)]
struct ListSitesRequest {
    token: String,
    #[serde(default)]
    id: String,
}

#[derive(Deserialize)]
struct CreateSiteRequest {
    token: String,
}

#[derive(Deserialize)]
struct DeleteSiteRequest {
    token: String,
    site_uid: String,
}

#[derive(Deserialize)]
struct SlugsRequest {
    token: String,
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Deserialize)]
struct SiteInfoRequest {
    token: String,
    slug: String,
}

#[derive(Deserialize)]
struct RemoveFileRequest {
    token: String,
    site_uid: String,
    path: String,
}

#[derive(Deserialize)]
struct ConfigureSlugRequest {
    token: String,
    id: String,
    slug: String,
}

/// Without an id: the caller's sites. With one: that site's file collection.
async fn list_sites(
    State(state): State<AppState>,
    Json(req): Json<ListSitesRequest>,
) -> Result<Json<Value>, ServerError> {
    let email = state.tokens.email(&req.token)?;

    if req.id.is_empty() {
        let sites = state.store.get_sites(&email).await?;
        return Ok(Json(json!({
            "sites": sites,
            "shared": [],
            "limit": state.config.max_sites_per_user,
        })));
    }

    let owner = state.store.get_site_owner(&req.id).await?;
    let files = state.store.get_publish_files(&req.id).await?;
    Ok(Json(json!({ "files": files, "owner": owner == email })))
}

async fn create_site(
    State(state): State<AppState>,
    Json(req): Json<CreateSiteRequest>,
) -> Result<Json<Value>, ServerError> {
    let email = state.tokens.email(&req.token)?;

    let sites = state.store.get_sites(&email).await?;
    if sites.len() >= state.config.max_sites_per_user {
        return Err(ServerError::InvalidInput(format!(
            "You have reached the limit of {} sites",
            state.config.max_sites_per_user
        )));
    }

    let site = state.store.create_site(&email, &state.config.host).await?;
    Ok(Json(serde_json::to_value(site).map_err(|e| {
        ServerError::Internal(format!("site serialization: {e}"))
    })?))
}

async fn delete_site(
    State(state): State<AppState>,
    Json(req): Json<DeleteSiteRequest>,
) -> Result<Json<Value>, ServerError> {
    let email = state.tokens.email(&req.token)?;

    if state.store.get_site_owner(&req.site_uid).await? != email {
        return Err(ServerError::Forbidden(
            "You do not have permission to delete this site".into(),
        ));
    }

    state.store.delete_site(&req.site_uid).await?;
    Ok(Json(json!({})))
}

/// Maps each known site id to its public slug; unknown ids are skipped.
async fn site_slugs(
    State(state): State<AppState>,
    Json(req): Json<SlugsRequest>,
) -> Result<Json<Value>, ServerError> {
    state.tokens.email(&req.token)?;

    let mut slugs = serde_json::Map::new();
    for id in &req.ids {
        match state.store.get_site_slug(id).await {
            Ok(slug) => {
                slugs.insert(id.clone(), Value::String(slug));
            }
            Err(ServerError::NotFound(_)) => continue,
            Err(err) => return Err(err),
        }
    }

    Ok(Json(Value::Object(slugs)))
}

async fn site_info(
    State(state): State<AppState>,
    Json(req): Json<SiteInfoRequest>,
) -> Result<Json<Value>, ServerError> {
    state.tokens.email(&req.token)?;

    match state.store.get_slug(&req.slug).await? {
        Some(info) => Ok(Json(serde_json::to_value(info).map_err(|e| {
            ServerError::Internal(format!("slug serialization: {e}"))
        })?)),
        None => Ok(Json(json!({
            "code": "NOTFOUND",
            "message": "Slug not found",
        }))),
    }
}

async fn remove_file(
    State(state): State<AppState>,
    Json(req): Json<RemoveFileRequest>,
) -> Result<Json<Value>, ServerError> {
    let email = state.tokens.email(&req.token)?;

    if state.store.get_site_owner(&req.site_uid).await? != email {
        return Err(ServerError::Forbidden(
            "You do not have permission to delete this file".into(),
        ));
    }

    state
        .store
        .remove_publish_file(&req.site_uid, &req.path)
        .await?;
    Ok(Json(json!({})))
}

/// Raw-body upload addressed by the obs-* headers.
async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServerError> {
    let token = header_str(&headers, "obs-token")?;
    let email = state.tokens.email(token)?;

    let site_id = header_str(&headers, "obs-id")?.to_string();
    let hash = header_str(&headers, "obs-hash")?.to_string();
    let path = urlencoding::decode(header_str(&headers, "obs-path")?)
        .map_err(|_| ServerError::InvalidInput("obs-path is not valid percent-encoding".into()))?
        .into_owned();

    if state.store.get_site_owner(&site_id).await? != email {
        return Err(ServerError::Forbidden(
            "You do not have permission to upload to this site".into(),
        ));
    }

    let data = String::from_utf8(body.to_vec())
        .map_err(|_| ServerError::InvalidInput("upload is not valid UTF-8".into()))?;

    state
        .store
        .new_publish_file(&PublishFile {
            path,
            ctime: 0,
            mtime: 0,
            hash,
            size: data.len() as i64,
            data,
            slug: site_id,
            deleted: false,
        })
        .await?;

    Ok(Json(json!({})))
}

async fn configure_slug(
    State(state): State<AppState>,
    Json(req): Json<ConfigureSlugRequest>,
) -> Result<Json<Value>, ServerError> {
    let email = state.tokens.email(&req.token)?;

    if state.store.get_site_owner(&req.id).await? != email {
        return Err(ServerError::Forbidden(
            "You do not have permission to change this site's slug".into(),
        ));
    }

    state.store.set_slug(&req.slug, &req.id).await?;
    Ok(Json(json!({})))
}

/// Public file index of a published site.
async fn site_index(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Value>, ServerError> {
    let site = state
        .store
        .get_slug(&slug)
        .await?
        .ok_or_else(|| ServerError::NotFound("Site not found".into()))?;

    let files = state.store.get_publish_files(&site.id).await?;
    Ok(Json(serde_json::to_value(files).map_err(|e| {
        ServerError::Internal(format!("file serialization: {e}"))
    })?))
}

/// Public single-file read; the stored text is served as-is.
async fn published_file(
    State(state): State<AppState>,
    Path((slug, path)): Path<(String, String)>,
) -> Result<String, ServerError> {
    let site = state
        .store
        .get_slug(&slug)
        .await?
        .ok_or_else(|| ServerError::NotFound("Site not found".into()))?;

    state
        .store
        .get_publish_file(&site.id, &path)
        .await?
        .ok_or_else(|| ServerError::NotFound("File not found".into()))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ServerError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::InvalidInput(format!("missing header {name}")))
}
