//! HTTP handlers for content operations.
//! Streams bodies in both directions to avoid buffering payloads in memory
//! and delegates storage concerns to `StorageService`.

use crate::{
    errors::AppError,
    mime_type,
    models::{car::CarExport, content::ContentObject, stat::ObjectStat},
    services::storage_service::{GcReport, ListParams, StorageService, max_age_hours},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::ReaderStream;

const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[derive(Debug, Deserialize)]
pub struct AddQuery {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LsQuery {
    pub cid: Option<String>,
    #[serde(rename = "start-after")]
    pub start_after: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct LsResponse {
    pub objects: Vec<ContentObject>,
    pub is_truncated: bool,
    pub next_start_after: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GcQuery {
    #[serde(rename = "max-age-hours")]
    pub max_age_hours: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub gateway: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub cid: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ExportReq {
    pub cids: Vec<String>,
}

/// Shared handler state: the store plus the default GC age.
#[derive(Clone)]
pub struct GatewayState {
    pub storage: StorageService,
    pub gc_max_age: chrono::Duration,
}

/// POST `/api/v0/add?name=` — add the raw request body.
pub async fn add_content(
    State(state): State<GatewayState>,
    Query(q): Query<AddQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let name = q.name.unwrap_or_else(|| "upload".into());
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| mime_type::mime_for_name(&name).to_string());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let object = state
        .storage
        .add_stream(&name, &content_type, stream)
        .await?;
    Ok((StatusCode::CREATED, Json(object)))
}

/// POST `/api/v0/add-json?name=` — add a JSON document.
pub async fn add_json(
    State(state): State<GatewayState>,
    Query(q): Query<AddQuery>,
    Json(value): Json<serde_json::Value>,
) -> Result<impl IntoResponse, AppError> {
    let object = state.storage.add_json(&value, q.name.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(object)))
}

/// GET `/api/v0/ls` — list objects, supports ?cid=&start-after=&limit=
pub async fn list_content(
    State(state): State<GatewayState>,
    Query(q): Query<LsQuery>,
) -> Result<Json<LsResponse>, AppError> {
    let params = ListParams {
        cid: q.cid,
        start_after: q.start_after.as_deref().map(decode_continuation_token),
        limit: q.limit,
    };
    let result = state.storage.ls(params).await?;
    Ok(Json(LsResponse {
        objects: result.objects,
        is_truncated: result.is_truncated,
        next_start_after: result
            .next_start_after
            .as_deref()
            .map(encode_continuation_token),
    }))
}

/// GET `/api/v0/stat/{cid}`
pub async fn stat_content(
    State(state): State<GatewayState>,
    Path(cid): Path<String>,
) -> Result<Json<ObjectStat>, AppError> {
    Ok(Json(state.storage.stat(&cid).await?))
}

/// POST `/api/v0/pin/{cid}`
pub async fn pin_content(
    State(state): State<GatewayState>,
    Path(cid): Path<String>,
) -> Result<Json<ContentObject>, AppError> {
    Ok(Json(state.storage.pin(&cid).await?))
}

/// DELETE `/api/v0/pin/{cid}`
pub async fn unpin_content(
    State(state): State<GatewayState>,
    Path(cid): Path<String>,
) -> Result<Json<ContentObject>, AppError> {
    Ok(Json(state.storage.unpin(&cid).await?))
}

/// POST `/api/v0/gc` — collect unpinned content older than the configured
/// (or requested) age.
pub async fn collect_garbage(
    State(state): State<GatewayState>,
    Query(q): Query<GcQuery>,
) -> Result<Json<GcReport>, AppError> {
    let max_age = match q.max_age_hours {
        Some(hours) => max_age_hours(hours).ok_or_else(|| {
            AppError::bad_request(format!("max-age-hours `{}` is out of range", hours))
        })?,
        None => state.gc_max_age,
    };
    Ok(Json(state.storage.gc(max_age).await?))
}

/// POST `/api/v0/export` — CAR-like manifest of the requested CIDs.
pub async fn export_car(
    State(state): State<GatewayState>,
    Json(req): Json<ExportReq>,
) -> Result<Json<CarExport>, AppError> {
    Ok(Json(state.storage.export_car(&req.cids).await?))
}

/// GET `/api/v0/url/{cid}?gateway=`
pub async fn public_url(
    State(state): State<GatewayState>,
    Path(cid): Path<String>,
    Query(q): Query<UrlQuery>,
) -> Result<Json<UrlResponse>, AppError> {
    let url = state.storage.public_url(&cid, q.gateway.as_deref())?;
    Ok(Json(UrlResponse { cid, url }))
}

/// GET `/ipfs/{cid}` — stream content.
pub async fn get_content(
    State(state): State<GatewayState>,
    Path(cid): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if etag_matches(&headers, &cid) {
        // Validate existence so a bogus CID never yields 304.
        let meta = state.storage.get(&cid).await?;
        return Ok(not_modified(&meta));
    }

    let (meta, file) = state.storage.open(&cid).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_content_headers(response.headers_mut(), &meta);
    Ok(response)
}

/// HEAD `/ipfs/{cid}` — same headers as GET but no body.
pub async fn head_content(
    State(state): State<GatewayState>,
    Path(cid): Path<String>,
) -> Result<Response, AppError> {
    let meta = state.storage.get(&cid).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_content_headers(response.headers_mut(), &meta);
    Ok(response)
}

fn etag_matches(headers: &HeaderMap, cid: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(|tag| tag.trim().trim_start_matches("W/").trim_matches('"'))
                .any(|tag| tag == cid || tag == "*")
        })
        .unwrap_or(false)
}

fn not_modified(meta: &ContentObject) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    let headers = response.headers_mut();
    insert_etag(headers, &meta.cid);
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL),
    );
    response
}

fn insert_etag(headers: &mut HeaderMap, cid: &str) {
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", cid)) {
        headers.insert(header::ETAG, value);
    }
}

fn set_content_headers(headers: &mut HeaderMap, meta: &ContentObject) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static(mime_type::OCTET_STREAM)),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));

    insert_etag(headers, &meta.cid);

    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL),
    );

    if let Ok(value) = HeaderValue::from_str(&http_date(&meta.uploaded_at)) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    let filename = meta.name.replace(['"', '\\'], "_");
    if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{}\"", filename)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}

/// IMF-fixdate, the preferred HTTP date format.
fn http_date(at: &DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(token)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}
