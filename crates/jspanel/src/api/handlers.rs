//! HTTP handlers.

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::auth::CurrentUser;
use crate::container::ContainerRecord;
use crate::lifecycle::{
    Action, ContainerHandle, ContainerSummary, CreateRequest, EnvMap, MigrationOutcome,
    SettingsUpdate,
};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default, alias = "user")]
    pub username: String,
    #[serde(default, alias = "pass")]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub token: String,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    fn ok() -> Json<Self> {
        Json(Self { ok: true })
    }
}

/// Accepts `true`/`false`, `1`/`0` and their string forms.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Str(String),
    }

    match Option::<Flag>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Flag::Bool(b)) => Ok(Some(b)),
        Some(Flag::Int(n)) => Ok(Some(n != 0)),
        Some(Flag::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(None),
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!(
                "invalid flag value '{other}'"
            ))),
        },
    }
}

/// Empty strings count as not supplied.
fn supplied(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize)]
pub struct CreateContainerRequest {
    pub name: String,
    #[serde(default, alias = "startupCmd", alias = "STARTUP_CMD")]
    pub startup_cmd: Option<String>,
    #[serde(
        default,
        alias = "cfEnable",
        alias = "CF_TUNNEL_ENABLE",
        deserialize_with = "deserialize_flag"
    )]
    pub tunnel_enabled: Option<bool>,
    #[serde(default, alias = "cfToken", alias = "CF_TOKEN")]
    pub tunnel_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsRequest {
    #[serde(default, alias = "startupCmd", alias = "STARTUP_CMD")]
    pub startup_cmd: Option<String>,
    #[serde(
        default,
        alias = "cfEnable",
        alias = "CF_TUNNEL_ENABLE",
        deserialize_with = "deserialize_flag"
    )]
    pub tunnel_enabled: Option<bool>,
    #[serde(default, alias = "cfToken", alias = "CF_TOKEN")]
    pub tunnel_token: Option<String>,
}

impl From<SettingsRequest> for SettingsUpdate {
    fn from(req: SettingsRequest) -> Self {
        SettingsUpdate {
            startup_cmd: supplied(req.startup_cmd),
            tunnel_enabled: req.tunnel_enabled,
            // An explicit empty token clears it; only an absent field keeps it.
            tunnel_token: req.tunnel_token.map(|t| t.trim().to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct FileContentResponse {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePathRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub path: String,
    #[serde(default)]
    pub dest: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompressRequest {
    #[serde(default, alias = "path")]
    pub dir: String,
    pub items: Vec<String>,
    #[serde(alias = "archiveName", alias = "name")]
    pub archive_name: String,
}

#[derive(Debug, Serialize)]
pub struct PathResponse {
    pub ok: bool,
    pub path: String,
}

// ============================================================================
// Session
// ============================================================================

/// GET /api/health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let token = state.auth.login(&request.username, &request.password)?;
    let cookie = state.auth.session_cookie(&token);

    info!("Operator '{}' logged in", request.username);
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(LoginResponse {
            ok: true,
            token,
            username: request.username,
        }),
    ))
}

/// POST /api/logout
pub async fn logout(State(state): State<AppState>, user: CurrentUser) -> impl IntoResponse {
    state.auth.logout(&user.token);
    debug!("Operator '{}' logged out", user.username());
    (
        StatusCode::NO_CONTENT,
        AppendHeaders([(header::SET_COOKIE, state.auth.clear_cookie())]),
    )
}

// ============================================================================
// Containers
// ============================================================================

/// GET /api/containers
pub async fn list_containers(State(state): State<AppState>) -> ApiResult<Json<Vec<ContainerSummary>>> {
    Ok(Json(state.lifecycle.list().await?))
}

/// POST /api/containers
pub async fn create_container(
    State(state): State<AppState>,
    Json(request): Json<CreateContainerRequest>,
) -> ApiResult<(StatusCode, Json<ContainerHandle>)> {
    let handle = state
        .lifecycle
        .create(CreateRequest {
            name: request.name,
            startup_cmd: supplied(request.startup_cmd),
            tunnel_enabled: request.tunnel_enabled.unwrap_or(false),
            tunnel_token: supplied(request.tunnel_token),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(handle)))
}

/// POST /api/containers/{id}/{action}
pub async fn container_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> ApiResult<Json<OkResponse>> {
    let action: Action = action.parse()?;
    state.lifecycle.transition(&id, action).await?;
    Ok(OkResponse::ok())
}

/// GET /api/containers/{id}/inspect
pub async fn inspect_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ContainerRecord>> {
    Ok(Json(state.lifecycle.inspect(&id).await?))
}

/// GET /api/containers/{id}/env
pub async fn container_env(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<EnvMap>> {
    Ok(Json(state.lifecycle.get_env(&id).await?))
}

/// POST /api/containers/{id}/settings
pub async fn update_settings(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SettingsRequest>,
) -> ApiResult<Json<ContainerHandle>> {
    Ok(Json(
        state.lifecycle.update_settings(&id, request.into()).await?,
    ))
}

/// POST /api/containers/{id}/migrate
pub async fn migrate_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<MigrationOutcome>> {
    Ok(Json(state.lifecycle.migrate(&id).await?))
}

// ============================================================================
// Files
// ============================================================================

/// GET /api/containers/{id}/files?path=
pub async fn list_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.files.list(&id, &query.path).await?))
}

/// GET /api/containers/{id}/files/content?path=
pub async fn read_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<FileContentResponse>> {
    let bytes = state.files.read(&id, &query.path).await?;
    Ok(Json(FileContentResponse {
        path: query.path,
        content: String::from_utf8_lossy(&bytes).into_owned(),
    }))
}

/// GET /api/containers/{id}/files/download?path=
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let opened = state.files.download(&id, &query.path).await?;

    let mime = mime_guess::from_path(&opened.path)
        .first_or_octet_stream()
        .to_string();
    let safe_filename = opened.file_name.replace('"', "'");
    let body = Body::from_stream(ReaderStream::new(opened.file));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_LENGTH, opened.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{safe_filename}\""),
            ),
        ],
        body,
    )
        .into_response())
}

/// POST /api/containers/{id}/files/write
pub async fn write_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<WriteFileRequest>,
) -> ApiResult<Json<OkResponse>> {
    state
        .files
        .write(&id, &request.path, request.content.as_bytes())
        .await?;
    Ok(OkResponse::ok())
}

/// POST /api/containers/{id}/files/upload?path=
///
/// Multipart with a `file` field and an optional `dest` field overriding `path`.
pub async fn upload_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
    mut multipart: Multipart,
) -> ApiResult<Json<PathResponse>> {
    let mut dest = query.path;
    let mut upload: Option<(String, bytes::Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Multipart error: {}", e);
        ApiError::bad_request(format!("invalid multipart body: {e}"))
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("dest") => {
                dest = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
            }
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| "upload".to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read upload: {e}")))?;
                upload = Some((filename, data));
            }
            _ => {}
        }
    }

    let (filename, data) = upload.ok_or_else(|| ApiError::bad_request("no file in upload"))?;
    let path = state.files.upload(&id, &dest, &filename, &data).await?;
    Ok(Json(PathResponse { ok: true, path }))
}

/// DELETE /api/containers/{id}/files?path=
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<OkResponse>> {
    state.files.delete(&id, &query.path).await?;
    Ok(OkResponse::ok())
}

/// POST /api/containers/{id}/files/create-file
pub async fn create_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CreatePathRequest>,
) -> ApiResult<(StatusCode, Json<OkResponse>)> {
    state.files.create_file(&id, &request.path).await?;
    Ok((StatusCode::CREATED, OkResponse::ok()))
}

/// POST /api/containers/{id}/files/create-folder
pub async fn create_folder(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CreatePathRequest>,
) -> ApiResult<Json<OkResponse>> {
    state.files.create_folder(&id, &request.path).await?;
    Ok(OkResponse::ok())
}

/// POST /api/containers/{id}/files/extract
pub async fn extract_archive(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ExtractRequest>,
) -> ApiResult<Json<OkResponse>> {
    let dest = request.dest.as_deref().filter(|d| !d.trim().is_empty());
    state.files.extract_archive(&id, &request.path, dest).await?;
    Ok(OkResponse::ok())
}

/// POST /api/containers/{id}/files/compress
pub async fn compress_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CompressRequest>,
) -> ApiResult<Json<PathResponse>> {
    let path = state
        .files
        .compress(&id, &request.dir, &request.items, &request.archive_name)
        .await?;
    Ok(Json(PathResponse { ok: true, path }))
}
