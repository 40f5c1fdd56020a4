//! qBittorrent-compatible Web API (compatibility shim)
//!
//! Automation clients that only speak the qBittorrent v2 protocol drive the
//! internal download engine through this facade. The response shapes are
//! field-for-field what those clients hard-code: the login endpoint answers
//! the literal tokens `Ok.`/`Fails.`, hash lists are `|`-joined (or the
//! literal `all`), and unknown ETAs use the protocol's 8640000 sentinel.
//!
//! Protocol-compatibility rule: internal failures are translated into the
//! exact token or empty body the legacy protocol expects, even where that
//! carries less information than we have.

use std::collections::HashMap;

use axum::{
    Router,
    extract::{Multipart, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::AppState;
use crate::container;
use crate::db::jobs::{DownloadJob, JobState};

/// The protocol's "infinite ETA" sentinel (100 days, in seconds).
const ETA_INFINITE: i64 = 8_640_000;

const API_VERSION: &str = "2.9.3";
const APP_VERSION: &str = "v4.6.3";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v2/auth/login", post(login))
        .route("/api/v2/auth/logout", get(logout).post(logout))
        .route("/api/v2/app/version", get(app_version))
        .route("/api/v2/app/webapiVersion", get(webapi_version))
        .route("/api/v2/app/preferences", get(preferences))
        .route("/api/v2/torrents/info", get(torrents_info))
        .route("/api/v2/torrents/properties", get(torrents_properties))
        .route("/api/v2/torrents/add", post(torrents_add))
        .route("/api/v2/torrents/pause", post(torrents_pause))
        .route("/api/v2/torrents/resume", post(torrents_resume))
        .route("/api/v2/torrents/delete", post(torrents_delete))
        .route("/api/v2/torrents/categories", get(categories))
        .route("/api/v2/torrents/createCategory", post(create_category))
}

/// Deterministic 40-hex-char job hash from the download link, so adding
/// the same link twice lands on the same job.
fn job_hash(link: &str) -> String {
    let digest = Sha256::digest(link.as_bytes());
    digest
        .iter()
        .take(20)
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn sid_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|c| {
        let (name, value) = c.trim().split_once('=')?;
        (name == "SID").then(|| value.to_string())
    })
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    match sid_from_headers(headers) {
        Some(sid) => state.sessions.read().contains(&sid),
        None => false,
    }
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}

// ---- auth ----

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    axum::extract::Form(form): axum::extract::Form<LoginForm>,
) -> Response {
    let ok = form.username == state.config.shim_username
        && form.password == state.config.shim_password;

    if !ok {
        // The protocol wants the literal token with a 200, not a 401.
        return (StatusCode::OK, "Fails.").into_response();
    }

    let sid = uuid::Uuid::new_v4().simple().to_string();
    state.sessions.write().insert(sid.clone());

    (
        StatusCode::OK,
        [(
            header::SET_COOKIE,
            format!("SID={}; HttpOnly; Path=/", sid),
        )],
        "Ok.",
    )
        .into_response()
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(sid) = sid_from_headers(&headers) {
        state.sessions.write().remove(&sid);
    }
    StatusCode::OK.into_response()
}

// ---- app ----

async fn app_version(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    APP_VERSION.into_response()
}

async fn webapi_version(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    API_VERSION.into_response()
}

async fn preferences(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    axum::Json(serde_json::json!({
        "save_path": state.config.downloads_path,
        "temp_path_enabled": true,
        "temp_path": state.config.incomplete_path,
        "max_active_downloads": state.config.max_concurrent_downloads,
        "dht": false,
        "pex": false,
        "lsd": false,
    }))
    .into_response()
}

// ---- torrents ----

/// The wire shape of one job in `torrents/info`.
#[derive(Debug, Serialize)]
struct TorrentInfo {
    hash: String,
    name: String,
    size: i64,
    total_size: i64,
    progress: f64,
    dlspeed: i64,
    upspeed: i64,
    downloaded: i64,
    amount_left: i64,
    eta: i64,
    state: String,
    category: String,
    save_path: String,
    content_path: String,
    added_on: i64,
    completion_on: i64,
    num_seeds: i64,
    num_leechs: i64,
    ratio: f64,
    priority: i64,
}

/// Map internal job state onto the protocol's state enum.
fn wire_state(state: JobState) -> &'static str {
    match state {
        JobState::Queued => "queuedDL",
        JobState::Checking => "checkingDL",
        JobState::Downloading => "downloading",
        JobState::Paused => "pausedDL",
        JobState::Completed => "pausedUP",
        JobState::Error => "error",
        JobState::Stalled => "stalledDL",
    }
}

fn to_wire(job: &DownloadJob) -> TorrentInfo {
    let state = job.state();
    let progress = if job.total_size > 0 {
        (job.downloaded_size as f64 / job.total_size as f64).min(1.0)
    } else if state == JobState::Completed {
        1.0
    } else {
        0.0
    };

    let eta = if state == JobState::Downloading && job.download_speed > 0 && job.total_size > 0 {
        ((job.total_size - job.downloaded_size).max(0)) / job.download_speed
    } else {
        ETA_INFINITE
    };

    TorrentInfo {
        hash: job.hash.clone(),
        name: job.name.clone(),
        size: job.total_size,
        total_size: job.total_size,
        progress,
        dlspeed: job.download_speed,
        upspeed: 0,
        downloaded: job.downloaded_size,
        amount_left: (job.total_size - job.downloaded_size).max(0),
        eta,
        state: wire_state(state).to_string(),
        category: job.category.clone().unwrap_or_default(),
        save_path: job.save_path.clone(),
        content_path: format!("{}/{}", job.save_path.trim_end_matches('/'), job.name),
        added_on: job.added_at.timestamp(),
        completion_on: job.completed_at.map(|t| t.timestamp()).unwrap_or(-1),
        num_seeds: 0,
        num_leechs: 0,
        ratio: 0.0,
        priority: job.priority,
    }
}

#[derive(Debug, Deserialize, Default)]
struct InfoParams {
    filter: Option<String>,
    category: Option<String>,
    sort: Option<String>,
    reverse: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    hashes: Option<String>,
}

fn filter_matches(filter: &str, state: JobState) -> bool {
    match filter {
        "all" => true,
        "downloading" => matches!(
            state,
            JobState::Queued | JobState::Checking | JobState::Downloading | JobState::Stalled
        ),
        "completed" => state == JobState::Completed,
        "paused" => state == JobState::Paused,
        "active" => state.is_active(),
        "stalled" => state == JobState::Stalled,
        "errored" => state == JobState::Error,
        _ => true,
    }
}

async fn torrents_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<InfoParams>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }

    let jobs = match state.db.jobs().list().await {
        Ok(jobs) => jobs,
        Err(e) => {
            warn!(error = %e, "Failed to list jobs");
            return axum::Json(Vec::<TorrentInfo>::new()).into_response();
        }
    };

    let wanted_hashes: Option<Vec<&str>> = params
        .hashes
        .as_ref()
        .map(|h| h.split('|').collect());

    let mut infos: Vec<TorrentInfo> = jobs
        .iter()
        .filter(|job| {
            if let Some(ref hashes) = wanted_hashes
                && !hashes.contains(&job.hash.as_str())
            {
                return false;
            }
            if let Some(ref category) = params.category
                && job.category.as_deref().unwrap_or("") != category
            {
                return false;
            }
            filter_matches(params.filter.as_deref().unwrap_or("all"), job.state())
        })
        .map(to_wire)
        .collect();

    match params.sort.as_deref() {
        Some("name") => infos.sort_by(|a, b| a.name.cmp(&b.name)),
        Some("size") => infos.sort_by_key(|i| i.size),
        Some("progress") => infos.sort_by(|a, b| a.progress.total_cmp(&b.progress)),
        _ => infos.sort_by_key(|i| i.added_on),
    }
    if params.reverse.as_deref() == Some("true") {
        infos.reverse();
    }

    let offset = params.offset.unwrap_or(0);
    let infos: Vec<TorrentInfo> = infos
        .into_iter()
        .skip(offset)
        .take(params.limit.unwrap_or(usize::MAX))
        .collect();

    axum::Json(infos).into_response()
}

#[derive(Debug, Deserialize)]
struct PropertiesParams {
    hash: String,
}

async fn torrents_properties(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PropertiesParams>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }

    match state.db.jobs().get(&params.hash).await {
        Ok(Some(job)) => axum::Json(serde_json::json!({
            "hash": job.hash,
            "save_path": job.save_path,
            "total_size": job.total_size,
            "total_downloaded": job.downloaded_size,
            "dl_speed": job.download_speed,
            "eta": ETA_INFINITE,
            "addition_date": job.added_at.timestamp(),
            "start_date": job.started_at.map(|t| t.timestamp()).unwrap_or(-1),
            "completion_date": job.completed_at.map(|t| t.timestamp()).unwrap_or(-1),
            "comment": job.original_link,
            // Additive diagnostics; protocol clients ignore unknown keys.
            "download_link": job.effective_link(),
            "status_message": job.status_message,
            "error_message": job.error_message,
        }))
        .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn torrents_add(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }

    let mut urls: Vec<String> = vec![];
    let mut uploads: Vec<Vec<u8>> = vec![];
    let mut category: Option<String> = None;
    let mut savepath: Option<String> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "urls" => {
                if let Ok(text) = field.text().await {
                    urls.extend(
                        text.lines()
                            .map(|l| l.trim().to_string())
                            .filter(|l| !l.is_empty()),
                    );
                }
            }
            "torrents" => {
                if let Ok(bytes) = field.bytes().await {
                    uploads.push(bytes.to_vec());
                }
            }
            "category" => category = field.text().await.ok().filter(|s| !s.is_empty()),
            "savepath" => savepath = field.text().await.ok().filter(|s| !s.is_empty()),
            _ => {}
        }
    }

    // Uploaded placeholders decode to (url, name); bare URLs fall back to
    // their last path segment as a name.
    let mut entries: Vec<(String, String, i64)> = vec![];
    for upload in &uploads {
        match container::decode(upload) {
            Some(payload) => {
                let name = payload
                    .name
                    .unwrap_or_else(|| "download".to_string());
                entries.push((payload.url, name, payload.length.unwrap_or(0)));
            }
            None => {
                warn!("Uploaded torrent carries no download URL");
            }
        }
    }
    for url in urls {
        let name = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("download")
            .to_string();
        entries.push((url, name, 0));
    }

    if entries.is_empty() {
        // 415 is what the real client answers for an unusable payload.
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Fails.").into_response();
    }

    let save_path = match (&savepath, &category) {
        (Some(path), _) => path.clone(),
        (None, Some(cat)) => match state.db.categories().get(cat).await {
            Ok(Some(c)) => c.save_path,
            _ => state.config.downloads_path.clone(),
        },
        (None, None) => state.config.downloads_path.clone(),
    };

    for (url, name, size) in entries {
        let hash = job_hash(&url);
        match state
            .db
            .jobs()
            .insert(&hash, &name, &url, &save_path, category.as_deref(), size)
            .await
        {
            Ok(true) => debug!(hash = %hash, name = %name, "Job added"),
            Ok(false) => debug!(hash = %hash, "Job already known"),
            Err(e) => warn!(error = %e, "Failed to persist job"),
        }
    }

    state.engine.tick().await;
    (StatusCode::OK, "Ok.").into_response()
}

#[derive(Debug, Deserialize)]
struct HashesForm {
    hashes: String,
    #[serde(rename = "deleteFiles")]
    delete_files: Option<String>,
}

/// Expand the `|`-joined hash list, honoring the literal `all`.
async fn expand_hashes(state: &AppState, hashes: &str) -> Vec<String> {
    if hashes == "all" {
        match state.db.jobs().list().await {
            Ok(jobs) => jobs.into_iter().map(|j| j.hash).collect(),
            Err(_) => vec![],
        }
    } else {
        hashes
            .split('|')
            .filter(|h| !h.is_empty())
            .map(|h| h.to_string())
            .collect()
    }
}

async fn torrents_pause(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Form(form): axum::extract::Form<HashesForm>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    for hash in expand_hashes(&state, &form.hashes).await {
        if let Err(e) = state.engine.pause(&hash).await {
            warn!(hash = %hash, error = %e, "Pause failed");
        }
    }
    StatusCode::OK.into_response()
}

async fn torrents_resume(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Form(form): axum::extract::Form<HashesForm>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    for hash in expand_hashes(&state, &form.hashes).await {
        if let Err(e) = state.engine.resume(&hash).await {
            warn!(hash = %hash, error = %e, "Resume failed");
        }
    }
    state.engine.tick().await;
    StatusCode::OK.into_response()
}

async fn torrents_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Form(form): axum::extract::Form<HashesForm>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    let delete_files = form.delete_files.as_deref() == Some("true");
    for hash in expand_hashes(&state, &form.hashes).await {
        if let Err(e) = state.engine.delete(&hash, delete_files).await {
            warn!(hash = %hash, error = %e, "Delete failed");
        }
    }
    StatusCode::OK.into_response()
}

// ---- categories ----

#[derive(Debug, Serialize)]
struct CategoryInfo {
    name: String,
    #[serde(rename = "savePath")]
    save_path: String,
}

async fn categories(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }

    let mut map: HashMap<String, CategoryInfo> = HashMap::new();
    if let Ok(list) = state.db.categories().list().await {
        for cat in list {
            map.insert(
                cat.name.clone(),
                CategoryInfo {
                    name: cat.name,
                    save_path: cat.save_path,
                },
            );
        }
    }
    axum::Json(map).into_response()
}

#[derive(Debug, Deserialize)]
struct CreateCategoryForm {
    category: String,
    #[serde(rename = "savePath")]
    save_path: Option<String>,
}

async fn create_category(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Form(form): axum::extract::Form<CreateCategoryForm>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    if form.category.is_empty() {
        return (StatusCode::BAD_REQUEST, "category name is empty").into_response();
    }

    // A category owns a destination subdirectory on disk.
    let save_path = form.save_path.filter(|s| !s.is_empty()).unwrap_or_else(|| {
        format!(
            "{}/{}",
            state.config.downloads_path.trim_end_matches('/'),
            sanitize_filename::sanitize(&form.category)
        )
    });

    if let Err(e) = tokio::fs::create_dir_all(&save_path).await {
        warn!(path = %save_path, error = %e, "Failed to provision category directory");
        return (StatusCode::CONFLICT, "unable to create save path").into_response();
    }
    if let Err(e) = state.db.categories().upsert(&form.category, &save_path).await {
        warn!(error = %e, "Failed to persist category");
        return (StatusCode::CONFLICT, "unable to persist category").into_response();
    }

    StatusCode::OK.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_hash_is_stable_40_hex() {
        let a = job_hash("https://host/file");
        let b = job_hash("https://host/file");
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(job_hash("https://host/other"), a);
    }

    #[test]
    fn test_wire_state_mapping() {
        assert_eq!(wire_state(JobState::Queued), "queuedDL");
        assert_eq!(wire_state(JobState::Downloading), "downloading");
        assert_eq!(wire_state(JobState::Paused), "pausedDL");
        assert_eq!(wire_state(JobState::Completed), "pausedUP");
        assert_eq!(wire_state(JobState::Stalled), "stalledDL");
        assert_eq!(wire_state(JobState::Error), "error");
    }

    #[test]
    fn test_filter_matches() {
        assert!(filter_matches("all", JobState::Error));
        assert!(filter_matches("downloading", JobState::Queued));
        assert!(!filter_matches("downloading", JobState::Completed));
        assert!(filter_matches("completed", JobState::Completed));
        assert!(filter_matches("paused", JobState::Paused));
    }

    #[test]
    fn test_eta_sentinel_without_speed() {
        let job = DownloadJob {
            hash: "h".into(),
            name: "n".into(),
            original_link: "l".into(),
            resolved_link: None,
            save_path: "/d".into(),
            total_size: 100,
            downloaded_size: 10,
            download_speed: 0,
            state: "downloading".into(),
            status_message: None,
            error_message: None,
            added_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
            category: None,
            priority: 0,
            stall_requeued: 0,
        };
        assert_eq!(to_wire(&job).eta, ETA_INFINITE);
    }
}
