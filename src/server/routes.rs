//! HTTP handlers (§6). Thin glue over C1/C2/C3/C5/C6 — no business logic
//! lives here, per the teacher's own framing of this layer: handlers call a
//! store/registry method and render JSON.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::state::{format_uptime, AppState};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: String,
    timestamp: i64,
}

fn unix_now() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_secs() as i64
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let missing = state.config.validate_required().unwrap_or_else(|_| vec!["<config unreachable>".into()]);
    if !missing.is_empty() {
        let body = HealthResponse {
            status: "unhealthy",
            message: format!("missing required config: {}", missing.join(", ")),
            timestamp: unix_now(),
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body));
    }
    (StatusCode::OK, Json(HealthResponse { status: "ok", message: "healthy".into(), timestamp: unix_now() }))
}

#[derive(Serialize)]
struct SystemStatus {
    uptime_seconds: u64,
    uptime_human: String,
    memory_used_bytes: u64,
    memory_total_bytes: u64,
    cpu_usage_percent: f32,
    disk_used_bytes: u64,
    disk_total_bytes: u64,
    build_hash: String,
}

pub async fn system_status(State(state): State<AppState>) -> impl IntoResponse {
    let mut sys = sysinfo::System::new_all();
    sys.refresh_all();
    let pid = sysinfo::Pid::from(std::process::id() as usize);
    let memory_used = sys.process(pid).map(|p| p.memory()).unwrap_or(0);

    let disks = sysinfo::Disks::new_with_refreshed_list();
    let (disk_used, disk_total) = disks
        .list()
        .first()
        .map(|d| (d.total_space() - d.available_space(), d.total_space()))
        .unwrap_or((0, 0));

    let elapsed = state.start_time.elapsed();
    Json(SystemStatus {
        uptime_seconds: elapsed.as_secs(),
        uptime_human: format_uptime(elapsed),
        memory_used_bytes: memory_used,
        memory_total_bytes: sys.total_memory(),
        cpu_usage_percent: sys.global_cpu_usage(),
        disk_used_bytes: disk_used,
        disk_total_bytes: disk_total,
        build_hash: state.build_hash.clone(),
    })
}

pub async fn command_statuses(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.command_statuses() {
        Ok(statuses) => (StatusCode::OK, Json(statuses)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn trigger_command(Path(name): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.trigger_now(&name).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => (StatusCode::CONFLICT, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
pub struct RecentExecutionsQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ExecutionView {
    #[serde(flatten)]
    execution: crate::registry::Execution,
    is_running: bool,
}

pub async fn recent_executions(State(state): State<AppState>, Query(q): Query<RecentExecutionsQuery>) -> impl IntoResponse {
    let limit = q.limit.unwrap_or(50);
    match state.registry.list_recent(limit) {
        Ok(executions) => {
            let views: Vec<_> = executions
                .into_iter()
                .map(|e| ExecutionView { is_running: e.status == crate::registry::ExecutionStatus::Running, execution: e })
                .collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
pub struct CacheStatsQuery {
    target: String,
}

#[derive(Serialize)]
struct CacheStatsView {
    target: String,
    response_cache: crate::cache::CacheStats,
    library_cache: crate::library_cache::LibraryCacheStats,
}

pub async fn cache_stats(State(state): State<AppState>, Query(q): Query<CacheStatsQuery>) -> impl IntoResponse {
    Json(CacheStatsView {
        response_cache: state.cache.stats(&q.target),
        library_cache: state.library_cache.stats(&q.target),
        target: q.target,
    })
}

pub async fn reset_cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    state.cache.reset_stats();
    StatusCode::NO_CONTENT
}

pub async fn list_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.config.get_all(true) {
        Ok(settings) => (StatusCode::OK, Json(settings)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn get_config_key(Path(key): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    match state.config.get_all(true) {
        Ok(settings) => match settings.into_iter().find(|s| s.key == key) {
            Some(setting) => (StatusCode::OK, Json(setting)).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
pub struct SetConfigBody {
    value: String,
}

pub async fn put_config_key(
    Path(key): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<SetConfigBody>,
) -> impl IntoResponse {
    match state.config.set(&key, &body.value) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(crate::config::ConfigError::UnknownKey(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e @ crate::config::ConfigError::InvalidValue { .. }) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(e @ crate::config::ConfigError::InvalidEnumOption { .. }) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn validate_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.config.validate_required() {
        Ok(missing) => Json(serde_json::json!({ "missing": missing })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn refresh_config(State(state): State<AppState>) -> impl IntoResponse {
    state.config.refresh();
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
struct ConnectivityResult {
    service: String,
    success: bool,
    message: String,
    error: Option<String>,
}

pub async fn test_connectivity(State(state): State<AppState>) -> impl IntoResponse {
    let mut results = Vec::with_capacity(state.connectivity_probes.len());
    for probe in state.connectivity_probes.iter() {
        let service = probe.service_name().to_string();
        match probe.test_connection().await {
            Ok(true) => results.push(ConnectivityResult { service, success: true, message: "reachable".into(), error: None }),
            Ok(false) => results.push(ConnectivityResult {
                service,
                success: false,
                message: "unreachable".into(),
                error: None,
            }),
            Err(e) => results.push(ConnectivityResult { service, success: false, message: "error".into(), error: Some(e.to_string()) }),
        }
    }
    Json(results)
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum ArtifactStatus {
    Missing,
    Empty,
    NoNewArtists,
    Fresh,
    Stale,
    VeryStale,
}

#[derive(Serialize)]
struct ArtifactMetrics {
    exists: bool,
    entry_count: usize,
    file_size: u64,
    file_mtime: Option<i64>,
    age_hours: Option<f64>,
    age_human: String,
    status: ArtifactStatus,
}

fn artifact_metrics(path: &std::path::Path) -> ArtifactMetrics {
    let Ok(metadata) = std::fs::metadata(path) else {
        return ArtifactMetrics {
            exists: false,
            entry_count: 0,
            file_size: 0,
            file_mtime: None,
            age_hours: None,
            age_human: "never".into(),
            status: ArtifactStatus::Missing,
        };
    };

    let contents = std::fs::read_to_string(path).unwrap_or_default();
    let entry_count = serde_json::from_str::<Vec<serde_json::Value>>(&contents).map(|v| v.len()).unwrap_or(0);

    let mtime = metadata.modified().ok().and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64);
    let age_hours = mtime.map(|m| (unix_now() - m) as f64 / 3600.0);

    let status = match (entry_count, age_hours) {
        (0, _) => ArtifactStatus::Empty,
        (_, Some(h)) if h < 25.0 => ArtifactStatus::Fresh,
        (_, Some(h)) if h < 72.0 => ArtifactStatus::Stale,
        (_, Some(_)) => ArtifactStatus::VeryStale,
        (_, None) => ArtifactStatus::NoNewArtists,
    };

    ArtifactMetrics {
        exists: true,
        entry_count,
        file_size: metadata.len(),
        file_mtime: mtime,
        age_human: age_hours.map(|h| format!("{h:.1}h")).unwrap_or_else(|| "unknown".into()),
        age_hours,
        status,
    }
}

pub async fn import_list_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let mut out = HashMap::new();
    let entries = std::fs::read_dir(&state.discovery_artifacts_dir).into_iter().flatten().flatten();
    for entry in entries {
        if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
            out.insert(stem.to_string(), artifact_metrics(&entry.path()));
        }
    }
    Json(out)
}

pub async fn import_list(Path(name): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    let path = state.discovery_artifacts_dir.join(format!("{name}.json"));
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<serde_json::Value>(&contents) {
            Ok(value) => (StatusCode::OK, Json(value)).into_response(),
            Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "artifact file is not valid JSON").into_response(),
        },
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Deserialize)]
pub struct NewReleasesQuery {
    artist_limit: Option<usize>,
    album_types: Option<String>,
}

#[derive(Serialize)]
struct MissingRelease {
    artist: String,
    title: String,
    release_type: String,
    harmony_url: String,
}

fn harmony_url(artist: &str, title: &str) -> String {
    format!(
        "https://harmony.pulsewidth.org.uk/release?artist={}&title={}",
        urlencoding_like(artist),
        urlencoding_like(title)
    )
}

fn urlencoding_like(s: &str) -> String {
    s.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '+' }).collect()
}

/// Samples up to `artist_limit` managed artists, pulls each one's recent
/// releases from the streaming provider, and flags releases the metadata
/// service doesn't know about yet (by title, case-insensitive).
pub async fn new_releases(State(state): State<AppState>, Query(q): Query<NewReleasesQuery>) -> impl IntoResponse {
    let (Some(source), Some(manager), Some(metadata)) =
        (state.new_release_source.as_ref(), state.manager.as_ref(), state.metadata.as_ref())
    else {
        return (StatusCode::SERVICE_UNAVAILABLE, "new-releases requires a configured manager, metadata, and streaming client").into_response();
    };

    let album_types: Vec<String> = q.album_types.map(|s| s.split(',').map(str::to_string).collect()).unwrap_or_else(|| vec!["album".into()]);
    let limit = q.artist_limit.unwrap_or(20);

    let artists = match manager.list_artists().await {
        Ok(a) => a,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let mut missing = Vec::new();
    for artist in artists.into_iter().take(limit) {
        let releases = match source.recent_releases(&artist.name, &album_types).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        if releases.is_empty() {
            continue;
        }

        let known_titles: std::collections::HashSet<String> = match metadata.artist_release_groups(&artist.identifier).await {
            Ok(Some(groups)) => groups.into_iter().map(|t| t.to_lowercase()).collect(),
            Ok(None) | Err(_) => continue, // transient metadata error: skip rather than false-flag
        };

        for release in releases {
            if known_titles.contains(&release.title.to_lowercase()) {
                continue;
            }
            missing.push(MissingRelease {
                harmony_url: harmony_url(&artist.name, &release.title),
                artist: artist.name.clone(),
                title: release.title,
                release_type: release.release_type,
            });
        }
    }

    Json(missing).into_response()
}
