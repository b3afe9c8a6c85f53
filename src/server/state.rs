//! Shared HTTP/WebSocket state.
//!
//! One `AppState` is cloned into every handler. Grounded on the teacher's
//! `ServerState`/`FromRef` pattern, trimmed to the handful of components
//! this surface actually touches (§6): no session/auth layer, since this
//! crate has no user accounts.

use crate::cache::CacheManager;
use crate::config::ConfigStore;
use crate::library_cache::LibraryCacheManager;
use crate::log_fanout::LogFanout;
use crate::registry::ExecutionRegistry;
use crate::scheduler::Scheduler;
use crate::service_client::{ConnectivityProbe, ManagerClient, MetadataClient, NewReleaseSource};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::websocket::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<dyn ConfigStore>,
    pub cache: Arc<dyn CacheManager>,
    pub library_cache: Arc<LibraryCacheManager>,
    pub registry: Arc<ExecutionRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub log_fanout: Arc<LogFanout>,
    pub connections: Arc<ConnectionRegistry>,
    pub connectivity_probes: Arc<Vec<Arc<dyn ConnectivityProbe>>>,
    pub new_release_source: Option<Arc<dyn NewReleaseSource>>,
    pub manager: Option<Arc<dyn ManagerClient>>,
    pub metadata: Option<Arc<dyn MetadataClient>>,
    pub discovery_artifacts_dir: PathBuf,
    pub start_time: Instant,
    pub build_hash: String,
}

/// `"{}d {:02}:{:02}:{:02}"`, matching the teacher's `ServerStats::format_uptime`.
pub fn format_uptime(elapsed: std::time::Duration) -> String {
    let total_secs = elapsed.as_secs();
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
}
