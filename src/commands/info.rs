//! Fetching detailed information about a single entity for the details panel.
use crate::commands::views::args;
use crate::error::Result;
use crate::inventory::decode;
use crate::models::Entity;
use crate::request_guard::RequestId;
use crate::state::AppState;
use std::sync::Arc;

/// Opens the details panel for `name` and starts loading it in the
/// background. Returns the identity of the new request.
pub fn request_details(state: &Arc<AppState>, name: &str) -> RequestId {
    let id = begin_details(state, name);
    let state = Arc::clone(state);
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = fetch_details(&state, id, &name).await {
            log::warn!("Details for '{}' failed: {}", name, e);
        }
    });
    id
}

/// Like `request_details`, but waits for the result. `None` means a newer
/// request (or closing the panel) superseded this one.
pub async fn show_details(state: &Arc<AppState>, name: &str) -> Result<Option<Entity>> {
    let id = begin_details(state, name);
    fetch_details(state, id, name).await
}

fn begin_details(state: &AppState, name: &str) -> RequestId {
    let id = state.details_guard.next_request_id();
    state.with_details(|panel| panel.begin(id, name));
    log::debug!("Details request {} for '{}'", id, name);
    id
}

/// Loads details for request `id`, from the cache when possible.
///
/// The identity is checked again when the response arrives; a stale response
/// is dropped without touching the cache or the panel.
pub async fn fetch_details(state: &AppState, id: RequestId, name: &str) -> Result<Option<Entity>> {
    let cached = state.inventory.lock().await.cached_details(name);
    let entity = match cached {
        Some(entity) => entity,
        None => {
            let fetched = state
                .runner()
                .invoke("info", &args(&["--json=v2", name]))
                .await
                .and_then(|value| decode::info_entity(&value, name));

            if !state.details_guard.is_current(id) {
                log::debug!("Discarding stale details for '{}' (request {})", name, id);
                return Ok(None);
            }
            match fetched {
                Ok(entity) => state.inventory.lock().await.cache_details(entity),
                Err(e) => {
                    state.with_details(|panel| panel.fail(id, e.to_string()));
                    return Err(e);
                }
            }
        }
    };
    Ok(apply_details(state, id, entity))
}

/// Shows `entity` in the panel if `id` is still the current request.
pub fn apply_details(state: &AppState, id: RequestId, entity: Entity) -> Option<Entity> {
    if !state.details_guard.is_current(id) {
        return None;
    }
    state.with_details(|panel| panel.show(id, entity.clone()));
    Some(entity)
}

/// Closes the panel. Every in-flight request becomes stale.
pub fn close_details(state: &AppState) {
    state.details_guard.invalidate_all();
    state.with_details(|panel| panel.close());
}

/// Formats an entity as label/value rows for plain-text display.
pub fn detail_rows(entity: &Entity) -> Vec<(String, String)> {
    let mut rows = vec![("Name".to_string(), entity.name.clone())];
    let mut push = |label: &str, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            rows.push((label.to_string(), value));
        }
    };
    push("Description", entity.description.clone());
    push("Homepage", entity.homepage.clone());
    push("Installed", entity.installed_version.clone());
    push("Latest", entity.latest_version.clone());
    push("Size", entity.size_kb.map(format_size));
    push("Dependencies", Some(entity.dependencies.join(", ")));
    push("Conflicts", Some(entity.conflicts.join(", ")));
    push("Warning", entity.warning.clone());
    rows
}

fn format_size(kb: u64) -> String {
    match kb {
        kb if kb >= 1024 * 1024 => format!("{:.1} GB", kb as f64 / (1024.0 * 1024.0)),
        kb if kb >= 1024 => format!("{:.1} MB", kb as f64 / 1024.0),
        kb => format!("{} KB", kb),
    }
}
