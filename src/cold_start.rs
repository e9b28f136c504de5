use crate::commands::views::refresh_view;
use crate::models::ViewKind;
use crate::state::AppState;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub const EVENT_INVENTORY_READY: &str = "inventory-ready";

/// Views loaded before the UI is told the inventory is ready. The available
/// listings stay lazy.
const COLD_START_VIEWS: [ViewKind; 4] = [
    ViewKind::Installed,
    ViewKind::Outdated,
    ViewKind::Leaves,
    ViewKind::Repositories,
];

/// Performs cold start initialization, ensuring it only runs once.
///
/// Emits `inventory-ready` with `true` or `false`. A repeated call after
/// success only re-emits the event so late listeners receive it; after a
/// failure the next call retries.
pub async fn run_cold_start(state: Arc<AppState>) -> bool {
    if state.cold_start_done.swap(true, Ordering::SeqCst) {
        log::info!("Cold start previously completed. Re-emitting ready event.");
        state.bus().emit(EVENT_INVENTORY_READY, json!(true));
        return true;
    }

    log::info!("Loading inventory during cold start...");
    let mut failed = Vec::new();
    for view in COLD_START_VIEWS {
        match refresh_view(&state, view).await {
            Ok(count) => log::info!("Prefetched {} {} entries", count, view.as_str()),
            Err(e) => {
                log::error!("Failed to prefetch the {} view: {}", view.as_str(), e);
                failed.push(view.as_str());
            }
        }
    }

    let success = failed.is_empty();
    if success {
        log::info!("Cold start initialization completed successfully");
    } else {
        // On failure, reset the flag to allow a retry on the next call.
        state.cold_start_done.store(false, Ordering::SeqCst);
        log::warn!("Cold start incomplete; failed views: {}", failed.join(", "));
    }
    state.bus().emit(EVENT_INVENTORY_READY, json!(success));
    success
}

/// Returns whether the cold start sequence has completed successfully.
pub fn is_cold_start_ready(state: &AppState) -> bool {
    state.cold_start_done.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{harness, record};

    #[tokio::test]
    async fn loads_eager_views_then_signals_ready() {
        let h = harness();
        h.runner
            .respond("list --formula --versions", json!([["wget", "1.24.5"]]));
        h.runner.respond("tap", json!([["homebrew/core"]]));
        let (ready, _sub) = record(&h.bus, EVENT_INVENTORY_READY);

        assert!(run_cold_start(h.state.clone()).await);
        assert!(is_cold_start_ready(&h.state));
        {
            let inventory = h.state.inventory.lock().await;
            for view in COLD_START_VIEWS {
                assert!(inventory.is_loaded(view), "{} not loaded", view.as_str());
            }
            assert!(!inventory.is_loaded(ViewKind::Available));
        }

        // A second call only repeats the signal.
        assert!(run_cold_start(h.state.clone()).await);
        assert_eq!(h.runner.count("tap"), 1);
        assert_eq!(*ready.lock().unwrap(), vec![json!(true), json!(true)]);
    }

    #[tokio::test]
    async fn failure_allows_a_retry() {
        let h = harness();
        h.runner.respond("leaves", json!([["Error", "boom"]]));
        h.runner.respond("leaves", json!([["jq"]]));
        let (ready, _sub) = record(&h.bus, EVENT_INVENTORY_READY);

        assert!(!run_cold_start(h.state.clone()).await);
        assert!(!is_cold_start_ready(&h.state));
        assert!(run_cold_start(h.state.clone()).await);
        assert_eq!(*ready.lock().unwrap(), vec![json!(false), json!(true)]);
    }
}
