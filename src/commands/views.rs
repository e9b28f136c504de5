//! Loading, refreshing and enriching the inventory views.
use crate::commands::runner::CommandRunner;
use crate::error::Result;
use crate::inventory::{decode, sizes};
use crate::models::{EntityKind, OperationFamily, ViewEntries, ViewKind, ViewSnapshot};
use crate::state::AppState;
use std::sync::Arc;

pub(crate) fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|a| a.to_string()).collect()
}

/// Runs the queries behind `view` and decodes them. Nothing is stored.
pub async fn fetch_view(runner: &dyn CommandRunner, view: ViewKind) -> Result<ViewEntries> {
    let entries = match view {
        ViewKind::Installed => {
            let formulae = runner
                .invoke("list", &args(&["--formula", "--versions"]))
                .await?;
            let casks = runner
                .invoke("list", &args(&["--cask", "--versions"]))
                .await?;
            let mut entities = decode::installed_entities(&formulae, EntityKind::Formula)?;
            entities.extend(decode::installed_entities(&casks, EntityKind::Cask)?);
            ViewEntries::Entities(entities)
        }
        ViewKind::Outdated => {
            let formulae = runner
                .invoke("outdated", &args(&["--formula", "--verbose"]))
                .await?;
            let casks = runner
                .invoke("outdated", &args(&["--cask", "--verbose"]))
                .await?;
            let mut entities = decode::outdated_entities(&formulae, EntityKind::Formula)?;
            entities.extend(decode::outdated_entities(&casks, EntityKind::Cask)?);
            ViewEntries::Entities(entities)
        }
        ViewKind::Available => {
            let listing = runner.invoke("formulae", &[]).await?;
            ViewEntries::Entities(decode::name_entities(&listing, EntityKind::Formula, false)?)
        }
        ViewKind::AvailableCasks => {
            let listing = runner.invoke("casks", &[]).await?;
            ViewEntries::Entities(decode::name_entities(&listing, EntityKind::Cask, false)?)
        }
        ViewKind::Leaves => {
            let listing = runner.invoke("leaves", &[]).await?;
            ViewEntries::Entities(decode::name_entities(&listing, EntityKind::Formula, true)?)
        }
        ViewKind::Repositories => {
            let listing = runner.invoke("tap", &[]).await?;
            ViewEntries::Repositories(decode::repositories(&listing)?)
        }
    };
    Ok(entries)
}

/// Re-fetches one view and replaces its contents, unless a newer load of
/// the same view started in the meantime. Returns the entry count.
pub async fn refresh_view(state: &Arc<AppState>, view: ViewKind) -> Result<usize> {
    let ticket = state.inventory.lock().await.begin_load(view);
    let fetched = fetch_view(state.runner(), view).await;

    let applied = {
        let mut inventory = state.inventory.lock().await;
        inventory
            .apply_load(ticket, fetched)
            .map(|applied| (applied, inventory.len(view)))
    };
    state.mark_inventory_changed();

    let (applied, count) = applied.inspect_err(|e| {
        log::error!("Failed to load the {} view: {}", view.as_str(), e);
    })?;
    if applied {
        log::info!("Loaded {} entries into the {} view", count, view.as_str());
        if view == ViewKind::Installed {
            tokio::spawn(enrich_installed(Arc::clone(state)));
        }
    }
    Ok(count)
}

/// Refreshes each view in turn. Failures are recorded on the view and
/// logged; the remaining views still refresh.
pub async fn refresh_views(state: &Arc<AppState>, views: &[ViewKind]) -> usize {
    let mut failures = 0;
    for view in views {
        if refresh_view(state, *view).await.is_err() {
            failures += 1;
        }
    }
    failures
}

/// Scoped refresh after an operation of `family` finished.
///
/// Lazy views are only refreshed when they have already been loaded, and
/// cached details for the operation's targets are dropped.
pub async fn refresh_after_operation(
    state: &Arc<AppState>,
    family: OperationFamily,
    targets: &[String],
) {
    let views: Vec<ViewKind> = {
        let mut inventory = state.inventory.lock().await;
        inventory.invalidate_details(targets);
        family
            .affected_views()
            .iter()
            .copied()
            .filter(|view| !view.is_lazy() || inventory.is_loaded(*view))
            .collect()
    };
    if views.is_empty() {
        return;
    }
    log::info!(
        "Refreshing {} view(s) after '{}'",
        views.len(),
        family.key()
    );
    let failures = refresh_views(state, &views).await;
    if failures > 0 {
        log::warn!(
            "{} view(s) failed to refresh after '{}'",
            failures,
            family.key()
        );
    }
}

/// Loads `view` on first visit and returns its current contents.
pub async fn ensure_loaded(state: &Arc<AppState>, view: ViewKind) -> Result<ViewSnapshot> {
    let loaded = state.inventory.lock().await.is_loaded(view);
    if !loaded {
        refresh_view(state, view).await?;
    }
    Ok(state.inventory.lock().await.snapshot(view))
}

/// Explicit user refresh: drops the detail cache and reloads every view
/// that is loaded or non-lazy.
pub async fn refresh_all(state: &Arc<AppState>) -> usize {
    let views: Vec<ViewKind> = {
        let mut inventory = state.inventory.lock().await;
        inventory.clear_details();
        ViewKind::ALL
            .iter()
            .copied()
            .filter(|view| !view.is_lazy() || inventory.is_loaded(*view))
            .collect()
    };
    refresh_views(state, &views).await
}

/// Fills sizes and descriptions for installed entities in the background.
/// Both steps only touch the fields they provide.
pub async fn enrich_installed(state: Arc<AppState>) {
    let names: Vec<(String, EntityKind)> = state
        .inventory
        .lock()
        .await
        .entities(ViewKind::Installed)
        .into_iter()
        .map(|e| (e.name, e.kind))
        .collect();
    if names.is_empty() {
        return;
    }

    let prefix = state.prefix().to_path_buf();
    match tokio::task::spawn_blocking(move || sizes::keg_sizes(&prefix, &names)).await {
        Ok(sizes) => {
            let updated = state
                .inventory
                .lock()
                .await
                .apply_enrichment(ViewKind::Installed, &sizes);
            state.mark_inventory_changed();
            log::debug!("Measured {} installed entities", updated);
        }
        Err(e) => log::warn!("Size scan did not finish: {}", e),
    }

    let info = state
        .runner()
        .invoke("info", &args(&["--json=v2", "--installed"]))
        .await
        .and_then(|value| decode::installed_info(&value));
    match info {
        Ok(fields) => {
            let updated = state
                .inventory
                .lock()
                .await
                .apply_enrichment(ViewKind::Installed, &fields);
            state.mark_inventory_changed();
            log::debug!("Described {} installed entities", updated);
        }
        Err(e) => log::warn!("Could not load descriptions for installed entities: {}", e),
    }
}

/// Waits until `name` appears in `view` and returns its position. Used to
/// open a freshly installed entity once the refresh has landed.
pub async fn wait_for_entry(state: &AppState, view: ViewKind, name: &str) -> Option<usize> {
    let mut revisions = state.watch_inventory();
    loop {
        if let Some(position) = state.inventory.lock().await.position(view, name) {
            return Some(position);
        }
        if revisions.changed().await.is_err() {
            return None;
        }
    }
}
