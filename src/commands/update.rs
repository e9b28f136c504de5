use crate::commands::brew::{validate_entity_name, BrewOp};
use crate::error::Result;
use crate::models::OperationRecord;
use crate::orchestrator;
use crate::state::AppState;
use std::sync::Arc;

/// Upgrades a specific formula or cask.
pub async fn update_package(state: Arc<AppState>, name: &str) -> Result<Option<OperationRecord>> {
    let name = validate_entity_name(name)?.to_string();
    log::info!("Upgrading '{}'", name);
    orchestrator::execute(state, BrewOp::Upgrade { name }).await
}

/// Upgrades everything that is outdated.
pub async fn update_all_packages(state: Arc<AppState>) -> Result<Option<OperationRecord>> {
    log::info!("Upgrading all packages");
    orchestrator::execute(state, BrewOp::UpgradeAll).await
}

/// Upgrades the given names in one brew run.
pub async fn update_selected_packages(
    state: Arc<AppState>,
    names: &[String],
) -> Result<Option<OperationRecord>> {
    let names = names
        .iter()
        .map(|name| validate_entity_name(name).map(String::from))
        .collect::<Result<Vec<_>>>()?;
    log::info!("Upgrading {} selected packages", names.len());
    orchestrator::execute(state, BrewOp::UpgradeSelected { names }).await
}
