//! Command for uninstalling formulae and casks.
use crate::commands::brew::{known_kind, validate_entity_name, BrewOp};
use crate::error::Result;
use crate::models::{EntityKind, OperationRecord};
use crate::orchestrator;
use crate::state::AppState;
use std::sync::Arc;

/// Uninstalls `name`, passing `--cask` when the inventory knows it as one.
pub async fn uninstall_package(
    state: Arc<AppState>,
    name: &str,
) -> Result<Option<OperationRecord>> {
    let name = validate_entity_name(name)?.to_string();
    let cask = known_kind(&state, &name).await == Some(EntityKind::Cask);

    log::info!("Uninstalling '{}'", name);
    orchestrator::execute(state, BrewOp::Uninstall { name, cask }).await
}
