//! Commands for adding and removing taps (third-party repositories).
use crate::commands::brew::{validate_tap_name, BrewOp};
use crate::error::{EngineError, Result};
use crate::models::{OperationRecord, OperationStatus};
use crate::orchestrator;
use crate::state::AppState;
use std::sync::Arc;

/// Adds a tap. A newly tapped repository's formulae show up in the
/// available views once they are next visited or refreshed.
pub async fn tap_repository(state: Arc<AppState>, name: &str) -> Result<Option<OperationRecord>> {
    let name = validate_tap_name(name)?.to_string();
    log::info!("Tapping '{}'", name);
    orchestrator::execute(state, BrewOp::Tap { name }).await
}

/// Removes a tap.
///
/// When installed entities still come from the tap, brew refuses; this is
/// reported as `EngineError::Blocked` carrying their names so the caller can
/// offer to uninstall them first. The record stays in the operation book.
pub async fn untap_repository(
    state: Arc<AppState>,
    name: &str,
) -> Result<Option<OperationRecord>> {
    let name = validate_tap_name(name)?.to_string();
    log::info!("Untapping '{}'", name);
    let record = orchestrator::execute(state, BrewOp::Untap { name: name.clone() }).await?;

    match record {
        Some(record) if record.status == OperationStatus::Blocked => {
            log::warn!(
                "Untap of '{}' blocked by {} installed item(s)",
                name,
                record.remediation.len()
            );
            Err(EngineError::Blocked {
                repository: name,
                blockers: record.remediation,
            })
        }
        other => Ok(other),
    }
}
