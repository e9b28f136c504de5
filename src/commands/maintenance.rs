//! Whole-installation maintenance: self-update, cleanup and doctor.
use crate::commands::brew::BrewOp;
use crate::error::Result;
use crate::models::OperationRecord;
use crate::orchestrator;
use crate::state::AppState;
use std::sync::Arc;

/// Updates Homebrew itself and its taps (`brew update`).
pub async fn self_update(state: Arc<AppState>) -> Result<Option<OperationRecord>> {
    log::info!("Updating Homebrew");
    orchestrator::execute(state, BrewOp::SelfUpdate).await
}

/// Removes stale downloads and old versions.
pub async fn cleanup(state: Arc<AppState>) -> Result<Option<OperationRecord>> {
    log::info!("Running cleanup");
    orchestrator::execute(state, BrewOp::Cleanup).await
}

/// Runs `brew doctor`. Warnings make brew exit non-zero, so a failed record
/// here usually just means "there is something to read in the log".
pub async fn doctor(state: Arc<AppState>) -> Result<Option<OperationRecord>> {
    log::info!("Running brew doctor");
    orchestrator::execute(state, BrewOp::Doctor).await
}
