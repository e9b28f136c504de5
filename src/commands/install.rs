//! Command for installing formulae and casks.
use crate::commands::brew::{known_kind, validate_entity_name, BrewOp};
use crate::error::Result;
use crate::models::{EntityKind, OperationRecord};
use crate::orchestrator;
use crate::state::AppState;
use std::sync::Arc;

/// Installs `name`. When `cask` is not given, the kind recorded in any
/// loaded view decides; unknown names install as formulae.
pub async fn install_package(
    state: Arc<AppState>,
    name: &str,
    cask: Option<bool>,
) -> Result<Option<OperationRecord>> {
    let name = validate_entity_name(name)?.to_string();
    let cask = match cask {
        Some(cask) => cask,
        None => known_kind(&state, &name).await == Some(EntityKind::Cask),
    };

    log::info!(
        "Installing '{}' as a {}",
        name,
        if cask { "cask" } else { "formula" }
    );
    orchestrator::execute(state, BrewOp::Install { name, cask }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::models::{OperationStatus, ViewKind};
    use crate::test_support::{harness, StreamScript};
    use serde_json::json;

    #[tokio::test]
    async fn kind_comes_from_the_casks_view() {
        let h = harness();
        h.runner.respond("casks", json!([["firefox"]]));
        crate::commands::views::ensure_loaded(&h.state, ViewKind::AvailableCasks)
            .await
            .unwrap();
        h.runner
            .script("install --cask firefox", StreamScript::ok(&["==> Moving App"]));

        let record = install_package(h.state.clone(), "firefox", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, OperationStatus::Succeeded);
        assert!(h
            .runner
            .calls()
            .contains(&"install --cask firefox".to_string()));
        // Installing does not change the available listings.
        assert_eq!(h.runner.count("casks"), 1);
    }

    #[tokio::test]
    async fn shell_metacharacters_are_rejected() {
        let h = harness();
        let err = install_package(h.state.clone(), "wget && rm -rf ~", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidName(_)));
        assert!(h.runner.calls().is_empty());
    }
}
