use crate::commands::regex_utils::{ENTITY_NAME_REGEX, TAP_NAME_REGEX};
use crate::error::{EngineError, Result};
use crate::models::{EntityKind, OperationFamily};
use crate::state::AppState;
use itertools::Itertools;

/// Defines the supported mutating brew operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrewOp {
    Install { name: String, cask: bool },
    Uninstall { name: String, cask: bool },
    Upgrade { name: String },
    UpgradeAll,
    UpgradeSelected { names: Vec<String> },
    Tap { name: String },
    Untap { name: String },
    SelfUpdate,
    Cleanup,
    Doctor,
}

fn required<'a>(name: &'a str, what: &'static str) -> Result<&'a str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(EngineError::MissingTarget(what))
    } else {
        Ok(trimmed)
    }
}

/// Rejects anything that is not a plain formula or cask name.
pub fn validate_entity_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if ENTITY_NAME_REGEX.is_match(name) {
        Ok(name)
    } else {
        Err(EngineError::InvalidName(name.to_string()))
    }
}

/// Rejects anything that is not a `user/repo` tap name.
pub fn validate_tap_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if TAP_NAME_REGEX.is_match(name) {
        Ok(name)
    } else {
        Err(EngineError::InvalidName(name.to_string()))
    }
}

/// The kind of `name` as far as any loaded view knows it.
pub async fn known_kind(state: &AppState, name: &str) -> Option<EntityKind> {
    state
        .inventory
        .lock()
        .await
        .find_entity(name)
        .map(|entity| entity.kind)
}

impl BrewOp {
    /// Builds the operation a UI request for `family` describes. `cask` only
    /// matters for install and uninstall.
    pub fn from_request(family: OperationFamily, targets: &[String], cask: bool) -> Self {
        let first = || targets.first().cloned().unwrap_or_default();
        match family {
            OperationFamily::Install => BrewOp::Install { name: first(), cask },
            OperationFamily::Uninstall => BrewOp::Uninstall { name: first(), cask },
            OperationFamily::UpdateOne => BrewOp::Upgrade { name: first() },
            OperationFamily::UpdateAll => BrewOp::UpgradeAll,
            OperationFamily::UpdateSelected => BrewOp::UpgradeSelected {
                names: targets.to_vec(),
            },
            OperationFamily::Tap => BrewOp::Tap { name: first() },
            OperationFamily::Untap => BrewOp::Untap { name: first() },
            OperationFamily::HomebrewSelfUpdate => BrewOp::SelfUpdate,
            OperationFamily::Cleanup => BrewOp::Cleanup,
            OperationFamily::Doctor => BrewOp::Doctor,
        }
    }

    pub fn family(&self) -> OperationFamily {
        match self {
            BrewOp::Install { .. } => OperationFamily::Install,
            BrewOp::Uninstall { .. } => OperationFamily::Uninstall,
            BrewOp::Upgrade { .. } => OperationFamily::UpdateOne,
            BrewOp::UpgradeAll => OperationFamily::UpdateAll,
            BrewOp::UpgradeSelected { .. } => OperationFamily::UpdateSelected,
            BrewOp::Tap { .. } => OperationFamily::Tap,
            BrewOp::Untap { .. } => OperationFamily::Untap,
            BrewOp::SelfUpdate => OperationFamily::HomebrewSelfUpdate,
            BrewOp::Cleanup => OperationFamily::Cleanup,
            BrewOp::Doctor => OperationFamily::Doctor,
        }
    }

    /// The entity or repository names this operation acts on.
    pub fn targets(&self) -> Vec<String> {
        match self {
            BrewOp::Install { name, .. }
            | BrewOp::Uninstall { name, .. }
            | BrewOp::Upgrade { name }
            | BrewOp::Tap { name }
            | BrewOp::Untap { name } => vec![name.trim().to_string()],
            BrewOp::UpgradeSelected { names } => names
                .iter()
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
                .unique()
                .map(String::from)
                .collect(),
            BrewOp::UpgradeAll | BrewOp::SelfUpdate | BrewOp::Cleanup | BrewOp::Doctor => {
                Vec::new()
            }
        }
    }

    /// Builds the brew argument list, failing if a required name is missing.
    pub fn build_args(&self) -> Result<Vec<String>> {
        let args: Vec<String> = match self {
            BrewOp::Install { name, cask } => {
                let name = required(name, "install")?;
                if *cask {
                    vec!["install".into(), "--cask".into(), name.into()]
                } else {
                    vec!["install".into(), name.into()]
                }
            }
            BrewOp::Uninstall { name, cask } => {
                let name = required(name, "uninstall")?;
                if *cask {
                    vec!["uninstall".into(), "--cask".into(), name.into()]
                } else {
                    vec!["uninstall".into(), name.into()]
                }
            }
            BrewOp::Upgrade { name } => vec!["upgrade".into(), required(name, "upgrade")?.into()],
            BrewOp::UpgradeAll => vec!["upgrade".into()],
            BrewOp::UpgradeSelected { .. } => {
                let names = self.targets();
                if names.is_empty() {
                    return Err(EngineError::MissingTarget("upgrade of selected packages"));
                }
                std::iter::once("upgrade".to_string()).chain(names).collect()
            }
            BrewOp::Tap { name } => vec!["tap".into(), required(name, "tap")?.into()],
            BrewOp::Untap { name } => vec!["untap".into(), required(name, "untap")?.into()],
            BrewOp::SelfUpdate => vec!["update".into()],
            BrewOp::Cleanup => vec!["cleanup".into()],
            BrewOp::Doctor => vec!["doctor".into()],
        };
        Ok(args)
    }

    /// A human-friendly name for the UI and the logs.
    pub fn operation_name(&self) -> String {
        match self {
            BrewOp::Install { name, .. } => format!("Installing {}", name.trim()),
            BrewOp::Uninstall { name, .. } => format!("Uninstalling {}", name.trim()),
            BrewOp::Upgrade { name } => format!("Upgrading {}", name.trim()),
            BrewOp::UpgradeAll => "Upgrading all packages".to_string(),
            BrewOp::UpgradeSelected { .. } => {
                format!("Upgrading {} selected packages", self.targets().len())
            }
            BrewOp::Tap { name } => format!("Tapping {}", name.trim()),
            BrewOp::Untap { name } => format!("Untapping {}", name.trim()),
            BrewOp::SelfUpdate => "Updating Homebrew".to_string(),
            BrewOp::Cleanup => "Cleaning up".to_string(),
            BrewOp::Doctor => "Running brew doctor".to_string(),
        }
    }
}
