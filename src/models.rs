// Central data model definitions shared across the engine, the commands and
// the UI layer. Everything here is plain data: no locking, no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Entity
// -----------------------------------------------------------------------------
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    #[default]
    Formula,
    Cask,
}

/// A package or cask, identified by its case-sensitive name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub kind: EntityKind,
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    /// On-disk size in KiB, populated lazily.
    pub size_kb: Option<u64>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub is_installed: bool,
    pub warning: Option<String>,
}

impl Entity {
    pub fn named(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Self::default()
        }
    }

    /// Copies every field `self` is missing from `base`.
    ///
    /// Used to keep detail-cache entries a superset of the base list row.
    pub fn fill_missing_from(&mut self, base: &Entity) {
        fn fill<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(other);
            }
        }
        fill(&mut self.installed_version, &base.installed_version);
        fill(&mut self.latest_version, &base.latest_version);
        fill(&mut self.size_kb, &base.size_kb);
        fill(&mut self.description, &base.description);
        fill(&mut self.homepage, &base.homepage);
        fill(&mut self.warning, &base.warning);
        if self.dependencies.is_empty() {
            self.dependencies.clone_from(&base.dependencies);
        }
        if self.conflicts.is_empty() {
            self.conflicts.clone_from(&base.conflicts);
        }
        self.is_installed |= base.is_installed;
    }
}

// -----------------------------------------------------------------------------
// PartialFields
// -----------------------------------------------------------------------------
/// A sparse set of entity attributes arriving after the base list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PartialFields {
    pub installed_version: Option<String>,
    pub latest_version: Option<String>,
    pub size_kb: Option<u64>,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub conflicts: Option<Vec<String>>,
    pub warning: Option<String>,
}

impl PartialFields {
    pub fn size(size_kb: u64) -> Self {
        Self {
            size_kb: Some(size_kb),
            ..Self::default()
        }
    }

    /// Overwrites only the fields that are present.
    pub fn apply_to(&self, entity: &mut Entity) {
        if let Some(v) = &self.installed_version {
            entity.installed_version = Some(v.clone());
        }
        if let Some(v) = &self.latest_version {
            entity.latest_version = Some(v.clone());
        }
        if let Some(v) = self.size_kb {
            entity.size_kb = Some(v);
        }
        if let Some(v) = &self.description {
            entity.description = Some(v.clone());
        }
        if let Some(v) = &self.homepage {
            entity.homepage = Some(v.clone());
        }
        if let Some(v) = &self.dependencies {
            entity.dependencies = v.clone();
        }
        if let Some(v) = &self.conflicts {
            entity.conflicts = v.clone();
        }
        if let Some(v) = &self.warning {
            entity.warning = Some(v.clone());
        }
    }

    /// The attributes that describe the entity itself rather than its place
    /// in one particular view; these are mirrored into every view.
    pub fn shared(&self) -> Self {
        Self {
            installed_version: self.installed_version.clone(),
            size_kb: self.size_kb,
            description: self.description.clone(),
            homepage: self.homepage.clone(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

// -----------------------------------------------------------------------------
// Repository
// -----------------------------------------------------------------------------
/// A tap. Created on tap, destroyed on untap.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub status: String,
    pub description: Option<String>,
}

// -----------------------------------------------------------------------------
// Views
// -----------------------------------------------------------------------------
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ViewKind {
    Installed,
    Outdated,
    Available,
    AvailableCasks,
    Leaves,
    Repositories,
}

impl ViewKind {
    pub const ALL: [ViewKind; 6] = [
        ViewKind::Installed,
        ViewKind::Outdated,
        ViewKind::Available,
        ViewKind::AvailableCasks,
        ViewKind::Leaves,
        ViewKind::Repositories,
    ];

    /// Views that are only fetched on their first visit.
    pub fn is_lazy(self) -> bool {
        matches!(self, ViewKind::Available | ViewKind::AvailableCasks)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViewKind::Installed => "installed",
            ViewKind::Outdated => "outdated",
            ViewKind::Available => "available",
            ViewKind::AvailableCasks => "available-casks",
            ViewKind::Leaves => "leaves",
            ViewKind::Repositories => "repositories",
        }
    }

    pub fn parse(raw: &str) -> Option<ViewKind> {
        ViewKind::ALL.into_iter().find(|v| v.as_str() == raw)
    }
}

/// The payload of one base load.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "items", rename_all = "lowercase")]
pub enum ViewEntries {
    Entities(Vec<Entity>),
    Repositories(Vec<Repository>),
}

impl ViewEntries {
    pub fn len(&self) -> usize {
        match self {
            ViewEntries::Entities(items) => items.len(),
            ViewEntries::Repositories(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A read-only copy of one view for rendering.
#[derive(Serialize, Debug, Clone)]
pub struct ViewSnapshot {
    pub view: ViewKind,
    pub loaded: bool,
    pub error: Option<String>,
    pub entries: ViewEntries,
}

// -----------------------------------------------------------------------------
// Operations
// -----------------------------------------------------------------------------
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OperationFamily {
    Install,
    Uninstall,
    UpdateOne,
    UpdateAll,
    UpdateSelected,
    Tap,
    Untap,
    HomebrewSelfUpdate,
    Cleanup,
    Doctor,
}

impl OperationFamily {
    pub fn key(self) -> &'static str {
        match self {
            OperationFamily::Install => "install",
            OperationFamily::Uninstall => "uninstall",
            OperationFamily::UpdateOne => "update-one",
            OperationFamily::UpdateAll => "update-all",
            OperationFamily::UpdateSelected => "update-selected",
            OperationFamily::Tap => "tap",
            OperationFamily::Untap => "untap",
            OperationFamily::HomebrewSelfUpdate => "homebrew-self-update",
            OperationFamily::Cleanup => "cleanup",
            OperationFamily::Doctor => "doctor",
        }
    }

    pub fn progress_event(self) -> String {
        format!("{}-output", self.key())
    }

    pub fn completion_event(self) -> String {
        format!("{}-finished", self.key())
    }

    /// The views whose contents can change when this family completes.
    pub fn affected_views(self) -> &'static [ViewKind] {
        match self {
            OperationFamily::Install | OperationFamily::Uninstall => &[
                ViewKind::Installed,
                ViewKind::Leaves,
                ViewKind::Outdated,
            ],
            OperationFamily::UpdateOne
            | OperationFamily::UpdateAll
            | OperationFamily::UpdateSelected => &[ViewKind::Installed, ViewKind::Outdated],
            OperationFamily::Tap | OperationFamily::Untap => &[
                ViewKind::Repositories,
                ViewKind::Available,
                ViewKind::AvailableCasks,
            ],
            OperationFamily::HomebrewSelfUpdate => &[
                ViewKind::Outdated,
                ViewKind::Available,
                ViewKind::AvailableCasks,
            ],
            OperationFamily::Cleanup => &[ViewKind::Installed],
            OperationFamily::Doctor => &[],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Succeeded,
    /// Completed, but the process reported a failure.
    Failed,
    /// Completed without reaching its goal; needs a different operation first.
    Blocked,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        self != OperationStatus::Running
    }
}

/// Transient state of one mutating operation.
#[derive(Serialize, Debug, Clone)]
pub struct OperationRecord {
    pub run_id: u64,
    pub family: OperationFamily,
    pub targets: Vec<String>,
    /// Append-only, in arrival order.
    pub log: Vec<String>,
    pub status: OperationStatus,
    pub message: Option<String>,
    /// Entity names the user can act on to unblock the operation.
    pub remediation: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OperationRecord {
    pub fn new(
        run_id: u64,
        family: OperationFamily,
        targets: Vec<String>,
        first_line: String,
    ) -> Self {
        Self {
            run_id,
            family,
            targets,
            log: vec![first_line],
            status: OperationStatus::Running,
            message: None,
            remediation: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

// -----------------------------------------------------------------------------
// Event payloads
// -----------------------------------------------------------------------------
/// A line of output from a command, with its source (stdout or stderr).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StreamOutput {
    pub line: String,
    pub source: String,
    /// The orchestrator run that started the command. Zero when untagged.
    #[serde(default)]
    pub run_id: u64,
}

/// The terminal result of a streamed command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub run_id: u64,
}

/// Raised once when the number of outdated entities grows.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OutdatedNotice {
    pub previous: usize,
    pub current: usize,
    pub added: Vec<String>,
}
