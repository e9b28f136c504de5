use crate::bus::EventBus;
use crate::commands::runner::CommandRunner;
use crate::inventory::Inventory;
use crate::models::Entity;
use crate::orchestrator::OperationBook;
use crate::request_guard::{RequestGuard, RequestId};
use crate::settings::Settings;
use crate::subscription::SubscriptionGuard;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// What the details panel is currently showing.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetailsPanel {
    /// Identity of the request the panel is waiting on or showing.
    pub request_id: Option<RequestId>,
    pub name: Option<String>,
    pub entity: Option<Entity>,
    pub error: Option<String>,
    pub open: bool,
    pub loading: bool,
}

impl DetailsPanel {
    pub(crate) fn begin(&mut self, id: RequestId, name: &str) {
        *self = DetailsPanel {
            request_id: Some(id),
            name: Some(name.to_string()),
            open: true,
            loading: true,
            ..DetailsPanel::default()
        };
    }

    pub(crate) fn show(&mut self, id: RequestId, entity: Entity) {
        self.request_id = Some(id);
        self.name = Some(entity.name.clone());
        self.entity = Some(entity);
        self.error = None;
        self.open = true;
        self.loading = false;
    }

    pub(crate) fn fail(&mut self, id: RequestId, message: String) {
        self.request_id = Some(id);
        self.entity = None;
        self.error = Some(message);
        self.loading = false;
    }

    pub(crate) fn close(&mut self) {
        *self = DetailsPanel::default();
    }
}

/// Shared engine state. One instance lives for the whole session.
pub struct AppState {
    settings: Settings,
    /// The Homebrew prefix (holds `Cellar` and `Caskroom`).
    prefix: PathBuf,
    runner: Arc<dyn CommandRunner>,
    bus: Arc<dyn EventBus>,
    /// Never held across a call into the runner.
    pub inventory: tokio::sync::Mutex<Inventory>,
    pub subscriptions: SubscriptionGuard,
    pub operations: OperationBook,
    pub details_guard: RequestGuard,
    details: Mutex<DetailsPanel>,
    /// Bumped after every inventory mutation.
    revision: watch::Sender<u64>,
    pub(crate) cold_start_done: AtomicBool,
}

impl AppState {
    pub fn new(
        settings: Settings,
        prefix: PathBuf,
        runner: Arc<dyn CommandRunner>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            settings,
            prefix,
            runner,
            subscriptions: SubscriptionGuard::new(Arc::clone(&bus)),
            bus,
            inventory: tokio::sync::Mutex::new(Inventory::new()),
            operations: OperationBook::default(),
            details_guard: RequestGuard::new(),
            details: Mutex::new(DetailsPanel::default()),
            revision,
            cold_start_done: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn bus(&self) -> &dyn EventBus {
        self.bus.as_ref()
    }

    pub fn mark_inventory_changed(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    pub fn watch_inventory(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn details_panel(&self) -> DetailsPanel {
        self.details.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn with_details<T>(&self, f: impl FnOnce(&mut DetailsPanel) -> T) -> T {
        let mut panel = self.details.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut panel)
    }
}
