//! The surface the UI talks to. Every call here is cheap; anything that
//! runs brew is spawned and reports back through the bus and the state.
use crate::bus::EventBus;
use crate::cold_start;
use crate::commands::runner::{BrewRunner, CommandRunner};
use crate::commands::{info, install, maintenance, tap, uninstall, update, views};
use crate::error::{EngineError, Result};
use crate::models::{OperationFamily, OperationRecord, OperationStatus, ViewKind, ViewSnapshot};
use crate::orchestrator;
use crate::request_guard::RequestId;
use crate::scheduler::{PollOutcome, PollScheduler};
use crate::settings::Settings;
use crate::state::{AppState, DetailsPanel};
use crate::utils;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub type OperationHandle = JoinHandle<Result<Option<OperationRecord>>>;

pub struct Engine {
    state: Arc<AppState>,
    scheduler: Arc<PollScheduler>,
}

impl Engine {
    /// Locates brew and wires the real runner to `bus`.
    pub fn bootstrap(settings: Settings, bus: Arc<dyn EventBus>) -> Result<Self> {
        let brew = settings.resolve_brew_path()?;
        let prefix = utils::brew_prefix(&brew);
        log::info!(
            "Using brew at {} (prefix {})",
            brew.display(),
            prefix.display()
        );
        let runner: Arc<dyn CommandRunner> = Arc::new(BrewRunner::new(brew, Arc::clone(&bus)));
        Ok(Self::with_state(Arc::new(AppState::new(
            settings, prefix, runner, bus,
        ))))
    }

    pub fn with_state(state: Arc<AppState>) -> Self {
        let scheduler = Arc::new(PollScheduler::new(Arc::clone(&state)));
        Self { state, scheduler }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Cold start, then background polling.
    pub async fn start(&self) -> bool {
        let ready = cold_start::run_cold_start(Arc::clone(&self.state)).await;
        self.scheduler.start();
        ready
    }

    pub fn shutdown(&self) {
        self.scheduler.stop();
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------
    pub async fn snapshot(&self, view: ViewKind) -> ViewSnapshot {
        self.state.inventory.lock().await.snapshot(view)
    }

    /// Loads lazy views on first visit.
    pub async fn visit_view(&self, view: ViewKind) -> Result<ViewSnapshot> {
        views::ensure_loaded(&self.state, view).await
    }

    /// Explicit refresh of everything loaded. Returns the number of views
    /// that failed.
    pub async fn refresh(&self) -> usize {
        views::refresh_all(&self.state).await
    }

    pub async fn wait_for_entry(&self, view: ViewKind, name: &str) -> Option<usize> {
        views::wait_for_entry(&self.state, view, name).await
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------
    pub fn operation_snapshot(&self, family: OperationFamily) -> Option<OperationRecord> {
        self.state.operations.snapshot(family)
    }

    pub fn is_running(&self, family: OperationFamily) -> bool {
        self.state.operations.is_running(family)
    }

    /// Starts an operation in the background and returns right away.
    pub fn request_operation(&self, family: OperationFamily, targets: Vec<String>) -> OperationHandle {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move { run_operation(state, family, &targets).await })
    }

    /// Hides the family's record. The process keeps running.
    pub fn dismiss_operation(&self, family: OperationFamily) -> Option<OperationRecord> {
        orchestrator::dismiss(&self.state, family)
    }

    /// Uninstalls one of the entities blocking the last untap.
    pub fn remediate(&self, name: &str) -> Result<OperationHandle> {
        let listed = self
            .state
            .operations
            .snapshot(OperationFamily::Untap)
            .filter(|record| record.status == OperationStatus::Blocked)
            .is_some_and(|record| record.remediation.iter().any(|n| n == name));
        if !listed {
            return Err(EngineError::InvalidName(name.to_string()));
        }
        Ok(self.request_operation(OperationFamily::Uninstall, vec![name.to_string()]))
    }

    // -------------------------------------------------------------------------
    // Details
    // -------------------------------------------------------------------------
    pub fn request_details(&self, name: &str) -> RequestId {
        info::request_details(&self.state, name)
    }

    /// Makes request `id` stale if it is still the current one.
    pub fn invalidate_request(&self, id: RequestId) -> bool {
        self.state.details_guard.invalidate(id)
    }

    pub fn close_details(&self) {
        info::close_details(&self.state);
    }

    pub fn details(&self) -> DetailsPanel {
        self.state.details_panel()
    }

    // -------------------------------------------------------------------------
    // Polling
    // -------------------------------------------------------------------------
    pub fn scheduler(&self) -> &Arc<PollScheduler> {
        &self.scheduler
    }

    pub async fn check_outdated_now(&self) -> PollOutcome {
        self.scheduler.check_now().await
    }

    pub fn seconds_until_next_poll(&self) -> Option<i64> {
        self.scheduler.seconds_until_next_check()
    }
}

/// Routes a family and its targets to the matching command.
pub async fn run_operation(
    state: Arc<AppState>,
    family: OperationFamily,
    targets: &[String],
) -> Result<Option<OperationRecord>> {
    let first = || {
        targets
            .first()
            .map(String::as_str)
            .ok_or(EngineError::MissingTarget(family.key()))
    };
    match family {
        OperationFamily::Install => install::install_package(state, first()?, None).await,
        OperationFamily::Uninstall => uninstall::uninstall_package(state, first()?).await,
        OperationFamily::UpdateOne => update::update_package(state, first()?).await,
        OperationFamily::UpdateAll => update::update_all_packages(state).await,
        OperationFamily::UpdateSelected => update::update_selected_packages(state, targets).await,
        OperationFamily::Tap => tap::tap_repository(state, first()?).await,
        OperationFamily::Untap => tap::untap_repository(state, first()?).await,
        OperationFamily::HomebrewSelfUpdate => maintenance::self_update(state).await,
        OperationFamily::Cleanup => maintenance::cleanup(state).await,
        OperationFamily::Doctor => maintenance::doctor(state).await,
    }
}
