//! Runs mutating operations end to end: listeners, streamed output, terminal
//! status, scoped refresh, and teardown.
use crate::bus::Handler;
use crate::commands::brew::BrewOp;
use crate::commands::regex_utils::UNTAP_ICON_PREFIX_REGEX;
use crate::commands::views;
use crate::error::Result;
use crate::models::{
    CommandResult, OperationFamily, OperationRecord, OperationStatus, StreamOutput,
};
use crate::state::AppState;
use chrono::Utc;
use itertools::Itertools;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Text brew prints when a repository cannot be removed because installed
/// entities still come from it.
pub const UNTAP_BLOCKED_MARKER: &str = "contains the following installed formulae or casks";

/// The live record of each family's most recent run.
#[derive(Clone, Default)]
pub struct OperationBook {
    records: Arc<Mutex<HashMap<OperationFamily, OperationRecord>>>,
    next_run: Arc<AtomicU64>,
}

impl OperationBook {
    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<OperationFamily, OperationRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn next_run_id(&self) -> u64 {
        self.next_run.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Installs `record` as the family's current run, replacing any earlier one.
    pub fn start(&self, record: OperationRecord) {
        self.records().insert(record.family, record);
    }

    /// Appends a progress line. Lines for a run that is no longer current
    /// are dropped.
    pub fn append(&self, family: OperationFamily, run_id: u64, line: String) -> bool {
        match self.records().get_mut(&family) {
            Some(record) if record.run_id == run_id => {
                record.log.push(line);
                true
            }
            _ => false,
        }
    }

    /// Moves a running record to its terminal status. Only the first call
    /// for a run has any effect.
    pub fn complete(
        &self,
        family: OperationFamily,
        run_id: u64,
        result: &CommandResult,
    ) -> Option<OperationStatus> {
        let mut records = self.records();
        let record = records.get_mut(&family).filter(|r| r.run_id == run_id)?;
        if record.status.is_terminal() {
            return Some(record.status);
        }

        record.finished_at = Some(Utc::now());
        record.message = Some(result.message.clone());
        record.log.push(result.message.clone());
        record.status = if result.success {
            OperationStatus::Succeeded
        } else if family == OperationFamily::Untap && is_untap_blocked(&result.message) {
            record.remediation = parse_untap_blockers(&result.message);
            OperationStatus::Blocked
        } else {
            OperationStatus::Failed
        };
        log::info!(
            "'{}' run {} finished as {:?}",
            family.key(),
            run_id,
            record.status
        );
        Some(record.status)
    }

    /// Marks a run that never produced a completion as failed.
    pub fn fail(&self, family: OperationFamily, run_id: u64, message: String) {
        let result = CommandResult {
            success: false,
            message,
            run_id,
        };
        self.complete(family, run_id, &result);
    }

    pub fn dismiss(&self, family: OperationFamily) -> Option<OperationRecord> {
        self.records().remove(&family)
    }

    pub fn snapshot(&self, family: OperationFamily) -> Option<OperationRecord> {
        self.records().get(&family).cloned()
    }

    fn run(&self, family: OperationFamily, run_id: u64) -> Option<OperationRecord> {
        self.records()
            .get(&family)
            .filter(|r| r.run_id == run_id)
            .cloned()
    }

    pub fn is_running(&self, family: OperationFamily) -> bool {
        self.records()
            .get(&family)
            .is_some_and(|r| r.status == OperationStatus::Running)
    }
}

pub fn is_untap_blocked(message: &str) -> bool {
    message.contains(UNTAP_BLOCKED_MARKER)
}

/// Extracts the blocking entity names listed after the untap refusal line.
/// Leading icons and bullets are stripped; status lines are skipped.
pub fn parse_untap_blockers(message: &str) -> Vec<String> {
    let mut lines = message.lines();
    if !lines.any(|line| line.contains(UNTAP_BLOCKED_MARKER)) {
        return Vec::new();
    }
    lines
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.contains("Error:") && !line.contains("exit status"))
        .map(|line| UNTAP_ICON_PREFIX_REGEX.replace(line, "").trim().to_string())
        .filter(|name| !name.is_empty())
        .unique()
        .collect()
}

// The family's event names are shared by every run, so a process from an
// earlier run that is still exiting emits on them too. Payloads are matched
// on their run id.
fn progress_handler(book: OperationBook, family: OperationFamily, run_id: u64) -> Handler {
    Arc::new(move |payload: &Value| {
        match serde_json::from_value::<StreamOutput>(payload.clone()) {
            Ok(output) if output.run_id == run_id => {
                book.append(family, run_id, output.line);
            }
            Ok(output) => log::debug!(
                "Dropping '{}' output from run {} (current run {})",
                family.key(),
                output.run_id,
                run_id
            ),
            Err(e) => log::warn!("Ignoring malformed '{}' progress: {}", family.key(), e),
        }
    })
}

fn completion_handler(book: OperationBook, family: OperationFamily, run_id: u64) -> Handler {
    Arc::new(move |payload: &Value| {
        match serde_json::from_value::<CommandResult>(payload.clone()) {
            Ok(result) if result.run_id == run_id => {
                book.complete(family, run_id, &result);
            }
            Ok(result) => log::debug!(
                "Dropping '{}' completion from run {} (current run {})",
                family.key(),
                result.run_id,
                run_id
            ),
            Err(e) => log::warn!("Ignoring malformed '{}' completion: {}", family.key(), e),
        }
    })
}

/// Executes `op` to completion.
///
/// Returns the final record, or `None` when the user dismissed it while the
/// process was still running. A transport failure is returned as `Err`
/// after the record has been marked failed; no refresh runs in that case.
pub async fn execute(state: Arc<AppState>, op: BrewOp) -> Result<Option<OperationRecord>> {
    let args = op.build_args()?;
    let family = op.family();
    let targets = op.targets();
    let operation_name = op.operation_name();
    let book = state.operations.clone();
    let run_id = book.next_run_id();

    let ticket = state.subscriptions.begin_operation(
        family,
        progress_handler(book.clone(), family, run_id),
        completion_handler(book.clone(), family, run_id),
    );
    book.start(OperationRecord::new(
        run_id,
        family,
        targets.clone(),
        operation_name.clone(),
    ));
    log::info!("{} (run {})", operation_name, run_id);

    let outcome = state
        .runner()
        .invoke_streaming(
            run_id,
            &args,
            &operation_name,
            &family.progress_event(),
            &family.completion_event(),
        )
        .await;

    let finished = match outcome {
        Ok(result) => {
            // Covers buses that drop the completion event.
            book.complete(family, run_id, &result);
            views::refresh_after_operation(&state, family, &targets).await;
            Ok(book.run(family, run_id))
        }
        Err(e) => {
            log::error!("{} could not run: {}", operation_name, e);
            book.fail(family, run_id, e.to_string());
            Err(e)
        }
    };

    state.subscriptions.release(&ticket);
    finished
}

/// Hides an operation's record and detaches its listeners. The process
/// itself keeps running; its refresh still happens when it exits.
pub fn dismiss(state: &AppState, family: OperationFamily) -> Option<OperationRecord> {
    state.subscriptions.end_operation(family);
    let record = state.operations.dismiss(family);
    if let Some(record) = &record {
        if record.status == OperationStatus::Running {
            log::info!(
                "Dismissed running '{}' operation (run {}); the process continues",
                family.key(),
                record.run_id
            );
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::error::EngineError;
    use crate::models::ViewKind;
    use crate::test_support::{harness, record, StreamScript};
    use serde_json::json;
    use tokio::sync::Notify;

    const BLOCKED_UNTAP: &[&str] = &[
        "Error: Refusing to untap homebrew/cask-fonts because it contains the following installed formulae or casks:",
        "font-fira-code",
        "  ✔ font-jetbrains-mono",
        "",
    ];

    #[test]
    fn blockers_are_cleaned_of_icons_and_status_lines() {
        let message = format!(
            "{}\nUntapping homebrew/cask-fonts failed with exit status 1",
            BLOCKED_UNTAP.join("\n")
        );
        assert!(is_untap_blocked(&message));
        assert_eq!(
            parse_untap_blockers(&message),
            vec!["font-fira-code", "font-jetbrains-mono"]
        );
        assert!(parse_untap_blockers("Error: No available tap foo/bar.").is_empty());
    }

    #[test]
    fn completion_is_applied_once() {
        let book = OperationBook::default();
        let run = book.next_run_id();
        book.start(OperationRecord::new(
            run,
            OperationFamily::Cleanup,
            vec![],
            "Cleaning up".into(),
        ));
        let ok = CommandResult {
            success: true,
            message: "done".into(),
            run_id: run,
        };
        assert_eq!(
            book.complete(OperationFamily::Cleanup, run, &ok),
            Some(OperationStatus::Succeeded)
        );
        let late_failure = CommandResult {
            success: false,
            message: "late".into(),
            run_id: run,
        };
        assert_eq!(
            book.complete(OperationFamily::Cleanup, run, &late_failure),
            Some(OperationStatus::Succeeded)
        );
        let record = book.snapshot(OperationFamily::Cleanup).unwrap();
        assert_eq!(record.log, vec!["Cleaning up", "done"]);
        assert!(!book.append(OperationFamily::Cleanup, run + 1, "stale".into()));
    }

    #[tokio::test]
    async fn install_streams_then_refreshes_affected_views() {
        let h = harness();
        h.runner.respond("list --formula --versions", json!([["wget", "1.24.5"]]));
        h.runner.respond("leaves", json!([["wget"]]));
        h.runner.script(
            "install wget",
            StreamScript::ok(&["==> Downloading wget", "==> Pouring wget--1.24.5"]),
        );

        let record = execute(
            h.state.clone(),
            BrewOp::Install {
                name: "wget".into(),
                cask: false,
            },
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(record.status, OperationStatus::Succeeded);
        assert_eq!(
            record.log,
            vec![
                "Installing wget",
                "==> Downloading wget",
                "==> Pouring wget--1.24.5",
                "Installing wget completed successfully",
            ]
        );

        let inventory = h.state.inventory.lock().await;
        let wget = inventory.entity(ViewKind::Installed, "wget").unwrap();
        assert_eq!(wget.installed_version.as_deref(), Some("1.24.5"));
        assert!(wget.is_installed);
        assert_eq!(inventory.position(ViewKind::Leaves, "wget"), Some(0));
        assert!(inventory.is_loaded(ViewKind::Outdated));
        // Lazy views that were never opened are not fetched.
        assert!(!inventory.is_loaded(ViewKind::Available));
        drop(inventory);
        assert_eq!(h.runner.count("formulae"), 0);

        // Listeners are gone once the run is over.
        assert_eq!(h.bus.subscriber_count("install-output"), 0);
        assert_eq!(h.bus.subscriber_count("install-finished"), 0);
    }

    #[tokio::test]
    async fn retry_does_not_duplicate_progress_lines() {
        let h = harness();
        let first_gate = Arc::new(Notify::new());
        h.runner.script(
            "install wget",
            StreamScript::failing(&["==> Downloading wget"], &["Error: network down"])
                .gated(first_gate.clone()),
        );
        h.runner
            .script("install wget", StreamScript::ok(&["==> Pouring wget"]));
        let op = BrewOp::Install {
            name: "wget".into(),
            cask: false,
        };

        let first = tokio::spawn(execute(h.state.clone(), op.clone()));
        tokio::task::yield_now().await;
        assert!(h.state.operations.is_running(OperationFamily::Install));

        let second = execute(h.state.clone(), op).await.unwrap().unwrap();
        assert_eq!(h.bus.subscriber_count("install-output"), 0);
        assert_eq!(
            second.log,
            vec![
                "Installing wget",
                "==> Pouring wget",
                "Installing wget completed successfully"
            ]
        );

        // The superseded run finishes late without touching the new record.
        first_gate.notify_one();
        assert!(first.await.unwrap().unwrap().is_none());
        let current = h.state.operations.snapshot(OperationFamily::Install).unwrap();
        assert_eq!(current.run_id, second.run_id);
        assert_eq!(current.status, OperationStatus::Succeeded);
    }

    #[tokio::test]
    async fn earlier_run_finishing_late_does_not_complete_the_retry() {
        let h = harness();
        let first_gate = Arc::new(Notify::new());
        let second_gate = Arc::new(Notify::new());
        h.runner.script(
            "install wget",
            StreamScript::failing(&[], &["Error: network down"]).gated(first_gate.clone()),
        );
        h.runner.script(
            "install wget",
            StreamScript::ok(&["==> Pouring wget"]).gated(second_gate.clone()),
        );
        let op = BrewOp::Install {
            name: "wget".into(),
            cask: false,
        };

        let first = tokio::spawn(execute(h.state.clone(), op.clone()));
        tokio::task::yield_now().await;
        let first_run = h.state.operations.snapshot(OperationFamily::Install).unwrap().run_id;
        let second = tokio::spawn(execute(h.state.clone(), op));
        tokio::task::yield_now().await;

        // The old process exits while the retry is still running.
        first_gate.notify_one();
        assert!(first.await.unwrap().unwrap().is_none());
        h.bus.emit(
            "install-output",
            json!({"line": "late line", "source": "stdout", "run_id": first_run}),
        );

        let current = h.state.operations.snapshot(OperationFamily::Install).unwrap();
        assert_ne!(current.run_id, first_run);
        assert_eq!(current.status, OperationStatus::Running);
        assert_eq!(current.log, vec!["Installing wget", "==> Pouring wget"]);

        second_gate.notify_one();
        let record = second.await.unwrap().unwrap().unwrap();
        assert_eq!(record.status, OperationStatus::Succeeded);
        assert_eq!(
            record.log,
            vec![
                "Installing wget",
                "==> Pouring wget",
                "Installing wget completed successfully"
            ]
        );
    }

    #[tokio::test]
    async fn untap_with_installed_fonts_is_blocked() {
        let h = harness();
        h.runner.script(
            "untap homebrew/cask-fonts",
            StreamScript::failing(&[], BLOCKED_UNTAP),
        );

        let record = execute(
            h.state.clone(),
            BrewOp::Untap {
                name: "homebrew/cask-fonts".into(),
            },
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(record.status, OperationStatus::Blocked);
        assert_eq!(
            record.remediation,
            vec!["font-fira-code", "font-jetbrains-mono"]
        );
        assert!(record.message.unwrap().contains(UNTAP_BLOCKED_MARKER));
        // Affected views are still refreshed after a failed run.
        assert_eq!(h.runner.count("tap"), 1);
    }

    #[tokio::test]
    async fn dismissed_run_still_refreshes() {
        let h = harness();
        let gate = Arc::new(Notify::new());
        h.runner.script(
            "upgrade",
            StreamScript::ok(&["==> Upgrading 2 outdated packages"]).gated(gate.clone()),
        );
        let (finished, _sub) = record(&h.bus, "update-all-finished");

        let run = tokio::spawn(execute(h.state.clone(), BrewOp::UpgradeAll));
        tokio::task::yield_now().await;

        let dismissed = dismiss(&h.state, OperationFamily::UpdateAll).unwrap();
        assert_eq!(dismissed.status, OperationStatus::Running);
        assert!(!h.state.subscriptions.is_active(OperationFamily::UpdateAll));
        assert!(h.state.operations.snapshot(OperationFamily::UpdateAll).is_none());

        gate.notify_one();
        assert!(run.await.unwrap().unwrap().is_none());
        assert_eq!(finished.lock().unwrap().len(), 1);
        assert_eq!(h.runner.count("list --formula --versions"), 1);
        assert!(h.state.inventory.lock().await.is_loaded(ViewKind::Outdated));
    }

    #[tokio::test]
    async fn transport_failure_skips_refresh() {
        let h = harness();
        h.runner.script(
            "cleanup",
            StreamScript {
                transport_error: Some("brew: not found".into()),
                ..StreamScript::default()
            },
        );

        let err = execute(h.state.clone(), BrewOp::Cleanup).await.unwrap_err();
        assert!(matches!(err, EngineError::Transport(_)));
        let record = h.state.operations.snapshot(OperationFamily::Cleanup).unwrap();
        assert_eq!(record.status, OperationStatus::Failed);
        assert_eq!(h.runner.calls(), vec!["cleanup"]);
        assert!(!h.state.subscriptions.is_active(OperationFamily::Cleanup));
    }
}
