//! Background check for newly outdated packages.
//!
//! A check never overlaps another one. The first successful check only
//! records a baseline; later checks notify once when the count grows.
use crate::commands::views;
use crate::error::EngineError;
use crate::models::{OutdatedNotice, ViewEntries, ViewKind};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, MissedTickBehavior};

pub const EVENT_OUTDATED_INCREASED: &str = "outdated-increased";

/// What one check did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another check was still running.
    Skipped,
    /// First successful check; nothing to compare against yet.
    Baseline(usize),
    Increased(OutdatedNotice),
    Decreased { previous: usize, current: usize },
    Unchanged(usize),
    Failed(String),
}

/// Clears the in-flight flag when a check ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The outdated set as of the last successful check.
#[derive(Debug, Clone, Default)]
struct Observation {
    count: usize,
    names: HashSet<String>,
}

pub struct PollScheduler {
    state: Arc<AppState>,
    interval: Option<Duration>,
    initial_delay: Duration,
    in_flight: AtomicBool,
    /// Set by `start`, cleared by `stop`. A scheduled check that ends after
    /// `stop` neither notifies nor schedules another check.
    active: AtomicBool,
    last_seen: Mutex<Option<Observation>>,
    next_check: Mutex<Option<DateTime<Utc>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollScheduler {
    /// A scheduler configured from the state's settings.
    pub fn new(state: Arc<AppState>) -> Self {
        let interval = state.settings().poll_interval();
        let initial_delay = state.settings().initial_poll_delay();
        Self::with_interval(state, interval, initial_delay)
    }

    pub fn with_interval(
        state: Arc<AppState>,
        interval: Option<Duration>,
        initial_delay: Duration,
    ) -> Self {
        Self {
            state,
            interval: interval.filter(|d| !d.is_zero()),
            initial_delay,
            in_flight: AtomicBool::new(false),
            active: AtomicBool::new(false),
            last_seen: Mutex::new(None),
            next_check: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Starts periodic checks after the initial delay. Does nothing when
    /// polling is off. Starting again replaces the running loop.
    pub fn start(self: &Arc<Self>) {
        let Some(interval) = self.interval else {
            log::info!("Background outdated polling is off");
            return;
        };

        self.active.store(true, Ordering::SeqCst);
        self.set_next_check(Some(Utc::now() + to_chrono(self.initial_delay)));
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            log::info!(
                "Background outdated polling started (every {}s)",
                interval.as_secs()
            );
            sleep(scheduler.initial_delay).await;

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                // Awaited here so aborting the loop also drops a running check.
                scheduler.check(true).await;
            }
        });

        let previous = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            log::info!("Background outdated polling stopped");
        }
        self.set_next_check(None);
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Runs a check right away, unless one is already in flight.
    pub async fn check_now(&self) -> PollOutcome {
        self.check(false).await
    }

    pub fn next_check_time(&self) -> Option<DateTime<Utc>> {
        *self.next_check.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seconds until the next scheduled check, never negative.
    pub fn seconds_until_next_check(&self) -> Option<i64> {
        self.next_check_time()
            .map(|at| (at - Utc::now()).num_seconds().max(0))
    }

    pub fn last_known_count(&self) -> Option<usize> {
        self.last_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|seen| seen.count)
    }

    fn set_next_check(&self, at: Option<DateTime<Utc>>) {
        *self.next_check.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    /// `scheduled` marks checks made by the loop; those are muted once the
    /// scheduler has been stopped.
    async fn check(&self, scheduled: bool) -> PollOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("Previous outdated check still running; skipping this tick");
            return PollOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.in_flight);

        // The loaded view stands in for a previous check that never happened.
        let (seen, from_view) = {
            let inventory = self.state.inventory.lock().await;
            let from_view = inventory.is_loaded(ViewKind::Outdated).then(|| Observation {
                count: inventory.len(ViewKind::Outdated),
                names: inventory.names(ViewKind::Outdated).into_iter().collect(),
            });
            (inventory.peek_load(ViewKind::Outdated), from_view)
        };

        let fetched = views::fetch_view(self.state.runner(), ViewKind::Outdated).await;
        let outcome = match fetched {
            Ok(ViewEntries::Entities(entities)) => {
                let current = entities.len();
                let observed = Observation {
                    count: current,
                    names: entities.iter().map(|e| e.name.clone()).collect(),
                };
                let previous = {
                    let mut last = self.last_seen.lock().unwrap_or_else(|e| e.into_inner());
                    let previous = last.take().or(from_view);
                    *last = Some(observed);
                    previous
                };

                match previous {
                    None => {
                        log::info!("Outdated baseline: {} package(s)", current);
                        PollOutcome::Baseline(current)
                    }
                    Some(Observation {
                        count: previous,
                        names: previous_names,
                    }) if current > previous => {
                        let added = entities
                            .iter()
                            .filter(|e| !previous_names.contains(&e.name))
                            .map(|e| e.name.clone())
                            .collect();
                        {
                            let mut inventory = self.state.inventory.lock().await;
                            // Only if no other load of the view started meanwhile.
                            if inventory.is_current(&seen) {
                                let ticket = inventory.begin_load(ViewKind::Outdated);
                                if let Err(e) =
                                    inventory.apply_load(ticket, Ok(ViewEntries::Entities(entities)))
                                {
                                    log::warn!("Could not store outdated results: {}", e);
                                }
                            }
                        }
                        self.state.mark_inventory_changed();

                        let notice = OutdatedNotice {
                            previous,
                            current,
                            added,
                        };
                        log::info!(
                            "Outdated packages increased from {} to {}",
                            previous,
                            current
                        );
                        if !scheduled || self.active.load(Ordering::SeqCst) {
                            self.notify(&notice);
                        }
                        PollOutcome::Increased(notice)
                    }
                    Some(Observation {
                        count: previous, ..
                    }) if current < previous => {
                        log::debug!("Outdated packages decreased from {} to {}", previous, current);
                        PollOutcome::Decreased { previous, current }
                    }
                    Some(_) => PollOutcome::Unchanged(current),
                }
            }
            Ok(ViewEntries::Repositories(_)) => {
                let e = EngineError::Decode("outdated check returned repositories".to_string());
                log::warn!("Background outdated check failed: {}", e);
                PollOutcome::Failed(e.to_string())
            }
            Err(e) => {
                log::warn!("Background outdated check failed: {}", e);
                PollOutcome::Failed(e.to_string())
            }
        };

        let stopped = scheduled && !self.active.load(Ordering::SeqCst);
        if let Some(interval) = self.interval.filter(|_| !stopped) {
            self.set_next_check(Some(Utc::now() + to_chrono(interval)));
        }
        outcome
    }

    fn notify(&self, notice: &OutdatedNotice) {
        if !self.state.settings().notify_on_new_outdated {
            log::debug!("Outdated notifications are disabled");
            return;
        }
        match serde_json::to_value(notice) {
            Ok(payload) => self.state.bus().emit(EVENT_OUTDATED_INCREASED, payload),
            Err(e) => log::error!("Failed to emit outdated notice: {}", e),
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::test_support::{harness, harness_with, record};
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    fn outdated_rows(names: &[&str]) -> Value {
        Value::Array(
            names
                .iter()
                .map(|n| json!([n, "(1.0)", "<", "2.0"]))
                .collect(),
        )
    }

    #[tokio::test]
    async fn notifies_only_when_the_count_grows() {
        let h = harness();
        let (notices, _sub) = record(&h.bus, EVENT_OUTDATED_INCREASED);
        for batch in [
            &["a", "b", "c"][..],
            &["a", "b", "c"],
            &["a", "b", "c", "d", "e"],
            &["a", "e"],
        ] {
            h.runner
                .respond("outdated --formula --verbose", outdated_rows(batch));
        }
        let scheduler = PollScheduler::with_interval(
            h.state.clone(),
            Some(Duration::from_secs(900)),
            Duration::ZERO,
        );

        assert_eq!(scheduler.check_now().await, PollOutcome::Baseline(3));
        assert_eq!(scheduler.check_now().await, PollOutcome::Unchanged(3));
        let increased = scheduler.check_now().await;
        assert_eq!(
            increased,
            PollOutcome::Increased(OutdatedNotice {
                previous: 3,
                current: 5,
                added: vec!["d".to_string(), "e".to_string()],
            })
        );
        assert_eq!(
            scheduler.check_now().await,
            PollOutcome::Decreased {
                previous: 5,
                current: 2
            }
        );

        let notices = notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0]["previous"], 3);
        assert_eq!(notices[0]["current"], 5);
        // The growing result was stored; the shrinking one was not.
        assert_eq!(h.state.inventory.lock().await.len(ViewKind::Outdated), 5);
    }

    #[tokio::test]
    async fn added_names_are_relative_to_the_loaded_view() {
        let h = harness();
        h.runner
            .respond("outdated --formula --verbose", outdated_rows(&["wget"]));
        h.runner
            .respond("outdated --formula --verbose", outdated_rows(&["wget", "jq"]));
        views::refresh_view(&h.state, ViewKind::Outdated).await.unwrap();

        let scheduler =
            PollScheduler::with_interval(h.state.clone(), None, Duration::ZERO);
        match scheduler.check_now().await {
            PollOutcome::Increased(notice) => {
                assert_eq!(notice.previous, 1);
                assert_eq!(notice.added, vec!["jq"]);
            }
            other => panic!("expected an increase, got {other:?}"),
        }
        assert_eq!(scheduler.next_check_time(), None);
    }

    #[tokio::test]
    async fn overlapping_check_is_skipped() {
        let h = harness();
        let gate = Arc::new(Notify::new());
        h.runner.gate("outdated --formula --verbose", gate.clone());
        let scheduler = Arc::new(PollScheduler::with_interval(
            h.state.clone(),
            Some(Duration::from_secs(60)),
            Duration::ZERO,
        ));

        let first = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.check_now().await }
        });
        tokio::task::yield_now().await;

        assert_eq!(scheduler.check_now().await, PollOutcome::Skipped);
        gate.notify_one();
        assert_eq!(first.await.unwrap(), PollOutcome::Baseline(0));
        assert_eq!(h.runner.count("outdated --formula --verbose"), 1);
    }

    #[tokio::test]
    async fn failure_still_schedules_the_next_check() {
        let h = harness();
        h.runner.respond(
            "outdated --formula --verbose",
            json!([["Error", "Could not resolve host: formulae.brew.sh"]]),
        );
        let scheduler = PollScheduler::with_interval(
            h.state.clone(),
            Some(Duration::from_secs(900)),
            Duration::ZERO,
        );

        assert!(matches!(scheduler.check_now().await, PollOutcome::Failed(_)));
        assert_eq!(scheduler.last_known_count(), None);
        let remaining = scheduler.seconds_until_next_check().unwrap();
        assert!(remaining > 800 && remaining <= 900);
    }

    #[tokio::test]
    async fn muted_notifications_still_update_the_view() {
        let h = harness_with(Settings {
            notify_on_new_outdated: false,
            ..Settings::default()
        });
        let (notices, _sub) = record(&h.bus, EVENT_OUTDATED_INCREASED);
        h.runner
            .respond("outdated --formula --verbose", outdated_rows(&["a"]));
        h.runner
            .respond("outdated --formula --verbose", outdated_rows(&["a", "b"]));
        let scheduler = PollScheduler::with_interval(h.state.clone(), None, Duration::ZERO);

        scheduler.check_now().await;
        assert!(matches!(scheduler.check_now().await, PollOutcome::Increased(_)));
        assert!(notices.lock().unwrap().is_empty());
        assert_eq!(h.state.inventory.lock().await.len(ViewKind::Outdated), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn started_loop_runs_after_the_initial_delay() {
        let h = harness();
        h.runner
            .respond("outdated --formula --verbose", outdated_rows(&["a", "b"]));
        let scheduler = Arc::new(PollScheduler::with_interval(
            h.state.clone(),
            Some(Duration::from_secs(900)),
            Duration::from_secs(5),
        ));

        scheduler.start();
        assert!(scheduler.is_running());
        sleep(Duration::from_secs(4)).await;
        assert_eq!(h.runner.count("outdated --formula --verbose"), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.runner.count("outdated --formula --verbose"), 1);
        assert_eq!(scheduler.last_known_count(), Some(2));

        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.next_check_time(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_a_check_in_progress() {
        let h = harness();
        let (notices, _sub) = record(&h.bus, EVENT_OUTDATED_INCREASED);
        h.runner
            .respond("outdated --formula --verbose", outdated_rows(&["a"]));
        h.runner
            .respond("outdated --formula --verbose", outdated_rows(&["a", "b"]));
        views::refresh_view(&h.state, ViewKind::Outdated).await.unwrap();

        let gate = Arc::new(Notify::new());
        h.runner.gate("outdated --formula --verbose", gate.clone());
        let scheduler = Arc::new(PollScheduler::with_interval(
            h.state.clone(),
            Some(Duration::from_secs(60)),
            Duration::ZERO,
        ));
        scheduler.start();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.runner.count("outdated --formula --verbose"), 2);

        scheduler.stop();
        gate.notify_one();
        sleep(Duration::from_millis(10)).await;

        assert!(!scheduler.is_running());
        assert_eq!(scheduler.next_check_time(), None);
        assert!(notices.lock().unwrap().is_empty());
        assert_eq!(h.state.inventory.lock().await.len(ViewKind::Outdated), 1);
        assert!(!scheduler.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn off_means_start_does_nothing() {
        let h = harness();
        let scheduler = Arc::new(PollScheduler::with_interval(
            h.state.clone(),
            None,
            Duration::ZERO,
        ));
        scheduler.start();
        assert!(!scheduler.is_running());
    }
}
