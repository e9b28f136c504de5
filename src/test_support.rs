//! Scripted stand-ins for `brew`, shared by the unit tests.
use crate::bus::{EventBus, LocalBus};
use crate::commands::runner::{completion_result, CommandRunner};
use crate::error::{EngineError, Result};
use crate::models::StreamOutput;
use crate::settings::Settings;
use crate::state::AppState;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// How one streamed command behaves.
#[derive(Default, Clone)]
pub struct StreamScript {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub fails: bool,
    /// Fail before the command starts, like a missing executable.
    pub transport_error: Option<String>,
    /// Held after the output lines and before the completion event.
    pub gate: Option<Arc<Notify>>,
}

impl StreamScript {
    pub fn ok(lines: &[&str]) -> Self {
        Self {
            stdout: lines.iter().map(|l| l.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing(stdout: &[&str], stderr: &[&str]) -> Self {
        Self {
            stdout: stdout.iter().map(|l| l.to_string()).collect(),
            stderr: stderr.iter().map(|l| l.to_string()).collect(),
            fails: true,
            ..Self::default()
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

/// Answers queries from a table keyed by the full command line
/// (`"list --formula --versions"`). Queued answers are served in order and
/// the last one repeats; unknown queries return an empty table.
pub struct FakeRunner {
    bus: Arc<dyn EventBus>,
    responses: Mutex<HashMap<String, VecDeque<Value>>>,
    invoke_gates: Mutex<HashMap<String, Arc<Notify>>>,
    streams: Mutex<HashMap<String, VecDeque<StreamScript>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            responses: Mutex::new(HashMap::new()),
            invoke_gates: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, command: &str, value: Value) {
        self.responses
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(value);
    }

    /// Every later call of `command` waits for a permit on `gate`.
    pub fn gate(&self, command: &str, gate: Arc<Notify>) {
        self.invoke_gates
            .lock()
            .unwrap()
            .insert(command.to_string(), gate);
    }

    pub fn ungate(&self, command: &str) {
        self.invoke_gates.lock().unwrap().remove(command);
    }

    pub fn script(&self, command: &str, script: StreamScript) {
        self.streams
            .lock()
            .unwrap()
            .entry(command.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    fn next_response(&self, command: &str) -> Value {
        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| json!([])),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| json!([])),
            None => json!([]),
        }
    }

    fn emit_line(&self, event: &str, run_id: u64, line: &str, source: &str) {
        let payload = StreamOutput {
            line: line.to_string(),
            source: source.to_string(),
            run_id,
        };
        self.bus.emit(event, serde_json::to_value(payload).unwrap());
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn invoke(&self, subcommand: &str, args: &[String]) -> Result<Value> {
        let command = std::iter::once(subcommand.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(command.clone());

        // The answer is fixed when the call is issued, as if brew had already
        // produced it and only delivery is delayed.
        let response = self.next_response(&command);
        let gate = self.invoke_gates.lock().unwrap().get(&command).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(response)
    }

    async fn invoke_streaming(
        &self,
        run_id: u64,
        args: &[String],
        operation_name: &str,
        progress_event: &str,
        completion_event: &str,
    ) -> Result<crate::models::CommandResult> {
        let command = args.join(" ");
        self.calls.lock().unwrap().push(command.clone());

        let script = self
            .streams
            .lock()
            .unwrap()
            .get_mut(&command)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        if let Some(message) = script.transport_error {
            return Err(EngineError::Transport(message));
        }

        for line in &script.stdout {
            self.emit_line(progress_event, run_id, line, "stdout");
        }
        for line in &script.stderr {
            self.emit_line(progress_event, run_id, line, "stderr");
        }
        if let Some(gate) = &script.gate {
            gate.notified().await;
        }

        let code = if script.fails { 1 } else { 0 };
        let result = completion_result(
            run_id,
            operation_name,
            !script.fails,
            Some(code),
            &script.stderr,
        );
        self.bus
            .emit(completion_event, serde_json::to_value(&result).unwrap());
        Ok(result)
    }
}

/// A state wired to an in-process bus and a scripted runner.
pub struct Harness {
    pub bus: LocalBus,
    pub runner: Arc<FakeRunner>,
    pub state: Arc<AppState>,
}

pub fn harness() -> Harness {
    harness_with(Settings::default())
}

pub fn harness_with(settings: Settings) -> Harness {
    let bus = LocalBus::new();
    let shared: Arc<dyn EventBus> = Arc::new(bus.clone());
    let runner = Arc::new(FakeRunner::new(Arc::clone(&shared)));
    let state = Arc::new(AppState::new(
        settings,
        PathBuf::from("/nonexistent/brewdeck-test-prefix"),
        runner.clone(),
        shared,
    ));
    Harness { bus, runner, state }
}

/// Collects every payload emitted on `event`.
pub fn record(bus: &LocalBus, event: &str) -> (Arc<Mutex<Vec<Value>>>, crate::bus::Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = bus.subscribe(
        event,
        Arc::new(move |payload: &Value| sink.lock().unwrap().push(payload.clone())),
    );
    (seen, subscription)
}
