//! Tauri glue for the desktop shell: the webview event system as an
//! `EventBus`, and the log plugin.
use crate::bus::{EventBus, Handler, Subscription};
use serde_json::Value;
use std::path::PathBuf;
use tauri::{AppHandle, Emitter, Listener, Runtime};
use tauri_plugin_log::{Target, TargetKind};

/// Bridges engine events to the webview.
pub struct TauriBus<R: Runtime> {
    app: AppHandle<R>,
}

impl<R: Runtime> TauriBus<R> {
    pub fn new(app: AppHandle<R>) -> Self {
        Self { app }
    }
}

impl<R: Runtime> EventBus for TauriBus<R> {
    fn subscribe(&self, event: &str, handler: Handler) -> Subscription {
        let name = event.to_string();
        let id = self.app.listen(event, move |message| {
            match serde_json::from_str::<Value>(message.payload()) {
                Ok(payload) => handler(&payload),
                Err(e) => log::warn!("Dropping undecodable '{}' payload: {}", name, e),
            }
        });
        let app = self.app.clone();
        Subscription::new(event, move || app.unlisten(id))
    }

    fn emit(&self, event: &str, payload: Value) {
        if let Err(e) = self.app.emit(event, payload) {
            log::error!("Failed to emit '{}' event: {}", event, e);
        }
    }
}

/// Logging for the desktop shell: stdout plus a folder under `log_dir`.
pub fn log_plugin<R: Runtime>(log_dir: PathBuf) -> tauri::plugin::TauriPlugin<R> {
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory {:?}: {}", log_dir, e);
    }
    tauri_plugin_log::Builder::new()
        .targets([
            Target::new(TargetKind::Stdout),
            Target::new(TargetKind::Folder {
                path: log_dir,
                file_name: None,
            }),
        ])
        .level(if cfg!(debug_assertions) {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Info
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_plugin_prepares_the_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let _plugin = log_plugin::<tauri::Wry>(log_dir.clone());
        assert!(log_dir.is_dir());
    }

    #[cfg(feature = "desktop-test")]
    #[test]
    fn tauri_bus_delivers_until_detached() {
        use std::sync::{Arc, Mutex};

        let app = tauri::test::mock_app();
        let bus = TauriBus::new(app.handle().clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = bus.subscribe(
            "install-output",
            Arc::new(move |payload: &Value| sink.lock().unwrap().push(payload.clone())),
        );

        let line = serde_json::json!({"line": "==> Pouring wget", "source": "stdout", "run_id": 1});
        bus.emit("install-output", line.clone());
        assert_eq!(*seen.lock().unwrap(), vec![line.clone()]);

        subscription.detach();
        bus.emit("install-output", line);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
