// Homebrew operation and synchronization engine. The library is the backend a
// control panel drives; `run` is a headless driver over the same surface.
pub mod bus;
pub mod cold_start;
pub mod commands;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod models;
pub mod orchestrator;
pub mod request_guard;
pub mod scheduler;
pub mod settings;
pub mod state;
pub mod subscription;
pub mod utils;

#[cfg(feature = "desktop")]
pub mod desktop;

#[cfg(test)]
mod test_support;

use crate::bus::{EventBus, LocalBus};
use crate::commands::info;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::models::{
    OperationFamily, OperationRecord, OperationStatus, StreamOutput, ViewEntries, ViewKind,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "brewdeck", version, about = "Drive Homebrew the way the control panel does")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print one view: installed, outdated, available, available-casks, leaves, repositories
    List { view: String },
    /// Show details for a formula or cask
    Info { name: String },
    Install {
        name: String,
        #[arg(long)]
        cask: bool,
    },
    Uninstall { name: String },
    /// Upgrade the named packages, or everything outdated when none are given
    Upgrade { names: Vec<String> },
    Tap { name: String },
    Untap { name: String },
    /// Update Homebrew itself
    SelfUpdate,
    Cleanup,
    Doctor,
    /// Load the inventory and poll for newly outdated packages until Ctrl-C
    Watch,
}

pub fn run() {
    init_tracing();

    let settings = settings::load_settings().unwrap_or_else(|e| {
        log::warn!("Falling back to default settings: {}", e);
        settings::Settings::default()
    });
    install_panic_hook(settings.log_dir());

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start the async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let bus = LocalBus::new();
    let code = runtime.block_on(async {
        let engine = match Engine::bootstrap(settings, Arc::new(bus.clone())) {
            Ok(engine) => engine,
            Err(e) => {
                log::error!("{}", e);
                return 1;
            }
        };
        match dispatch(&engine, &bus, cli.command).await {
            Ok(true) => 0,
            Ok(false) => 1,
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        }
    });
    std::process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("Failed to initialise logging: {}", e);
    }
}

// Set up panic handler for better crash reporting
fn install_panic_hook(log_dir: PathBuf) {
    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic message".to_string()
        };
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        eprintln!("PANIC: {} at {}", message, location);

        if std::fs::create_dir_all(&log_dir).is_err() {
            return;
        }
        if let Ok(mut log_file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("panic.log"))
        {
            use std::io::Write;
            let _ = writeln!(
                log_file,
                "[{}] PANIC: {} at {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S"),
                message,
                location
            );
        }
    }));
}

/// Runs one subcommand. `Ok(false)` means brew ran but did not succeed.
async fn dispatch(engine: &Engine, bus: &LocalBus, command: Command) -> Result<bool> {
    let (family, targets) = match command {
        Command::List { view } => {
            let kind = ViewKind::parse(&view).ok_or_else(|| EngineError::InvalidName(view))?;
            print_view(engine, kind).await?;
            return Ok(true);
        }
        Command::Info { name } => {
            if let Some(entity) = info::show_details(engine.state(), &name).await? {
                for (label, value) in info::detail_rows(&entity) {
                    println!("{:<14}{}", format!("{}:", label), value);
                }
            }
            return Ok(true);
        }
        Command::Watch => {
            watch(engine, bus).await;
            return Ok(true);
        }
        Command::Install { name, cask } => {
            let state = Arc::clone(engine.state());
            let family = OperationFamily::Install;
            let record = with_progress(bus, family, async {
                commands::install::install_package(state, &name, cask.then_some(true)).await
            })
            .await;
            return report(family, record);
        }
        Command::Uninstall { name } => (OperationFamily::Uninstall, vec![name]),
        Command::Upgrade { names } => match names.len() {
            0 => (OperationFamily::UpdateAll, names),
            1 => (OperationFamily::UpdateOne, names),
            _ => (OperationFamily::UpdateSelected, names),
        },
        Command::Tap { name } => (OperationFamily::Tap, vec![name]),
        Command::Untap { name } => (OperationFamily::Untap, vec![name]),
        Command::SelfUpdate => (OperationFamily::HomebrewSelfUpdate, Vec::new()),
        Command::Cleanup => (OperationFamily::Cleanup, Vec::new()),
        Command::Doctor => (OperationFamily::Doctor, Vec::new()),
    };

    let state = Arc::clone(engine.state());
    let record = with_progress(bus, family, async {
        crate::engine::run_operation(state, family, &targets).await
    })
    .await;
    report(family, record)
}

/// Prints the family's output lines while `run` is in flight.
async fn with_progress<F>(bus: &LocalBus, family: OperationFamily, run: F) -> F::Output
where
    F: std::future::Future,
{
    let subscription = bus.subscribe(
        &family.progress_event(),
        Arc::new(|payload: &Value| {
            if let Ok(output) = serde_json::from_value::<StreamOutput>(payload.clone()) {
                if output.source == "stderr" {
                    eprintln!("{}", output.line);
                } else {
                    println!("{}", output.line);
                }
            }
        }),
    );
    let result = run.await;
    subscription.detach();
    result
}

fn report(family: OperationFamily, result: Result<Option<OperationRecord>>) -> Result<bool> {
    match result {
        Ok(Some(record)) => {
            if let Some(message) = &record.message {
                println!("{}", message);
            }
            Ok(record.status == OperationStatus::Succeeded)
        }
        Ok(None) => Ok(true),
        Err(EngineError::Blocked {
            repository,
            blockers,
        }) => {
            eprintln!(
                "Cannot untap {}; uninstall these first and retry:",
                repository
            );
            for name in blockers {
                eprintln!("  brewdeck uninstall {}", name);
            }
            Ok(false)
        }
        Err(e) => {
            log::error!("{} failed: {}", family.key(), e);
            Err(e)
        }
    }
}

async fn print_view(engine: &Engine, view: ViewKind) -> Result<()> {
    let snapshot = engine.visit_view(view).await?;
    match snapshot.entries {
        ViewEntries::Entities(entities) => {
            for entity in entities {
                let version = match (&entity.installed_version, &entity.latest_version) {
                    (Some(installed), Some(latest)) if installed != latest => {
                        format!("{} -> {}", installed, latest)
                    }
                    (Some(installed), _) => installed.clone(),
                    (None, Some(latest)) => latest.clone(),
                    (None, None) => String::new(),
                };
                println!("{:<32} {}", entity.name, version);
            }
        }
        ViewEntries::Repositories(repositories) => {
            for repository in repositories {
                println!("{}", repository.name);
            }
        }
    }
    Ok(())
}

async fn watch(engine: &Engine, bus: &LocalBus) {
    let notices = bus.subscribe(
        scheduler::EVENT_OUTDATED_INCREASED,
        Arc::new(|payload: &Value| {
            if let Ok(notice) = serde_json::from_value::<models::OutdatedNotice>(payload.clone()) {
                println!(
                    "{} package(s) outdated (was {}): {}",
                    notice.current,
                    notice.previous,
                    notice.added.join(", ")
                );
            }
        }),
    );

    if !engine.start().await {
        log::warn!("Inventory only partially loaded; polling anyway");
    }
    match engine.seconds_until_next_poll() {
        Some(secs) => log::info!("Next outdated check in {}s", secs),
        None => log::info!("Polling is off"),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
    }
    engine.shutdown();
    notices.detach();
}
