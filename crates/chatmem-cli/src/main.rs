//! `chatmem` – interactive shell over the tagged-note memory store.
//!
//! On start-up the binary:
//!
//! 1. Loads `~/.chatmem/config.toml`, writing the defaults on first run.
//! 2. Initialises tracing (see `chatmem_runtime::telemetry`).
//! 3. Opens the memory store.  Failure here is fatal.
//! 4. Starts the periodic refresh task on a Tokio runtime.
//! 5. Drops the user into the slash-command REPL.

mod config;
mod repl;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;

use chatmem_middleware::StatusBus;
use chatmem_runtime::{Dispatcher, init_tracing, spawn_refresh_task};
use chatmem_store::MemoryStore;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::Config;

/// How the configuration was obtained, reported once tracing is up.
enum ConfigSource {
    Loaded,
    FirstRun(Result<(), chatmem_types::ChatMemError>),
    Fallback(chatmem_types::ChatMemError),
}

fn main() -> ExitCode {
    let (cfg, source) = load_config();

    // Hold the guard for the whole process so pending spans are flushed.
    let telemetry = init_tracing("chatmem", &cfg.log_level);
    if telemetry.is_exporting() {
        info!("exporting spans over OTLP");
    }

    print_banner();
    report_config(&source);

    // ── Memory store ──────────────────────────────────────────────────────
    let store = match MemoryStore::open(&cfg.memory_dir, &cfg.default_file) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, dir = %cfg.memory_dir, "memory store unavailable");
            eprintln!("{}: {}", "Cannot open memory store".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "  Memory file {} in {}",
        store.current_file_name().bold(),
        store.directory().display().to_string().dimmed()
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            eprintln!("{}: {}", "Cannot start async runtime".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let dispatcher = Dispatcher::new(store, StatusBus::default(), cfg.dispatch_config());

    // ── Background refresh ────────────────────────────────────────────────
    let (stop_refresh, stop_rx) = watch::channel(false);
    let refresh = {
        let _ctx = runtime.enter();
        spawn_refresh_task(dispatcher.clone(), cfg.refresh_interval(), stop_rx)
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    // Every write is committed before its command returns, so exiting from
    // the handler loses nothing.
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – exiting chatmem.".yellow().bold());
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let session = format!("cli-{}", uuid::Uuid::new_v4());
    info!(%session, "repl started");
    repl::run(&runtime, &dispatcher, &session);

    let _ = stop_refresh.send(true);
    if let Err(e) = runtime.block_on(refresh) {
        warn!(error = %e, "refresh task ended abnormally");
    }
    info!("chatmem exiting");
    ExitCode::SUCCESS
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

fn load_config() -> (Config, ConfigSource) {
    match config::load() {
        Ok(Some(cfg)) => (cfg, ConfigSource::Loaded),
        Ok(None) => {
            let saved = config::save(&Config::default());
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            (cfg, ConfigSource::FirstRun(saved))
        }
        Err(e) => {
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            (cfg, ConfigSource::Fallback(e))
        }
    }
}

fn report_config(source: &ConfigSource) {
    let path = config::config_path().display().to_string();
    match source {
        ConfigSource::Loaded => println!("  Config loaded from {}", path.bold()),
        ConfigSource::FirstRun(Ok(())) => {
            println!("  {} Default config written to {}", "✓".green().bold(), path.bold())
        }
        ConfigSource::FirstRun(Err(e)) => {
            warn!(error = %e, "could not write default config");
            println!("{}: {}", "Error saving config".red(), e);
        }
        ConfigSource::Fallback(e) => {
            warn!(error = %e, "config unreadable, using defaults");
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"       __          __                          "#.bold().cyan());
    println!("{}", r#"  ____/ /_  ____ _/ /_____ ___  ___  ____ ___  "#.bold().cyan());
    println!("{}", r#" / ___/ __ \/ __ `/ __/ __ `__ \/ _ \/ __ `__ \ "#.bold().cyan());
    println!("{}", r#"/ /__/ / / / /_/ / /_/ / / / / /  __/ / / / / /"#.bold().cyan());
    println!("{}", r#"\___/_/ /_/\__,_/\__/_/ /_/ /_/\___/_/ /_/ /_/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "chatmem".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Tagged-note memory for conversational agents");
    println!();
}
