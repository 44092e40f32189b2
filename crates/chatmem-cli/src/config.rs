//! Configuration – reads/writes `~/.chatmem/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chatmem_runtime::DispatchConfig;
use chatmem_store::{DEFAULT_DIRECTORY, DEFAULT_FILE_NAME};
use chatmem_types::ChatMemError;
use serde::{Deserialize, Serialize};

/// Persisted user configuration stored in `~/.chatmem/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the memory files.  Relative paths are resolved
    /// against the working directory.
    #[serde(default = "default_memory_dir")]
    pub memory_dir: String,

    /// Memory file opened at start-up.
    #[serde(default = "default_file")]
    pub default_file: String,

    /// When `false`, incoming text is never stored automatically.
    #[serde(default = "default_use_memory")]
    pub use_memory: bool,

    #[serde(default = "default_refresh_interval_minutes")]
    pub refresh_interval_minutes: u64,

    /// Lifetime of a download link, in seconds.
    #[serde(default = "default_download_window_secs")]
    pub download_window_secs: u64,

    /// Address the download server binds to.
    #[serde(default = "default_download_host")]
    pub download_host: String,

    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_memory_dir() -> String {
    DEFAULT_DIRECTORY.to_string()
}
fn default_file() -> String {
    DEFAULT_FILE_NAME.to_string()
}
fn default_use_memory() -> bool {
    true
}
fn default_refresh_interval_minutes() -> u64 {
    60
}
fn default_download_window_secs() -> u64 {
    14
}
fn default_download_host() -> String {
    "127.0.0.1".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_dir: default_memory_dir(),
            default_file: default_file(),
            use_memory: default_use_memory(),
            refresh_interval_minutes: default_refresh_interval_minutes(),
            download_window_secs: default_download_window_secs(),
            download_host: default_download_host(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Zero intervals would spin the refresh task or close download links
    /// immediately; they fall back to the defaults like the env overrides do.
    fn reject_zero_durations(&mut self) {
        if self.refresh_interval_minutes == 0 {
            self.refresh_interval_minutes = default_refresh_interval_minutes();
        }
        if self.download_window_secs == 0 {
            self.download_window_secs = default_download_window_secs();
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60))
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            use_memory: self.use_memory,
            download_window: Duration::from_secs(self.download_window_secs),
            download_host: self.download_host.clone(),
        }
    }
}

/// Return the path to `~/.chatmem/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".chatmem").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, ChatMemError> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, ChatMemError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        ChatMemError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| ChatMemError::Config(format!("failed to parse {}: {e}", path.display())))?;
    cfg.reject_zero_durations();
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `CHATMEM_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CHATMEM_DIR` | `memory_dir` |
/// | `CHATMEM_FILE` | `default_file` |
/// | `CHATMEM_USE_MEMORY` | `use_memory` (`true`/`false`/`1`/`0`) |
/// | `CHATMEM_REFRESH_MINUTES` | `refresh_interval_minutes` |
/// | `CHATMEM_DOWNLOAD_WINDOW` | `download_window_secs` |
/// | `CHATMEM_DOWNLOAD_HOST` | `download_host` |
///
/// Unparseable or zero numeric values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("CHATMEM_DIR") {
        cfg.memory_dir = v;
    }
    if let Some(v) = var("CHATMEM_FILE") {
        cfg.default_file = v;
    }
    if let Some(v) = var("CHATMEM_USE_MEMORY")
        && let Some(flag) = parse_flag(&v)
    {
        cfg.use_memory = flag;
    }
    if let Some(v) = var("CHATMEM_REFRESH_MINUTES")
        && let Ok(minutes) = v.parse::<u64>()
        && minutes > 0
    {
        cfg.refresh_interval_minutes = minutes;
    }
    if let Some(v) = var("CHATMEM_DOWNLOAD_WINDOW")
        && let Ok(secs) = v.parse::<u64>()
        && secs > 0
    {
        cfg.download_window_secs = secs;
    }
    if let Some(v) = var("CHATMEM_DOWNLOAD_HOST") {
        cfg.download_host = v;
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to disk, creating `~/.chatmem/` if necessary.
pub fn save(cfg: &Config) -> Result<(), ChatMemError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), ChatMemError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ChatMemError::Config(format!("failed to create config directory: {e}")))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700)).map_err(|e| {
                ChatMemError::Config(format!("failed to set config directory permissions: {e}"))
            })?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| ChatMemError::Config(format!("failed to serialize config: {e}")))?;
    let write_err = |e: std::io::Error| {
        ChatMemError::Config(format!("failed to write {}: {e}", path.display()))
    };
    // Owner read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(write_err)?;
    Ok(())
}
