use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::auth;

/// `config.json` is expected to be tiny; larger files are treated as corrupt.
pub const MAX_CONFIG_BYTES: u64 = 64 * 1024;
pub const DEFAULT_SERVICE_ADDR: &str = "127.0.0.1:39393";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const MIN_POLL_INTERVAL_MS: u64 = 100;
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedConfig {
    #[serde(default = "default_service_addr")]
    pub service_addr: String,
    /// Overrides `~/.zeroTierOneAuthToken`.
    #[serde(default)]
    pub auth_token_file: Option<PathBuf>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_service_addr() -> String {
    DEFAULT_SERVICE_ADDR.to_owned()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for SavedConfig {
    fn default() -> Self {
        Self {
            service_addr: default_service_addr(),
            auth_token_file: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Command-line values that take precedence over the saved file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub service_addr: Option<String>,
    pub auth_token_file: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
}

impl SavedConfig {
    pub fn merged(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(service_addr) = overrides.service_addr {
            self.service_addr = service_addr;
        }
        if let Some(path) = overrides.auth_token_file {
            self.auth_token_file = Some(path);
        }
        if let Some(ms) = overrides.poll_interval_ms {
            self.poll_interval_ms = ms;
        }
        self
    }
}

/// Validated runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub service_addr: String,
    pub auth_token_path: PathBuf,
    pub poll_interval: Duration,
}

pub fn validate_config(cfg: &SavedConfig) -> Result<(), String> {
    let mut errors: Vec<String> = Vec::new();

    let service_addr = cfg.service_addr.trim();
    match service_addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
        _ => errors.push(format!(
            "Service address must look like host:port, got {service_addr:?}."
        )),
    }

    if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&cfg.poll_interval_ms) {
        errors.push(format!(
            "Poll interval must be between {MIN_POLL_INTERVAL_MS} and {MAX_POLL_INTERVAL_MS} ms, got {}.",
            cfg.poll_interval_ms
        ));
    }

    if cfg
        .auth_token_file
        .as_ref()
        .is_some_and(|path| path.as_os_str().is_empty())
    {
        errors.push("Auth token file must not be empty when set.".to_owned());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Please fix the following:\n\n- {}",
            errors.join("\n- ")
        ))
    }
}

pub fn resolve_settings(cfg: &SavedConfig) -> Result<ClientSettings, String> {
    validate_config(cfg)?;
    let auth_token_path = match &cfg.auth_token_file {
        Some(path) => path.clone(),
        None => auth::default_token_path().map_err(|err| err.to_string())?,
    };
    Ok(ClientSettings {
        service_addr: cfg.service_addr.trim().to_owned(),
        auth_token_path,
        poll_interval: Duration::from_millis(cfg.poll_interval_ms),
    })
}

/// A config file that could not be used, with the path it came from.
#[derive(Debug)]
pub enum ConfigFileError {
    Io { path: PathBuf, source: io::Error },
    TooLarge { path: PathBuf, size: u64 },
    Json { path: PathBuf, source: serde_json::Error },
}

impl ConfigFileError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path) -> impl FnOnce(serde_json::Error) -> Self + '_ {
        move |source| ConfigFileError::Json {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigFileError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

impl std::fmt::Display for ConfigFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigFileError::Io { path, source } => write!(f, "{}: {source}", path.display()),
            ConfigFileError::TooLarge { path, size } => write!(
                f,
                "{}: file too large ({size} bytes, limit {MAX_CONFIG_BYTES})",
                path.display()
            ),
            ConfigFileError::Json { path, source } => {
                write!(f, "{}: not a valid config: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigFileError::Io { source, .. } => Some(source),
            ConfigFileError::Json { source, .. } => Some(source),
            ConfigFileError::TooLarge { .. } => None,
        }
    }
}

/// Per-user directory for `config.json` and logs.
pub fn app_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ZTUI_CONFIG_DIR") {
        let dir = PathBuf::from(override_dir);
        let _ = fs::create_dir_all(&dir);
        return dir;
    }

    let base = std::env::var_os("LOCALAPPDATA")
        .or_else(|| std::env::var_os("XDG_CONFIG_HOME"))
        .map(PathBuf::from)
        .or_else(|| auth::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    let dir = base.join("ztui");
    let _ = fs::create_dir_all(&dir);
    dir
}

pub fn config_path() -> PathBuf {
    app_dir().join("config.json")
}

pub fn parse_config_json(data: &str) -> Result<SavedConfig, serde_json::Error> {
    serde_json::from_str::<SavedConfig>(data)
}

pub fn load_config_from_path(path: &Path) -> Result<SavedConfig, ConfigFileError> {
    let size = fs::metadata(path).map_err(ConfigFileError::io(path))?.len();
    if size > MAX_CONFIG_BYTES {
        return Err(ConfigFileError::TooLarge {
            path: path.to_path_buf(),
            size,
        });
    }

    let data = fs::read_to_string(path).map_err(ConfigFileError::io(path))?;
    parse_config_json(&data).map_err(ConfigFileError::json(path))
}

/// Loads `path`, falling back to defaults. A missing file is normal; any
/// other failure is logged.
pub fn load_config(path: &Path) -> SavedConfig {
    match load_config_from_path(path) {
        Ok(cfg) => cfg,
        Err(err) if err.is_not_found() => SavedConfig::default(),
        Err(err) => {
            warn!("ignoring config file {err}");
            SavedConfig::default()
        }
    }
}

/// Writes `<path>.tmp` and renames it over `path`, so readers never see a
/// half-written file.
pub fn save_config_to_path(path: &Path, cfg: &SavedConfig) -> Result<(), ConfigFileError> {
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(cfg).map_err(ConfigFileError::json(path))?;
    fs::write(&tmp, payload).map_err(ConfigFileError::io(&tmp))?;
    fs::rename(&tmp, path).map_err(ConfigFileError::io(path))
}

pub fn save_config_with_retry(path: &Path, cfg: &SavedConfig) -> Result<(), ConfigFileError> {
    const MAX_ATTEMPTS: u32 = 3;
    const BACKOFF_BASE_MS: u64 = 50;

    let mut attempt = 1;
    loop {
        match save_config_to_path(path, cfg) {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= MAX_ATTEMPTS => return Err(err),
            Err(err) => {
                warn!(attempt, "config save failed, retrying: {err}");
                let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
                std::thread::sleep(Duration::from_millis(backoff_ms));
                attempt += 1;
            }
        }
    }
}
