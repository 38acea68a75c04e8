use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConsoleError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

fn default_base_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    60
}

fn default_interval_ms() -> u64 {
    5000
}

fn default_page_size() -> u32 {
    500
}

fn default_record_cap() -> u32 {
    5000
}

fn default_preview_len() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Polling schedule for export jobs. With the defaults a job gets roughly
/// five minutes before it is reported as timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Non-terminal polls tolerated before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between status polls.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl ExportConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Upper bound on records fetched for the trend series.
    #[serde(default = "default_record_cap")]
    pub record_cap: u32,
    #[serde(default = "default_preview_len")]
    pub preview_len: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            record_cap: default_record_cap(),
            preview_len: default_preview_len(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    /// Where the login session is persisted. Defaults to the platform data dir.
    #[serde(default)]
    pub session_file: Option<PathBuf>,
}

impl ConsoleConfig {
    /// Load from `path`, or from `config.yaml` in the working directory when
    /// no path is given. A missing default file yields the defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let mut config = match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_yaml(&contents)?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                info!("No {} found, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                return Err(ConsoleError::Config(format!(
                    "cannot read {}: {e}",
                    path.display()
                )));
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let expanded = expand_env_vars(contents, |key| std::env::var(key).ok());
        Ok(serde_yaml::from_str(&expanded)?)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LOGCONSOLE_API_URL").filter(|v| !v.is_empty()) {
            self.api.base_url = url;
        }
        if let Some(path) = lookup("LOGCONSOLE_SESSION_FILE").filter(|v| !v.is_empty()) {
            self.session_file = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConsoleError::Config("api.base_url must be set".into()));
        }
        if self.dashboard.page_size == 0 {
            return Err(ConsoleError::Config("dashboard.page_size must be > 0".into()));
        }
        if self.dashboard.record_cap == 0 {
            return Err(ConsoleError::Config("dashboard.record_cap must be > 0".into()));
        }
        Ok(())
    }

    pub fn session_path(&self) -> PathBuf {
        self.session_file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("logconsole")
                .join("session.json")
        })
    }
}

/// Expand `${VAR_NAME}` patterns using `lookup`. Unknown vars become empty
/// strings.
pub fn expand_env_vars(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + len];
        result.push_str(&lookup(var_name).unwrap_or_default());
        rest = &rest[start + len + 1..];
    }
    result.push_str(rest);
    result
}
