use crate::interop::LookupPolicy;
use crate::logging::{parse_level, LogConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// File name searched for by `FfiConfig::discover`
pub const CONFIG_FILE: &str = ".pffi.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfiConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub lookup: LookupConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default = "default_false")]
    pub json: bool,

    #[serde(default = "default_false")]
    pub spans: bool,

    #[serde(default = "default_false")]
    pub performance: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupConfig {
    /// What a lookup of an unregistered global function yields
    #[serde(default)]
    pub missing: LookupPolicy,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            json: false,
            spans: false,
            performance: false,
        }
    }
}

fn default_level() -> String { "info".to_string() }
fn default_false() -> bool { false }

impl LoggingConfig {
    /// Logging settings with `PFFI_LOG_*` variables applied on top
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            level: parse_level(&self.level).unwrap_or(crate::logging::Level::INFO),
            file_output: self.file.is_some(),
            log_path: self.file.clone(),
            json_format: self.json,
            show_spans: self.spans,
            track_performance: self.performance,
        }
        .with_env_overrides()
    }
}

impl FfiConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;

        if parse_level(&config.logging.level).is_none() {
            return Err(format!("Failed to parse config: unknown log level '{}'", config.logging.level));
        }
        Ok(config)
    }

    /// Find and load `.pffi.toml` from `start` or its parents
    pub fn discover_from(start: &Path) -> Self {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                if let Ok(config) = Self::load(&config_path) {
                    return config;
                }
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }

        Self::default()
    }

    /// Find and load configuration from current directory or parents
    pub fn discover() -> Self {
        match std::env::current_dir() {
            Ok(dir) => Self::discover_from(&dir),
            Err(_) => Self::default(),
        }
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), String> {
        fs::write(path, self.to_toml()?)
            .map_err(|e| format!("Failed to write config: {}", e))
    }
}
