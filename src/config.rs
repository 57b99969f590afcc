//! Conversion settings
//!
//! Settings come from built-in defaults, then an optional TOML file, then the
//! `FLOWCONV_WDL_VERSION` and `FLOWCONV_CWL_VERSION` environment variables.
//! Command-line flags are applied by the binary on top of that.

use crate::converter::Direction;
use crate::error::{ConvertError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const WDL_VERSION_ENV: &str = "FLOWCONV_WDL_VERSION";
pub const CWL_VERSION_ENV: &str = "FLOWCONV_CWL_VERSION";

const WDL_VERSIONS: &[&str] = &["1.0", "1.1", "development"];
const CWL_VERSIONS: &[&str] = &["v1.0", "v1.1", "v1.2"];

/// Settings shared by the converter and the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `version` stamped on generated WDL
    pub wdl_version: String,

    /// `cwlVersion` stamped on generated CWL
    pub cwl_version: String,

    /// Direction used when neither a flag nor the source extension decides
    pub default_direction: Direction,

    /// Descend into subdirectories during directory conversion
    pub recursive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wdl_version: "1.0".to_string(),
            cwl_version: "v1.2".to_string(),
            default_direction: Direction::WdlToCwl,
            recursive: true,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wdl_version(mut self, version: impl Into<String>) -> Self {
        self.wdl_version = version.into();
        self
    }

    pub fn with_cwl_version(mut self, version: impl Into<String>) -> Self {
        self.cwl_version = version.into();
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.default_direction = direction;
        self
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Apply `FLOWCONV_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(version) = lookup(WDL_VERSION_ENV).filter(|v| !v.is_empty()) {
            self.wdl_version = version;
        }
        if let Some(version) = lookup(CWL_VERSION_ENV).filter(|v| !v.is_empty()) {
            self.cwl_version = version;
        }
        self
    }

    /// Reject versions the writers cannot produce.
    pub fn validate(&self) -> Result<()> {
        if !WDL_VERSIONS.contains(&self.wdl_version.as_str()) {
            return Err(ConvertError::Config {
                message: format!(
                    "unsupported WDL version {:?}, expected one of {}",
                    self.wdl_version,
                    WDL_VERSIONS.join(", ")
                ),
            });
        }
        if !CWL_VERSIONS.contains(&self.cwl_version.as_str()) {
            return Err(ConvertError::Config {
                message: format!(
                    "unsupported CWL version {:?}, expected one of {}",
                    self.cwl_version,
                    CWL_VERSIONS.join(", ")
                ),
            });
        }
        Ok(())
    }
}

/// Fluent construction with validation at the end.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wdl_version(mut self, version: impl Into<String>) -> Self {
        self.config.wdl_version = version.into();
        self
    }

    pub fn cwl_version(mut self, version: impl Into<String>) -> Self {
        self.config.cwl_version = version.into();
        self
    }

    pub fn default_direction(mut self, direction: Direction) -> Self {
        self.config.default_direction = direction;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.config.recursive = recursive;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// `~/.flowconv.toml`, when a home directory is known.
pub fn config_file_path() -> Option<PathBuf> {
    let home = env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .or_else(|| env::var_os("USERPROFILE").filter(|p| cfg!(windows) && !p.is_empty()))?;
    Some(PathBuf::from(home).join(".flowconv.toml"))
}

/// Load settings from a TOML file; a missing file yields the defaults.
/// Environment overrides are applied and the result validated.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = match fs::read_to_string(path) {
        Ok(contents) => toml::from_str::<Config>(&contents).map_err(|e| ConvertError::Config {
            message: format!("failed to parse {} as TOML: {}", path.display(), e),
        })?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Config::default(),
        Err(err) => return Err(ConvertError::io(path, err)),
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Write settings as TOML.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    let serialized = toml::to_string(config).map_err(|e| ConvertError::Config {
        message: format!("failed to serialize config: {}", e),
    })?;
    fs::write(path, serialized).map_err(|e| ConvertError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.wdl_version, "1.0");
        assert_eq!(config.cwl_version, "v1.2");
        assert_eq!(config.default_direction, Direction::WdlToCwl);
        assert!(config.recursive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .wdl_version("1.1")
            .cwl_version("v1.0")
            .default_direction(Direction::CwlToWdl)
            .recursive(false)
            .build()
            .unwrap();
        assert_eq!(config.wdl_version, "1.1");
        assert_eq!(config.cwl_version, "v1.0");
        assert_eq!(config.default_direction, Direction::CwlToWdl);
        assert!(!config.recursive);

        assert!(ConfigBuilder::new().cwl_version("1.2").build().is_err());
        assert!(ConfigBuilder::new().wdl_version("draft-2").build().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::new().with_overrides(|key| match key {
            WDL_VERSION_ENV => Some("1.1".to_string()),
            CWL_VERSION_ENV => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.wdl_version, "1.1");
        assert_eq!(config.cwl_version, "v1.2");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_direction, Direction::WdlToCwl);
    }

    #[test]
    fn test_load_and_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flowconv.toml");
        std::fs::write(&path, "default_direction = \"cwl-to-wdl\"\nrecursive = false\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.default_direction, Direction::CwlToWdl);
        assert!(!config.recursive);

        let saved = Config::new().with_cwl_version("v1.1");
        save_config(&path, &saved).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(toml::from_str::<Config>(&text).unwrap(), saved);
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "recursive = \"yes\"").unwrap();
        assert!(matches!(load_config(&path), Err(ConvertError::Config { .. })));
        assert!(matches!(load_config(dir.path()), Err(ConvertError::Io { .. })));
    }
}
