use crate::error::{IoResultExt, Result};
use crate::extract::ExtractOptions;
use crate::list::{ListOptions, TimeField};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "STAR_CONFIG";

/// user defaults stored in config.toml; command-line flags win over these
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StarConfig {
    pub create: CreateConfig,
    pub extract: ExtractConfig,
    pub list: ListConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateConfig {
    /// overwrite an existing archive
    pub force: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// restore ownership; unset means "only when running as root"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_owner: Option<bool>,
    pub overwrite: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListConfig {
    pub long: bool,
    pub human: bool,
    pub time: TimeField,
}

impl StarConfig {
    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: StarConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// load from the default location, falling back to defaults when no file exists
    pub fn load_default() -> Result<Self> {
        match default_path() {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "loading config");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn extract_options(&self) -> ExtractOptions {
        let mut options = ExtractOptions::default();
        if let Some(same_owner) = self.extract.same_owner {
            options.same_owner = same_owner;
        }
        options.overwrite = self.extract.overwrite;
        options
    }

    pub fn list_options(&self) -> ListOptions {
        ListOptions {
            long: self.list.long,
            human: self.list.human,
            time: self.list.time,
            ..Default::default()
        }
    }
}

/// `$STAR_CONFIG`, else `$XDG_CONFIG_HOME/star/config.toml`, else `~/.config/star/config.toml`
pub fn default_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    let config_dir = match env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(env::var_os("HOME")?).join(".config"),
    };
    Some(config_dir.join("star").join("config.toml"))
}
