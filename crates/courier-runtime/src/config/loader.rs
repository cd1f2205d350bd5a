//! Layered configuration loading on figment.
//!
//! Sources, lowest priority first:
//!
//! 1. `CourierConfig::default()`
//! 2. `courier.{profile}.{ext}` next to the main file
//! 3. `courier.{ext}`, the first one found in the search paths
//! 4. `COURIER_*` environment variables, `__` separating sections
//!    (`COURIER_DISPATCH__WORKERS=4`)
//! 5. Configs passed to [`ConfigLoader::merge`], in call order
//!
//! TOML files need the `toml-config` feature (default), YAML files the
//! `yaml-config` feature. With both enabled each format contributes its own
//! profile and main file, TOML first.

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::CourierConfig;

const FILE_STEM: &str = "courier";
const ENV_PREFIX: &str = "COURIER_";
const PROFILE_VAR: &str = "COURIER_PROFILE";

/// A configuration file format compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    #[cfg(feature = "toml-config")]
    Toml,
    #[cfg(feature = "yaml-config")]
    Yaml,
}

impl ConfigFormat {
    /// Enabled formats, in discovery order.
    pub const ENABLED: &'static [ConfigFormat] = &[
        #[cfg(feature = "toml-config")]
        Self::Toml,
        #[cfg(feature = "yaml-config")]
        Self::Yaml,
    ];

    /// File extensions of this format, preferred first.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => &["toml"],
            #[cfg(feature = "yaml-config")]
            Self::Yaml => &["yaml", "yml"],
        }
    }

    /// Picks the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ENABLED
            .iter()
            .copied()
            .find(|format| format.extensions().contains(&ext))
    }

    fn merge_into(self, figment: Figment, path: &Path) -> Figment {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => figment.merge(Toml::file(path)),
            #[cfg(feature = "yaml-config")]
            Self::Yaml => figment.merge(Yaml::file(path)),
        }
    }
}

/// Name of the profile whose file is layered under the main config.
///
/// `prod` and `dev` are shorthands for `production` and `development`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile(String);

impl Profile {
    pub fn new(name: impl AsRef<str>) -> Self {
        let name = name.as_ref().trim().to_lowercase();
        Self(match name.as_str() {
            "prod" => "production".to_string(),
            "dev" | "" => "development".to_string(),
            _ => name,
        })
    }

    /// Reads `COURIER_PROFILE`, defaulting to `development`.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(Self::new)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self("development".to_string())
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds a [`CourierConfig`] from files, environment and overrides.
pub struct ConfigLoader {
    profile: Profile,
    search_paths: Vec<PathBuf>,
    file: Option<PathBuf>,
    env: bool,
    overrides: Vec<CourierConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Profile from `COURIER_PROFILE`, environment enabled, no search paths.
    ///
    /// Without search paths the current directory and the user config
    /// directory (`~/.config/courier`) are searched.
    pub fn new() -> Self {
        Self {
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            file: None,
            env: true,
            overrides: Vec::new(),
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::new(profile);
        self
    }

    /// Adds a directory to search for `courier.*` files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.search_path(cwd),
            Err(_) => self,
        }
    }

    /// Loads exactly this file instead of searching. It must exist.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Layers `config` above every other source.
    pub fn merge(mut self, config: CourierConfig) -> Self {
        self.overrides.push(config);
        self
    }

    /// Config files that will be merged, lowest priority first.
    pub fn files(&self) -> ConfigResult<Vec<(ConfigFormat, PathBuf)>> {
        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            let format = ConfigFormat::from_path(path).ok_or_else(|| {
                ConfigError::ParseError(format!(
                    "unsupported or disabled config format: {}",
                    path.display()
                ))
            })?;
            return Ok(vec![(format, path.clone())]);
        }

        let dirs = self.search_dirs();
        let mut files = Vec::new();
        for &format in ConfigFormat::ENABLED {
            if let Some(found) = self.discover(format, &dirs) {
                files.extend(found.into_iter().map(|path| (format, path)));
            }
        }
        if files.is_empty() {
            warn!(paths = ?dirs, "No configuration file found, using defaults");
        }
        Ok(files)
    }

    /// Finds the first main file of `format`, preceded by its profile file.
    fn discover(&self, format: ConfigFormat, dirs: &[PathBuf]) -> Option<Vec<PathBuf>> {
        for dir in dirs {
            for ext in format.extensions() {
                let main = dir.join(format!("{FILE_STEM}.{ext}"));
                if !main.exists() {
                    continue;
                }
                let profiled = dir.join(format!("{FILE_STEM}.{}.{ext}", self.profile));
                let mut found = Vec::with_capacity(2);
                if profiled.exists() {
                    found.push(profiled);
                }
                found.push(main);
                return Some(found);
            }
        }
        None
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join(FILE_STEM)))
            .collect()
    }

    pub fn load(self) -> ConfigResult<CourierConfig> {
        let mut figment = Figment::from(Serialized::defaults(CourierConfig::default()));
        for (format, path) in self.files()? {
            info!(path = %path.display(), "Loading configuration file");
            figment = format.merge_into(figment, &path);
        }
        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["profile"]).split("__"));
        }
        for config in self.overrides {
            figment = figment.merge(Serialized::defaults(config));
        }

        let config: CourierConfig = figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        debug!(
            profile = %self.profile,
            level = %config.logging.level,
            workers = ?config.dispatch.workers,
            "Configuration loaded"
        );
        Ok(config)
    }
}

/// Loads the configuration from the default locations and environment.
pub fn load_config() -> ConfigResult<CourierConfig> {
    ConfigLoader::new().load()
}

/// Loads the configuration from `path`, with environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<CourierConfig> {
    ConfigLoader::new().file(path).load()
}
