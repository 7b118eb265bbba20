use crate::bounds::ScopeBounds;
use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{OnceLock, PoisonError, RwLock};

/// Process-wide tuning for scopes, spin locks and units of work.
///
/// Every field has a default, so a settings file only needs the keys it
/// overrides:
///
/// ```yaml
/// default_bounds: process-wide
/// spin:
///   spin_iterations: 128
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AmbientSettings {
    /// Bounds used by `open_default`.
    pub default_bounds: ScopeBounds,
    pub spin: SpinSettings,
    pub work: WorkSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpinSettings {
    /// Busy-wait iterations before a multi-core spin yields the thread.
    pub spin_iterations: u32,
}

impl Default for SpinSettings {
    fn default() -> Self {
        SpinSettings {
            spin_iterations: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkSettings {
    /// Log a warning when an outermost unit of work is disposed without
    /// being completed.
    pub warn_on_abandon: bool,
}

impl Default for WorkSettings {
    fn default() -> Self {
        WorkSettings {
            warn_on_abandon: true,
        }
    }
}

fn installed() -> &'static RwLock<AmbientSettings> {
    static SETTINGS: OnceLock<RwLock<AmbientSettings>> = OnceLock::new();
    SETTINGS.get_or_init(|| RwLock::new(AmbientSettings::default()))
}

impl AmbientSettings {
    /// # Errors
    /// Returns `SettingsError::Json` if the input is not valid settings JSON.
    pub fn from_json_str(source: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(source)?)
    }

    /// # Errors
    /// Returns `SettingsError::Yaml` if the input is not valid settings YAML.
    pub fn from_yaml_str(source: &str) -> Result<Self, SettingsError> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Loads settings from a `.json`, `.yaml` or `.yml` file.
    ///
    /// # Errors
    /// Returns a `SettingsError` if the file cannot be read, has an unknown
    /// extension, or does not parse.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let display = path.to_string_lossy().to_string();
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());

        let parse: fn(&str) -> Result<Self, SettingsError> = match extension.as_deref() {
            Some("json") => Self::from_json_str,
            Some("yaml" | "yml") => Self::from_yaml_str,
            _ => return Err(SettingsError::UnsupportedFormat { path: display }),
        };

        let source = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: display,
            source,
        })?;
        parse(&source)
    }

    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Makes these settings the process-wide settings.
    pub fn install(self) {
        log::debug!("installing ambient settings: {self:?}");
        *installed().write().unwrap_or_else(PoisonError::into_inner) = self;
    }

    /// A copy of the currently installed settings.
    #[must_use]
    pub fn current() -> Self {
        installed()
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
