//! Controller configuration

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;

/// Root under which per-release module trees live on the host.
pub const DEFAULT_MODULES_ROOT: &str = "/lib/modules";

/// Environment variable overriding [`DEFAULT_MODULES_ROOT`] for the CLI.
pub const MODULES_ROOT_ENV: &str = "VKERNEL_MODULES_ROOT";

/// Configuration for a module controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Directory holding `<release>/extra/vkernel`
    pub modules_root: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            modules_root: PathBuf::from(DEFAULT_MODULES_ROOT),
        }
    }
}

impl ControllerConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }
}

/// Builder for ControllerConfig
#[derive(Debug, Default)]
pub struct ControllerConfigBuilder {
    config: ControllerConfig,
}

impl ControllerConfigBuilder {
    #[must_use]
    pub fn modules_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.modules_root = path.into();
        self
    }

    #[must_use]
    pub fn build(self) -> ControllerConfig {
        self.config
    }
}

/// Get default modules root from VKERNEL_MODULES_ROOT env var or system default
///
/// Returns:
/// - `$VKERNEL_MODULES_ROOT` if set and non-empty (for development)
/// - `/lib/modules` otherwise (production)
#[must_use]
pub fn default_modules_root() -> PathBuf {
    modules_root_from(std::env::var_os(MODULES_ROOT_ENV))
}

fn modules_root_from(value: Option<OsString>) -> PathBuf {
    value
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_MODULES_ROOT), PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_is_lib_modules() {
        assert_eq!(
            ControllerConfig::default().modules_root,
            PathBuf::from("/lib/modules")
        );
    }

    #[test]
    fn builder_overrides_root() {
        let config = ControllerConfig::builder().modules_root("/srv/modules").build();
        assert_eq!(config.modules_root, PathBuf::from("/srv/modules"));
    }

    #[test]
    fn env_value_wins_unless_empty() {
        assert_eq!(
            modules_root_from(Some(OsString::from("/tmp/mods"))),
            PathBuf::from("/tmp/mods")
        );
        assert_eq!(
            modules_root_from(Some(OsString::new())),
            PathBuf::from(DEFAULT_MODULES_ROOT)
        );
        assert_eq!(modules_root_from(None), PathBuf::from(DEFAULT_MODULES_ROOT));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ControllerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ControllerConfig::default());
    }
}
