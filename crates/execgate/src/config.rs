//! Policy configuration
//!
//! Configuration is a small TOML file. Every key is optional; a missing file
//! means "use the defaults". Loading never aborts an exec: a file that cannot
//! be read or parsed is reported and replaced by the defaults.

use crate::error::{ExecGateError, Result};
use crate::policy::ExecPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "EXECGATE_CONFIG";

/// Config file used when [`CONFIG_ENV`] is unset
pub const DEFAULT_CONFIG_PATH: &str = "/etc/execgate/config.toml";

/// Prefix prepended to a target to signal delegation to the supervisor
pub const DEFAULT_SENTINEL_PREFIX: &str = "/firejail/denied/";

const DEFAULT_HELPER_BINS: &str = "/etc/firejail/self/helper-bins.list";
const DEFAULT_MANAGED_BINS: &str = "/etc/firejail/self/managed-bins.list";
const DEFAULT_MANAGED_FILES: &str = "/etc/firejail/self/managed-files.list";

/// Locations of the three managed list files
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListSources {
    /// Binaries the running application may execute as its helpers
    pub helper_bins: PathBuf,
    /// Binaries reserved for the supervisor
    pub managed_bins: PathBuf,
    /// Files and directories reserved for the supervisor
    pub managed_files: PathBuf,
}

impl Default for ListSources {
    fn default() -> Self {
        Self {
            helper_bins: PathBuf::from(DEFAULT_HELPER_BINS),
            managed_bins: PathBuf::from(DEFAULT_MANAGED_BINS),
            managed_files: PathBuf::from(DEFAULT_MANAGED_FILES),
        }
    }
}

/// Complete execgate configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Prefix the supervisor watches for on delegated execs
    pub sentinel_prefix: PathBuf,
    /// Classes that may execute inside the sandboxed process
    pub policy: ExecPolicy,
    pub lists: ListSources,
    /// Register the built-in application association groups
    pub builtin_associations: bool,
    /// Directory of per-application association profiles
    pub profiles_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sentinel_prefix: PathBuf::from(DEFAULT_SENTINEL_PREFIX),
            policy: ExecPolicy::DEFAULT,
            lists: ListSources::default(),
            builtin_associations: true,
            profiles_dir: None,
        }
    }
}

impl Config {
    /// Load the configuration for this process.
    ///
    /// Reads the file named by [`CONFIG_ENV`], falling back to
    /// [`DEFAULT_CONFIG_PATH`]. Errors are logged and replaced by defaults.
    #[must_use]
    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Load the configuration stored at `path`.
    ///
    /// A missing file yields the defaults; any other failure is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ExecGateError::ConfigRead {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        let config = Self::from_toml_str(&content)?;
        tracing::debug!(
            "Loaded config from {} (policy: {})",
            path.display(),
            config.policy
        );
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| ExecGateError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        require_absolute("sentinel_prefix", &self.sentinel_prefix)?;
        require_absolute("lists.helper_bins", &self.lists.helper_bins)?;
        require_absolute("lists.managed_bins", &self.lists.managed_bins)?;
        require_absolute("lists.managed_files", &self.lists.managed_files)?;
        if let Some(dir) = &self.profiles_dir {
            require_absolute("profiles_dir", dir)?;
        }
        Ok(())
    }
}

fn require_absolute(key: &str, path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(ExecGateError::ConfigParse(format!(
            "{} must be an absolute path, got '{}'",
            key,
            path.display()
        )))
    }
}
