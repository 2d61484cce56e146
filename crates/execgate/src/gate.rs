//! Process-scoped mediation state
//!
//! [`ExecGate`] owns everything a mediated exec needs: configuration, the
//! managed list cache, the association registry and the identity of the
//! calling executable. One instance lives for the whole process.

use crate::association::AssociationRegistry;
use crate::config::Config;
use crate::engine::PolicyEngine;
use crate::managed_list::ListCache;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Caller identity when `/proc/self/exe` cannot be read
pub const UNKNOWN_CALLER: &str = "/dev/null";

const SELF_EXE: &str = "/proc/self/exe";

static GLOBAL: OnceLock<ExecGate> = OnceLock::new();

/// Mediation state shared by every hooked call in the process
#[derive(Debug)]
pub struct ExecGate {
    config: Config,
    lists: ListCache,
    registry: AssociationRegistry,
    caller: PathBuf,
}

impl ExecGate {
    /// Build the state for `config`, identifying the caller from
    /// `/proc/self/exe`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let caller = std::fs::read_link(SELF_EXE).unwrap_or_else(|e| {
            tracing::debug!("Cannot read {}: {}", SELF_EXE, e);
            PathBuf::from(UNKNOWN_CALLER)
        });
        Self::with_caller(config, caller)
    }

    /// Build the state for `config` with an explicit caller identity.
    #[must_use]
    pub fn with_caller(config: Config, caller: impl Into<PathBuf>) -> Self {
        let mut registry = if config.builtin_associations {
            AssociationRegistry::builtin()
        } else {
            AssociationRegistry::new()
        };
        if let Some(dir) = &config.profiles_dir {
            registry.load_profiles_dir(dir);
        }

        let caller = caller.into();
        tracing::debug!(
            "execgate ready for {} (policy: {}, {} association group(s))",
            caller.display(),
            config.policy,
            registry.len()
        );

        Self {
            config,
            lists: ListCache::new(),
            registry,
            caller,
        }
    }

    /// The process-wide instance, created from [`Config::load`] on first use.
    ///
    /// Concurrent first callers block until the single initialization
    /// finishes.
    pub fn global() -> &'static ExecGate {
        GLOBAL.get_or_init(|| ExecGate::new(Config::load()))
    }

    /// A decision engine borrowing this state.
    #[must_use]
    pub fn engine(&self) -> PolicyEngine<'_> {
        PolicyEngine::new(
            &self.lists,
            &self.config.lists,
            self.config.policy,
            &self.registry,
        )
    }

    #[must_use]
    pub fn registry(&self) -> &AssociationRegistry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn lists(&self) -> &ListCache {
        &self.lists
    }

    /// Executable of the process being mediated.
    #[must_use]
    pub fn caller(&self) -> &Path {
        &self.caller
    }

    /// Prefix the supervisor watches for.
    #[must_use]
    pub fn sentinel_prefix(&self) -> &Path {
        &self.config.sentinel_prefix
    }
}
