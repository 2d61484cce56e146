//! Execution classes and the policy mask over them
//!
//! Every exec target and every argument is classified into an [`ExecClass`].
//! An [`ExecPolicy`] is the set of classes the sandboxed process may handle
//! itself; anything outside it is delegated to the supervisor.

use serde::Deserialize;
use std::ops::{BitOr, BitOrAssign};

/// Classification of an exec target or argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecClass {
    /// An authorized helper binary of the running application
    Helper,
    /// Nothing in the policy mentions it
    Unspecified,
    /// Reserved for handling by the sandbox supervisor
    SandboxManaged,
    /// Only the sandbox itself may handle it
    SandboxItself,
}

impl ExecClass {
    const fn bit(self) -> u8 {
        match self {
            ExecClass::Helper => ExecPolicy::HELPERS.0,
            ExecClass::Unspecified => ExecPolicy::UNSPECIFIED.0,
            ExecClass::SandboxManaged => ExecPolicy::SANDBOX_MANAGED.0,
            ExecClass::SandboxItself => ExecPolicy::SANDBOX_ITSELF.0,
        }
    }
}

impl std::fmt::Display for ExecClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecClass::Helper => write!(f, "helper"),
            ExecClass::Unspecified => write!(f, "unspecified"),
            ExecClass::SandboxManaged => write!(f, "sandbox-managed"),
            ExecClass::SandboxItself => write!(f, "sandbox-itself"),
        }
    }
}

/// Bit-set of [`ExecClass`] values that may execute locally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "Vec<ExecClass>")]
pub struct ExecPolicy(u8);

impl ExecPolicy {
    pub const NOTHING: ExecPolicy = ExecPolicy(0);
    pub const HELPERS: ExecPolicy = ExecPolicy(1);
    pub const UNSPECIFIED: ExecPolicy = ExecPolicy(1 << 1);
    pub const SANDBOX_MANAGED: ExecPolicy = ExecPolicy(1 << 2);
    pub const SANDBOX_ITSELF: ExecPolicy = ExecPolicy(1 << 3);

    /// Helpers and unclassified binaries run locally; managed ones do not.
    pub const DEFAULT: ExecPolicy = ExecPolicy(Self::HELPERS.0 | Self::UNSPECIFIED.0);

    /// Whether this mask lets `class` run inside the sandboxed process.
    #[must_use]
    pub const fn permits(self, class: ExecClass) -> bool {
        self.0 & class.bit() != 0
    }

    #[must_use]
    pub const fn contains(self, other: ExecPolicy) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitOr for ExecPolicy {
    type Output = ExecPolicy;

    fn bitor(self, rhs: ExecPolicy) -> ExecPolicy {
        ExecPolicy(self.0 | rhs.0)
    }
}

impl BitOrAssign for ExecPolicy {
    fn bitor_assign(&mut self, rhs: ExecPolicy) {
        self.0 |= rhs.0;
    }
}

impl From<ExecClass> for ExecPolicy {
    fn from(class: ExecClass) -> Self {
        ExecPolicy(class.bit())
    }
}

impl From<Vec<ExecClass>> for ExecPolicy {
    fn from(classes: Vec<ExecClass>) -> Self {
        classes
            .into_iter()
            .fold(ExecPolicy::NOTHING, |acc, class| acc | class.into())
    }
}

impl std::fmt::Display for ExecPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = [
            ExecClass::Helper,
            ExecClass::Unspecified,
            ExecClass::SandboxManaged,
            ExecClass::SandboxItself,
        ]
        .into_iter()
        .filter(|class| self.permits(*class))
        .map(|class| class.to_string())
        .collect();

        if names.is_empty() {
            write!(f, "nothing")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}
