//! Policy decision engine
//!
//! Classifies an exec target and its arguments and decides whether the call
//! runs inside the sandboxed process or is delegated to the supervisor.
//! Mixed calls are never split: one managed argument delegates the whole
//! invocation, since the new process image receives every argument anyway.

use crate::association::AssociationRegistry;
use crate::config::ListSources;
use crate::managed_list::ListCache;
use crate::policy::{ExecClass, ExecPolicy};
use crate::resolve::classify_argument;
use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// One intercepted exec call, with its target already resolved
///
/// The environment is not part of the request: it is never inspected by the
/// policy and the interception layer forwards it untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Absolute, canonical path of the program to run
    pub target: PathBuf,
    /// Argument vector, `args[0]` being the program name
    pub args: Vec<OsString>,
}

impl ExecRequest {
    pub fn new(target: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            target: target.into(),
            args,
        }
    }
}

/// Why a call was handed to the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationReason {
    /// No class permitted by the policy covers the target
    TargetForbidden(ExecClass),
    /// These argument indices name sandbox-managed paths
    ManagedArguments(Vec<usize>),
}

/// Outcome of mediating one exec call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Run locally, unchanged
    Allowed { target: PathBuf, args: Vec<OsString> },
    /// Hand the whole call to the supervisor
    Delegated {
        target: PathBuf,
        args: Vec<OsString>,
        reason: DelegationReason,
    },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    #[must_use]
    pub fn target(&self) -> &Path {
        match self {
            Decision::Allowed { target, .. } | Decision::Delegated { target, .. } => target,
        }
    }

    #[must_use]
    pub fn args(&self) -> &[OsString] {
        match self {
            Decision::Allowed { args, .. } | Decision::Delegated { args, .. } => args,
        }
    }

    /// The sentinel path to exec for a delegated call, `None` when allowed.
    #[must_use]
    pub fn delegation_target(&self, sentinel_prefix: &Path) -> Option<PathBuf> {
        match self {
            Decision::Allowed { .. } => None,
            Decision::Delegated { target, .. } => Some(delegation_target(sentinel_prefix, target)),
        }
    }
}

/// Build the path a delegated call is redirected to.
///
/// This is a plain byte concatenation of `sentinel_prefix` and `target`, so
/// `/firejail/denied/` and `/usr/bin/vlc` give `/firejail/denied//usr/bin/vlc`
/// and the supervisor can strip the prefix to recover the exact target.
#[must_use]
pub fn delegation_target(sentinel_prefix: &Path, target: &Path) -> PathBuf {
    let mut bytes = sentinel_prefix.as_os_str().as_bytes().to_vec();
    bytes.extend_from_slice(target.as_os_str().as_bytes());
    PathBuf::from(OsString::from_vec(bytes))
}

/// Decision engine over one set of policy inputs
#[derive(Debug, Clone, Copy)]
pub struct PolicyEngine<'a> {
    lists: &'a ListCache,
    sources: &'a ListSources,
    policy: ExecPolicy,
    registry: &'a AssociationRegistry,
}

impl<'a> PolicyEngine<'a> {
    pub fn new(
        lists: &'a ListCache,
        sources: &'a ListSources,
        policy: ExecPolicy,
        registry: &'a AssociationRegistry,
    ) -> Self {
        Self {
            lists,
            sources,
            policy,
            registry,
        }
    }

    #[must_use]
    pub fn policy(&self) -> ExecPolicy {
        self.policy
    }

    /// Classify a resolved exec target under the policy mask.
    ///
    /// Each class is only taken when the mask permits it, falling through
    /// otherwise:
    ///
    /// 1. `Helper` if the helper list names the target or it belongs to the
    ///    caller's association group;
    /// 2. `SandboxManaged` if the managed-binary list names it;
    /// 3. `Unspecified` for anything else.
    ///
    /// When none of these is permitted the result is `SandboxItself`: only the
    /// supervisor may run the target. A missing list counts as empty.
    #[must_use]
    pub fn classify_target(&self, caller: Option<&Path>, target: &Path) -> ExecClass {
        let class = if self.policy.permits(ExecClass::Helper) && self.is_helper(caller, target) {
            ExecClass::Helper
        } else if self.policy.permits(ExecClass::SandboxManaged)
            && self.list_contains(&self.sources.managed_bins, target)
        {
            ExecClass::SandboxManaged
        } else if self.policy.permits(ExecClass::Unspecified) {
            ExecClass::Unspecified
        } else {
            ExecClass::SandboxItself
        };
        trace!("Target {} classified as {}", target.display(), class);
        class
    }

    /// Classify every argument after `args[0]`.
    ///
    /// The result is aligned with `args`: element 0 carries `target_class`
    /// and element `i` classifies `args[i]`. Path-like arguments covered by
    /// the managed-file list are sandbox-managed, everything else is
    /// unspecified.
    #[must_use]
    pub fn classify_arguments(&self, target_class: ExecClass, args: &[OsString]) -> Vec<ExecClass> {
        let managed_files = self.lists.get_list(&self.sources.managed_files);
        let mut classes = Vec::with_capacity(args.len().max(1));
        classes.push(target_class);

        for arg in args.iter().skip(1) {
            let class = match &managed_files {
                Some(list) => {
                    let classification = classify_argument(arg);
                    match classification.resolved {
                        Some(resolved)
                            if classification.is_path_like && list.contains_path(&resolved) =>
                        {
                            ExecClass::SandboxManaged
                        }
                        _ => ExecClass::Unspecified,
                    }
                }
                None => ExecClass::Unspecified,
            };
            trace!("Argument {:?} classified as {}", arg, class);
            classes.push(class);
        }
        classes
    }

    /// Decide how to run `request` on behalf of `caller`.
    ///
    /// `caller` is the executable of the intercepting process; its
    /// association group authorizes helpers.
    #[must_use]
    pub fn decide(&self, caller: Option<&Path>, request: ExecRequest) -> Decision {
        let ExecRequest { target, args } = request;

        let target_class = self.classify_target(caller, &target);
        if target_class == ExecClass::SandboxItself {
            info!(
                "Delegating {}: no class of policy {} lets it run locally",
                target.display(),
                self.policy
            );
            return Decision::Delegated {
                target,
                args,
                reason: DelegationReason::TargetForbidden(target_class),
            };
        }

        let classes = self.classify_arguments(target_class, &args);
        let managed: Vec<usize> = if self.policy.permits(ExecClass::SandboxManaged) {
            Vec::new()
        } else {
            classes
                .iter()
                .enumerate()
                .skip(1)
                .filter(|(_, class)| **class == ExecClass::SandboxManaged)
                .map(|(index, _)| index)
                .collect()
        };

        if managed.is_empty() {
            debug!("Allowing {} ({})", target.display(), target_class);
            return Decision::Allowed { target, args };
        }

        info!(
            "Delegating {}: {} argument(s) name managed files",
            target.display(),
            managed.len()
        );
        Decision::Delegated {
            target,
            args,
            reason: DelegationReason::ManagedArguments(managed),
        }
    }

    fn is_helper(&self, caller: Option<&Path>, target: &Path) -> bool {
        caller.is_some_and(|caller| self.registry.is_associated(caller, target))
            || self.list_contains(&self.sources.helper_bins, target)
    }

    fn list_contains(&self, source: &Path, path: &Path) -> bool {
        self.lists
            .get_list(source)
            .is_some_and(|list| list.contains_path(path))
    }
}
