//! execgate - Exec-call mediation for sandboxed applications
//!
//! This library decides, for every program a confined application tries to
//! execute, whether the call may run inside the sandbox or must be handed to
//! a trusted supervisor. It is the engine behind the `execgate-preload`
//! shared object, which interposes the libc exec family.
//!
//! # Overview
//!
//! A call is judged on two things:
//!
//! - **The target.** It takes the first class the policy permits: helper
//!   (from the helper list or the caller's association group), then
//!   sandbox-managed (from the managed-binary list), then unspecified. Under
//!   the default policy a managed binary therefore runs as unspecified. A
//!   target no permitted class covers goes to the supervisor.
//! - **The arguments.** Any argument naming a path under a managed-file
//!   prefix sends the whole call to the supervisor.
//!
//! Delegation is signalled by exec'ing `<sentinel-prefix><target>`, a path
//! the supervisor watches for.
//!
//! # Example
//!
//! ```no_run
//! use execgate::{Config, ExecGate, ExecRequest};
//! use std::ffi::OsString;
//!
//! fn main() -> execgate::Result<()> {
//!     let gate = ExecGate::new(Config::load());
//!
//!     let target = execgate::resolve(std::ffi::OsStr::new("vlc"))?;
//!     let args = vec![OsString::from("vlc"), OsString::from("/tmp/a.mp3")];
//!     let decision = gate
//!         .engine()
//!         .decide(Some(gate.caller()), ExecRequest::new(target, args));
//!
//!     match decision.delegation_target(gate.sentinel_prefix()) {
//!         Some(sentinel) => println!("delegate via {}", sentinel.display()),
//!         None => println!("run {}", decision.target().display()),
//!     }
//!     Ok(())
//! }
//! ```

pub mod association;
pub mod canonicalize;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod managed_list;
pub mod policy;
pub mod resolve;

// Re-exports for convenience
pub use association::{AssociationGroup, AssociationRegistry};
pub use canonicalize::{canonicalize, read_fd_path, CanonicalizeMode};
pub use config::{Config, ListSources};
pub use engine::{delegation_target, Decision, DelegationReason, ExecRequest, PolicyEngine};
pub use error::{ExecGateError, Result};
pub use gate::ExecGate;
pub use managed_list::{ListCache, ManagedList};
pub use policy::{ExecClass, ExecPolicy};
pub use resolve::{classify_argument, resolve, resolve_with, ArgClassification};
