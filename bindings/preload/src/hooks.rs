//! Interposed exec-family entry points.
//!
//! Each hook resolves its target the way the libc function it replaces
//! would, asks the policy engine for a decision, then either forwards the
//! untouched call to libc or execs the sentinel path so the supervisor can
//! take over. A delegated call that returns fails with `EACCES`.
//!
//! The planning half of every hook (`plan_*`) is plain Rust and performs no
//! exec, so it can be tested directly.

use crate::{map_errno, real, set_errno};
use execgate::canonicalize::{canonicalize, read_fd_path, CanonicalizeMode};
use execgate::resolve::resolve_with;
use execgate::{ExecGate, ExecRequest, Result};
use std::ffi::{CStr, CString, OsStr, OsString};
use std::os::raw::{c_char, c_int};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

extern "C" {
    static mut environ: *const *const c_char;
}

/// Current value of libc's `environ`.
///
/// # Safety
///
/// No other thread may be running `setenv`/`putenv` concurrently, as for
/// `execv(3)` itself.
unsafe fn current_environ() -> *const *const c_char {
    // SAFETY: the static is copied out through a raw pointer; no reference
    // to it is formed.
    unsafe { std::ptr::addr_of!(environ).read() }
}

/// What a hook does with an intercepted call
#[derive(Debug, PartialEq, Eq)]
pub enum ExecAction {
    /// Forward the original arguments to libc
    RunOriginal,
    /// Exec this sentinel path with the original argv and envp
    Delegate(CString),
    /// Fail with this errno without exec'ing anything
    Fail(c_int),
}

/// Plan an `execve(path, argv, ...)` call.
pub fn plan_execve(gate: &ExecGate, path: &CStr, args: Vec<OsString>) -> ExecAction {
    let target = Path::new(OsStr::from_bytes(path.to_bytes()));
    plan(gate, canonicalize_target(target), args)
}

/// Plan an `execvpe(file, argv, ...)` call, searching `search` for bare names.
pub fn plan_execvpe(
    gate: &ExecGate,
    file: &CStr,
    args: Vec<OsString>,
    search: Option<&OsStr>,
) -> ExecAction {
    plan(
        gate,
        resolve_with(OsStr::from_bytes(file.to_bytes()), search),
        args,
    )
}

/// Plan an `fexecve(fd, argv, ...)` call.
pub fn plan_fexecve(gate: &ExecGate, fd: c_int, args: Vec<OsString>) -> ExecAction {
    plan(gate, read_fd_path(fd), args)
}

fn canonicalize_target(target: &Path) -> Result<PathBuf> {
    canonicalize(target, CanonicalizeMode::AllowMissing)
}

fn plan(gate: &ExecGate, target: Result<PathBuf>, args: Vec<OsString>) -> ExecAction {
    let target = match target {
        Ok(target) => target,
        Err(e) => {
            debug!("Target resolution failed: {}", e);
            return ExecAction::Fail(map_errno(&e));
        }
    };

    let decision = gate
        .engine()
        .decide(Some(gate.caller()), ExecRequest::new(target, args));

    match decision.delegation_target(gate.sentinel_prefix()) {
        None => ExecAction::RunOriginal,
        Some(sentinel) => match CString::new(sentinel.into_os_string().into_vec()) {
            Ok(sentinel) => ExecAction::Delegate(sentinel),
            Err(e) => {
                warn!("Sentinel path contains a NUL byte: {}", e);
                ExecAction::Fail(libc::EACCES)
            }
        },
    }
}

/// Copy a NULL-terminated C argument vector.
///
/// # Safety
///
/// `argv` must be NULL or a NULL-terminated array of valid C strings.
unsafe fn collect_args(argv: *const *const c_char) -> Vec<OsString> {
    let mut args = Vec::new();
    if argv.is_null() {
        return args;
    }
    let mut cursor = argv;
    loop {
        // SAFETY: the array is NULL-terminated, so every slot up to and
        // including the terminator is readable.
        let arg = unsafe { *cursor };
        if arg.is_null() {
            break;
        }
        // SAFETY: non-NULL entries are valid C strings.
        let bytes = unsafe { CStr::from_ptr(arg) }.to_bytes();
        args.push(OsStr::from_bytes(bytes).to_os_string());
        // SAFETY: not past the terminator yet.
        cursor = unsafe { cursor.add(1) };
    }
    args
}

/// Exec the sentinel path; if that returns, report the call as denied.
///
/// # Safety
///
/// `argv` and `envp` must satisfy the `execve(2)` contract.
unsafe fn delegate(
    sentinel: &CStr,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    debug!("Delegating via {}", sentinel.to_string_lossy());
    // SAFETY: sentinel is a valid C string; argv/envp come from the caller.
    unsafe { real::execve(sentinel.as_ptr(), argv, envp) };
    set_errno(libc::EACCES);
    -1
}

unsafe fn dispatch(
    action: ExecAction,
    run_original: impl FnOnce() -> c_int,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    match action {
        ExecAction::RunOriginal => run_original(),
        // SAFETY: argv/envp are the caller's, passed through unchanged.
        ExecAction::Delegate(sentinel) => unsafe { delegate(&sentinel, argv, envp) },
        ExecAction::Fail(errno) => {
            set_errno(errno);
            -1
        }
    }
}

/// Mediated `execve(2)`.
///
/// # Safety
///
/// Same contract as `execve(2)`.
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    crate::init_logging();
    if path.is_null() {
        set_errno(libc::EFAULT);
        return -1;
    }
    // SAFETY: non-NULL path is a valid C string per the execve contract.
    let path_c = unsafe { CStr::from_ptr(path) };
    // SAFETY: argv is NULL or NULL-terminated per the execve contract.
    let args = unsafe { collect_args(argv) };
    debug!("execve({})", path_c.to_string_lossy());

    let action = plan_execve(ExecGate::global(), path_c, args);
    // SAFETY: all pointers are the caller's, forwarded unchanged.
    unsafe {
        dispatch(
            action,
            || real::execve(path, argv, envp),
            argv,
            envp,
        )
    }
}

/// Mediated `execvpe(3)`.
///
/// Bare names are searched in the calling process's `PATH`, as glibc does.
///
/// # Safety
///
/// Same contract as `execvpe(3)`.
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn execvpe(
    file: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    crate::init_logging();
    if file.is_null() {
        set_errno(libc::EFAULT);
        return -1;
    }
    // SAFETY: non-NULL file is a valid C string per the execvpe contract.
    let file_c = unsafe { CStr::from_ptr(file) };
    if file_c.is_empty() {
        set_errno(libc::ENOENT);
        return -1;
    }
    // SAFETY: argv is NULL or NULL-terminated per the execvpe contract.
    let args = unsafe { collect_args(argv) };
    debug!("execvpe({})", file_c.to_string_lossy());

    let search = std::env::var_os("PATH");
    let action = plan_execvpe(ExecGate::global(), file_c, args, search.as_deref());
    // SAFETY: all pointers are the caller's, forwarded unchanged.
    unsafe {
        dispatch(
            action,
            || real::execvpe(file, argv, envp),
            argv,
            envp,
        )
    }
}

/// Mediated `fexecve(3)`.
///
/// # Safety
///
/// Same contract as `fexecve(3)`.
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn fexecve(
    fd: c_int,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    crate::init_logging();
    // SAFETY: argv is NULL or NULL-terminated per the fexecve contract.
    let args = unsafe { collect_args(argv) };
    debug!("fexecve({})", fd);

    let action = plan_fexecve(ExecGate::global(), fd, args);
    // SAFETY: all pointers are the caller's, forwarded unchanged.
    unsafe {
        dispatch(
            action,
            || real::fexecve(fd, argv, envp),
            argv,
            envp,
        )
    }
}

/// Mediated `execv(3)`: `execve` with the current environment.
///
/// # Safety
///
/// Same contract as `execv(3)`.
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn execv(path: *const c_char, argv: *const *const c_char) -> c_int {
    // SAFETY: environ is the process environment maintained by libc.
    unsafe { execve(path, argv, current_environ()) }
}

/// Mediated `execvp(3)`: `execvpe` with the current environment.
///
/// # Safety
///
/// Same contract as `execvp(3)`.
#[cfg_attr(not(test), no_mangle)]
pub unsafe extern "C" fn execvp(file: *const c_char, argv: *const *const c_char) -> c_int {
    // SAFETY: environ is the process environment maintained by libc.
    unsafe { execvpe(file, argv, current_environ()) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use execgate::{Config, ExecPolicy};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{tempdir, TempDir};

    fn args(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    fn gate_with_lists(helpers: &str, managed_bins: &str, managed_files: &str) -> (TempDir, ExecGate) {
        gate_with_policy(ExecPolicy::DEFAULT, helpers, managed_bins, managed_files)
    }

    fn gate_with_policy(
        policy: ExecPolicy,
        helpers: &str,
        managed_bins: &str,
        managed_files: &str,
    ) -> (TempDir, ExecGate) {
        let dir = tempdir().unwrap();
        let mut config = Config {
            policy,
            builtin_associations: false,
            ..Config::default()
        };
        config.lists.helper_bins = dir.path().join("helper-bins.list");
        config.lists.managed_bins = dir.path().join("managed-bins.list");
        config.lists.managed_files = dir.path().join("managed-files.list");
        fs::write(&config.lists.helper_bins, helpers).unwrap();
        fs::write(&config.lists.managed_bins, managed_bins).unwrap();
        fs::write(&config.lists.managed_files, managed_files).unwrap();
        (dir, ExecGate::with_caller(config, "/usr/bin/test-caller"))
    }

    #[test]
    fn test_execve_with_managed_argument_is_delegated() {
        let (_dir, gate) = gate_with_lists("/usr/bin/vlc\n", "", "/home/user/Secure\n");
        let action = plan_execve(
            &gate,
            c"/usr/bin/vlc",
            args(&["/usr/bin/vlc", "/tmp/a.mp3", "/home/user/Secure/x.mp3"]),
        );
        assert_eq!(
            action,
            ExecAction::Delegate(CString::new("/firejail/denied//usr/bin/vlc").unwrap())
        );
    }

    #[test]
    fn test_execve_with_plain_arguments_runs_original() {
        let (_dir, gate) = gate_with_lists("/usr/bin/vlc\n", "", "/home/user/Secure\n");
        let action = plan_execve(
            &gate,
            c"/usr/bin/vlc",
            args(&["/usr/bin/vlc", "/tmp/a.mp3", "/tmp/b.mp3"]),
        );
        assert_eq!(action, ExecAction::RunOriginal);
    }

    #[test]
    fn test_execve_managed_binary_runs_under_default_policy() {
        let (_dir, gate) = gate_with_lists("", "/usr/bin/evince\n", "");
        let action = plan_execve(&gate, c"/usr/bin/evince", args(&["evince"]));
        assert_eq!(action, ExecAction::RunOriginal);
    }

    #[test]
    fn test_execve_managed_binary_is_delegated_when_unspecified_withheld() {
        let (_dir, gate) = gate_with_policy(ExecPolicy::HELPERS, "", "/usr/bin/evince\n", "");
        let action = plan_execve(&gate, c"/usr/bin/evince", args(&["evince"]));
        assert_eq!(
            action,
            ExecAction::Delegate(CString::new("/firejail/denied//usr/bin/evince").unwrap())
        );
    }

    #[test]
    fn test_execve_symlink_loop_fails_with_eloop() {
        let (dir, gate) = gate_with_lists("", "", "");
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::os::unix::fs::symlink(&b, &a).unwrap();
        std::os::unix::fs::symlink(&a, &b).unwrap();

        let path = CString::new(a.into_os_string().into_vec()).unwrap();
        assert_eq!(
            plan_execve(&gate, &path, args(&["a"])),
            ExecAction::Fail(libc::ELOOP)
        );
    }

    #[test]
    fn test_execvpe_search_outcomes() {
        let (dir, gate) = gate_with_lists("", "", "");
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).unwrap();
        let tool = bin.join("tool");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        let search = bin.clone().into_os_string();
        assert_eq!(
            plan_execvpe(&gate, c"tool", args(&["tool"]), Some(search.as_os_str())),
            ExecAction::RunOriginal
        );
        assert_eq!(
            plan_execvpe(&gate, c"no-such-tool", args(&["no-such-tool"]), Some(search.as_os_str())),
            ExecAction::Fail(libc::ENOENT)
        );
    }

    #[test]
    fn test_execvpe_resolves_before_classifying() {
        let (dir, gate) = gate_with_policy(ExecPolicy::HELPERS, "", "", "");
        let bin = dir.path().canonicalize().unwrap().join("bin");
        fs::create_dir(&bin).unwrap();
        let tool = bin.join("tool");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(
            &gate.config().lists.managed_bins,
            format!("{}\n", tool.display()),
        )
        .unwrap();

        let search = bin.into_os_string();
        let action = plan_execvpe(&gate, c"tool", args(&["tool"]), Some(search.as_os_str()));
        let expected = format!("/firejail/denied/{}", tool.display());
        assert_eq!(action, ExecAction::Delegate(CString::new(expected).unwrap()));
    }

    #[test]
    fn test_fexecve_invalid_descriptor() {
        let (_dir, gate) = gate_with_lists("", "", "");
        assert_eq!(
            plan_fexecve(&gate, -1, args(&["x"])),
            ExecAction::Fail(libc::EINVAL)
        );
    }

    #[test]
    fn test_fexecve_uses_descriptor_path() {
        use std::os::fd::AsRawFd;

        let (dir, gate) = gate_with_policy(ExecPolicy::HELPERS, "", "", "");
        let target = dir.path().canonicalize().unwrap().join("managed-tool");
        fs::write(&target, "x").unwrap();
        fs::write(
            &gate.config().lists.managed_bins,
            format!("{}\n", target.display()),
        )
        .unwrap();

        let file = fs::File::open(&target).unwrap();
        let action = plan_fexecve(&gate, file.as_raw_fd(), args(&["managed-tool"]));
        assert!(matches!(action, ExecAction::Delegate(_)));
    }

    #[test]
    fn test_delegate_without_supervisor_fails_with_eacces() {
        let arg0 = CString::new("true").unwrap();
        let argv = [arg0.as_ptr(), std::ptr::null()];
        let sentinel = CString::new("/nonexistent-sentinel//bin/true").unwrap();

        // SAFETY: argv is NULL-terminated and outlives the call; the sentinel
        // path does not exist, so the exec returns.
        let rc = unsafe {
            dispatch(
                ExecAction::Delegate(sentinel),
                || unreachable!("delegated call must not run the original"),
                argv.as_ptr(),
                std::ptr::null(),
            )
        };
        assert_eq!(rc, -1);
        assert_eq!(std::io::Error::last_os_error().raw_os_error(), Some(libc::EACCES));
    }

    #[test]
    fn test_dispatch_fail_sets_errno() {
        // SAFETY: the Fail arm never dereferences argv or envp.
        let rc = unsafe {
            dispatch(
                ExecAction::Fail(libc::ENOENT),
                || unreachable!("failed call must not run the original"),
                std::ptr::null(),
                std::ptr::null(),
            )
        };
        assert_eq!(rc, -1);
        assert_eq!(std::io::Error::last_os_error().raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_dispatch_run_original_returns_its_result() {
        // SAFETY: the RunOriginal arm only calls the closure.
        let rc = unsafe { dispatch(ExecAction::RunOriginal, || 7, std::ptr::null(), std::ptr::null()) };
        assert_eq!(rc, 7);
    }

    #[test]
    fn test_current_environ_is_process_environment() {
        // SAFETY: no test in this crate mutates the environment.
        let envp = unsafe { current_environ() };
        assert!(!envp.is_null());
        // SAFETY: envp is libc's NULL-terminated environment array.
        let first = unsafe { *envp };
        assert_eq!(first.is_null(), std::env::vars_os().next().is_none());
    }

    #[test]
    fn test_collect_args() {
        let a = CString::new("vlc").unwrap();
        let b = CString::new("/tmp/a.mp3").unwrap();
        let argv = [a.as_ptr(), b.as_ptr(), std::ptr::null()];

        // SAFETY: argv is NULL-terminated and its strings outlive the call.
        let collected = unsafe { collect_args(argv.as_ptr()) };
        assert_eq!(collected, args(&["vlc", "/tmp/a.mp3"]));
        // SAFETY: NULL argv is accepted.
        assert!(unsafe { collect_args(std::ptr::null()) }.is_empty());
    }

    #[test]
    fn test_execve_null_path_is_efault() {
        // SAFETY: a NULL path is rejected before anything is dereferenced.
        let rc = unsafe { execve(std::ptr::null(), std::ptr::null(), std::ptr::null()) };
        assert_eq!(rc, -1);
        assert_eq!(std::io::Error::last_os_error().raw_os_error(), Some(libc::EFAULT));
    }
}
