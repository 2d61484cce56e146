//! The un-intercepted libc exec primitives.
//!
//! Resolved once with `dlsym(RTLD_NEXT, ...)`, i.e. the next definition after
//! this shared object in symbol lookup order.

use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int};
use std::sync::OnceLock;

type ExecveFn =
    unsafe extern "C" fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int;
type FexecveFn = unsafe extern "C" fn(c_int, *const *const c_char, *const *const c_char) -> c_int;

struct RealExec {
    execve: Option<ExecveFn>,
    execvpe: Option<ExecveFn>,
    fexecve: Option<FexecveFn>,
}

static REAL: OnceLock<RealExec> = OnceLock::new();

fn lookup(name: &CStr) -> *mut c_void {
    // SAFETY: `name` is a valid NUL-terminated string and RTLD_NEXT is a
    // valid pseudo-handle for dlsym.
    unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) }
}

fn real() -> &'static RealExec {
    REAL.get_or_init(|| {
        let execve = lookup(c"execve");
        let execvpe = lookup(c"execvpe");
        let fexecve = lookup(c"fexecve");
        if execve.is_null() || execvpe.is_null() || fexecve.is_null() {
            tracing::warn!("Could not resolve every libc exec primitive via RTLD_NEXT");
        }
        // SAFETY: each non-null pointer is the address of the libc function of
        // that name, whose C signature matches the target fn pointer type.
        unsafe {
            RealExec {
                execve: (!execve.is_null())
                    .then(|| std::mem::transmute::<*mut c_void, ExecveFn>(execve)),
                execvpe: (!execvpe.is_null())
                    .then(|| std::mem::transmute::<*mut c_void, ExecveFn>(execvpe)),
                fexecve: (!fexecve.is_null())
                    .then(|| std::mem::transmute::<*mut c_void, FexecveFn>(fexecve)),
            }
        }
    })
}

fn unavailable() -> c_int {
    crate::set_errno(libc::ENOSYS);
    -1
}

/// Call libc's `execve`.
///
/// # Safety
///
/// Same contract as `execve(2)`: `path` is a valid C string, `argv` and
/// `envp` are NULL-terminated arrays of valid C strings (or NULL).
pub unsafe fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    match real().execve {
        // SAFETY: forwarded verbatim under the caller's contract.
        Some(f) => unsafe { f(path, argv, envp) },
        None => unavailable(),
    }
}

/// Call libc's `execvpe`.
///
/// # Safety
///
/// Same contract as `execvpe(3)`.
pub unsafe fn execvpe(
    file: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    match real().execvpe {
        // SAFETY: forwarded verbatim under the caller's contract.
        Some(f) => unsafe { f(file, argv, envp) },
        None => unavailable(),
    }
}

/// Call libc's `fexecve`.
///
/// # Safety
///
/// Same contract as `fexecve(3)`.
pub unsafe fn fexecve(fd: c_int, argv: *const *const c_char, envp: *const *const c_char) -> c_int {
    match real().fexecve {
        // SAFETY: forwarded verbatim under the caller's contract.
        Some(f) => unsafe { f(fd, argv, envp) },
        None => unavailable(),
    }
}
