//! Pre-exec hardening for the sandboxed interpreter.
//!
//! [`ProcessLimits`] is derived from a [`SandboxConfig`] and installed on a
//! [`tokio::process::Command`] as a `pre_exec` hook.  The hook runs in the
//! forked child before `exec`, so it may only perform async-signal-safe
//! work: plain `getrlimit`/`setrlimit`/`unshare`/`open`/`write` syscalls,
//! no allocation.
//!
//! Requested limits are clamped to the inherited hard limit so an already
//! restricted host never turns hardening into a spawn failure.

use crate::config::SandboxConfig;

/// Kernel-enforced ceilings applied to one sandboxed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    /// `RLIMIT_CPU`, in seconds.
    pub cpu_seconds: u64,
    /// `RLIMIT_AS`, in bytes.
    pub address_space_bytes: u64,
    /// `RLIMIT_FSIZE`, in bytes.
    pub file_size_bytes: u64,
    /// `RLIMIT_NOFILE`.
    pub open_files: u64,
    /// Whether to detach from the host network namespace.
    pub isolate_network: bool,
}

impl ProcessLimits {
    /// Derive limits from the sandbox configuration.
    ///
    /// The CPU limit is the wall-clock deadline rounded up to whole seconds
    /// plus one, so the wall-clock timer always fires first for busy loops.
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            cpu_seconds: config.timeout_ms.div_ceil(1000) + 1,
            address_space_bytes: config.memory_limit_bytes,
            file_size_bytes: config.max_file_bytes,
            open_files: config.max_open_files,
            isolate_network: config.isolate_network,
        }
    }

    /// Install the limits as a `pre_exec` hook on `command`.
    #[cfg(unix)]
    pub fn install(self, command: &mut tokio::process::Command) {
        // SAFETY: the closure only issues async-signal-safe syscalls and
        // touches no memory shared with the parent.
        unsafe {
            command.pre_exec(move || self.apply_in_child());
        }
    }

    /// No-op on platforms without rlimits.
    #[cfg(not(unix))]
    pub fn install(self, _command: &mut tokio::process::Command) {}

    #[cfg(unix)]
    fn apply_in_child(&self) -> std::io::Result<()> {
        rlimit::clamp(libc::RLIMIT_CPU, self.cpu_seconds)?;
        rlimit::clamp(libc::RLIMIT_AS, self.address_space_bytes)?;
        rlimit::clamp(libc::RLIMIT_FSIZE, self.file_size_bytes)?;
        rlimit::clamp(libc::RLIMIT_NOFILE, self.open_files)?;
        rlimit::clamp(libc::RLIMIT_CORE, 0)?;

        #[cfg(target_os = "linux")]
        if self.isolate_network {
            enter_private_network()?;
        }

        Ok(())
    }
}

/// Detach the calling process from the host network.
///
/// A fresh user namespace lets unprivileged callers create the network
/// namespace.  The caller's own ids are mapped into it, otherwise files
/// created in the workspace would have no owner and creation would fail.
/// When user namespaces are unavailable, privileged callers can still
/// create the network namespace alone.  Failure of both leaves the process
/// on the host network; the static analyzer remains the primary barrier.
#[cfg(target_os = "linux")]
fn enter_private_network() -> std::io::Result<()> {
    // SAFETY: geteuid/getegid cannot fail and touch no memory.
    let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };

    // SAFETY: unshare only affects the namespaces of the calling process.
    if unsafe { libc::unshare(libc::CLONE_NEWUSER | libc::CLONE_NEWNET) } == 0 {
        match write_proc(c"/proc/self/setgroups", b"deny") {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        write_proc(c"/proc/self/uid_map", IdMap::identity(uid).as_bytes())?;
        write_proc(c"/proc/self/gid_map", IdMap::identity(gid).as_bytes())?;
        return Ok(());
    }

    // SAFETY: as above.
    let _ = unsafe { libc::unshare(libc::CLONE_NEWNET) };
    Ok(())
}

/// Write `contents` to a `/proc` control file with raw syscalls.
#[cfg(target_os = "linux")]
fn write_proc(path: &std::ffi::CStr, contents: &[u8]) -> std::io::Result<()> {
    // SAFETY: `path` is NUL-terminated and outlives the call.
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: `contents` is a valid buffer of `contents.len()` bytes.
    let written = unsafe { libc::write(fd, contents.as_ptr().cast(), contents.len()) };
    let result = if written < 0 {
        Err(std::io::Error::last_os_error())
    } else if written as usize != contents.len() {
        Err(std::io::Error::from(std::io::ErrorKind::WriteZero))
    } else {
        Ok(())
    };
    // SAFETY: `fd` was opened above and is closed exactly once.
    unsafe { libc::close(fd) };
    result
}

/// A single-line `uid_map`/`gid_map` entry (`<id> <id> 1`), formatted on
/// the stack so it can be built between fork and exec.
#[cfg(target_os = "linux")]
struct IdMap {
    buf: [u8; 32],
    len: usize,
}

#[cfg(target_os = "linux")]
impl IdMap {
    fn identity(id: u32) -> Self {
        let mut map = Self {
            buf: [0; 32],
            len: 0,
        };
        map.push_id(id);
        map.push(b" ");
        map.push_id(id);
        map.push(b" 1\n");
        map
    }

    fn push_id(&mut self, id: u32) {
        let mut digits = [0u8; 10];
        let mut start = digits.len();
        let mut rest = id;
        loop {
            start -= 1;
            digits[start] = b'0' + (rest % 10) as u8;
            rest /= 10;
            if rest == 0 {
                break;
            }
        }
        self.push(&digits[start..]);
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

#[cfg(unix)]
mod rlimit {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    pub type Resource = libc::__rlimit_resource_t;
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    pub type Resource = libc::c_int;

    /// Lower `resource` to `value`, or to the current hard limit if that is
    /// already smaller.
    pub fn clamp(resource: Resource, value: u64) -> std::io::Result<()> {
        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `current` is a valid, writable rlimit struct.
        if unsafe { libc::getrlimit(resource, &mut current) } != 0 {
            return Err(std::io::Error::last_os_error());
        }

        let wanted = value as libc::rlim_t;
        let ceiling = if current.rlim_max == libc::RLIM_INFINITY {
            wanted
        } else {
            wanted.min(current.rlim_max)
        };
        let limit = libc::rlimit {
            rlim_cur: ceiling,
            rlim_max: ceiling,
        };
        // SAFETY: `limit` is a valid rlimit struct that outlives the call.
        if unsafe { libc::setrlimit(resource, &limit) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }
}
