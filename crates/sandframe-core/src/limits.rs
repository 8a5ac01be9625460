//! Resource limits applied by the worker to itself before running a script.
//!
//! Best effort: a limit the OS refuses is logged and skipped. The wall-clock
//! deadline enforced by the host does not depend on any of these.

use crate::config::WorkerOptions;

/// Open file descriptors allowed in the worker.
pub const MAX_OPEN_FILES: u64 = 16;

/// One limit and whether the OS accepted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedLimit {
    pub name: &'static str,
    pub value: u64,
    pub accepted: bool,
}

/// The limits `options` asks for, in application order.
pub fn planned(options: &WorkerOptions) -> Vec<(&'static str, u64)> {
    let mut limits = vec![("RLIMIT_CORE", 0), ("RLIMIT_NOFILE", MAX_OPEN_FILES)];
    if let Some(bytes) = options.memory_limit_bytes {
        limits.push(("RLIMIT_AS", bytes));
    }
    if let Some(secs) = options.cpu_limit_secs {
        limits.push(("RLIMIT_CPU", secs));
    }
    limits
}

#[cfg(unix)]
mod imp {
    use super::AppliedLimit;

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    type Resource = libc::__rlimit_resource_t;
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    type Resource = libc::c_int;

    fn resource(name: &str) -> Option<Resource> {
        Some(match name {
            "RLIMIT_CORE" => libc::RLIMIT_CORE,
            "RLIMIT_NOFILE" => libc::RLIMIT_NOFILE,
            "RLIMIT_AS" => libc::RLIMIT_AS,
            "RLIMIT_CPU" => libc::RLIMIT_CPU,
            _ => return None,
        })
    }

    /// Lower both soft and hard limits, never raising the current hard limit.
    pub fn apply_one(name: &'static str, value: u64) -> AppliedLimit {
        let Some(resource) = resource(name) else {
            return AppliedLimit { name, value, accepted: false };
        };
        let mut current = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
        // SAFETY: `current` is a valid, writable rlimit.
        if unsafe { libc::getrlimit(resource, &mut current) } != 0 {
            tracing::warn!(limit = name, error = %std::io::Error::last_os_error(), "getrlimit failed");
            return AppliedLimit { name, value, accepted: false };
        }
        let wanted = value as libc::rlim_t;
        // CPU gets one extra second between SIGXCPU and SIGKILL.
        let wanted_hard = if name == "RLIMIT_CPU" { wanted.saturating_add(1) } else { wanted };
        let hard = if current.rlim_max == libc::RLIM_INFINITY {
            wanted_hard
        } else {
            current.rlim_max.min(wanted_hard)
        };
        let limit = libc::rlimit {
            rlim_cur: wanted.min(hard),
            rlim_max: hard,
        };
        // SAFETY: `limit` is a valid rlimit for a known resource.
        let accepted = unsafe { libc::setrlimit(resource, &limit) } == 0;
        if !accepted {
            tracing::warn!(
                limit = name,
                value,
                error = %std::io::Error::last_os_error(),
                "resource limit refused"
            );
        }
        AppliedLimit { name, value, accepted }
    }
}

/// Apply the limits for `options` to the current process.
#[cfg(unix)]
pub fn apply(options: &WorkerOptions) -> Vec<AppliedLimit> {
    planned(options)
        .into_iter()
        .map(|(name, value)| {
            let applied = imp::apply_one(name, value);
            tracing::debug!(limit = name, value, accepted = applied.accepted, "resource limit");
            applied
        })
        .collect()
}

#[cfg(not(unix))]
pub fn apply(options: &WorkerOptions) -> Vec<AppliedLimit> {
    tracing::warn!("resource limits are not supported on this platform");
    planned(options)
        .into_iter()
        .map(|(name, value)| AppliedLimit { name, value, accepted: false })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planned_limits_follow_options() {
        let options = WorkerOptions {
            memory_limit_bytes: Some(1 << 30),
            cpu_limit_secs: Some(17),
            ..WorkerOptions::default()
        };
        assert_eq!(
            planned(&options),
            vec![
                ("RLIMIT_CORE", 0),
                ("RLIMIT_NOFILE", 16),
                ("RLIMIT_AS", 1 << 30),
                ("RLIMIT_CPU", 17)
            ]
        );
        assert_eq!(planned(&WorkerOptions::default()).len(), 2);
    }
}
