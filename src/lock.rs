//! Waiting for the dpkg/apt lock.
//!
//! apt takes `fcntl` locks on a handful of files under /var/lib and
//! /var/cache. We never take them ourselves; we ask `fuser` whether anyone
//! holds them and poll until nobody does.

use std::time::Duration;

use crate::error::BootstrapError;
use crate::process::{Cmd, Host};

pub const PACKAGE_LOCK_FILES: &[&str] = &[
    "/var/lib/dpkg/lock",
    "/var/lib/dpkg/lock-frontend",
    "/var/lib/apt/lists/lock",
    "/var/cache/apt/archives/lock",
];

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How long and how often to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// `None` waits forever.
    pub max_wait: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
        }
    }
}

impl RetryPolicy {
    /// Number of polls allowed before giving up, if bounded. A bounded wait
    /// always polls at least twice, so it sleeps once before timing out.
    fn max_attempts(&self) -> Option<u64> {
        let max_wait = self.max_wait?;
        let intervals = max_wait.as_millis() / self.interval.as_millis().max(1);
        Some((intervals as u64 + 1).max(2))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// No lock checker on this host; nothing was polled.
    Skipped,
    /// The lock was free after `polls` checks.
    Acquired { polls: u64 },
}

/// Poll `is_locked` until it reports free, sleeping `policy.interval`
/// between checks.
pub fn wait_until_free(
    mut is_locked: impl FnMut() -> bool,
    policy: RetryPolicy,
    mut sleep: impl FnMut(Duration),
) -> Result<u64, BootstrapError> {
    let limit = policy.max_attempts();
    let mut polls = 0u64;
    loop {
        polls += 1;
        if !is_locked() {
            return Ok(polls);
        }
        if limit.is_some_and(|max| polls >= max) {
            return Err(BootstrapError::LockTimeout {
                waited: policy.interval * (polls - 1) as u32,
            });
        }
        if polls == 1 {
            println!("Waiting for other software managers to finish...");
        }
        tracing::debug!(polls, "package database locked");
        sleep(policy.interval);
    }
}

/// Whether any process holds one of the package database locks.
fn package_lock_held(host: &dyn Host) -> bool {
    let cmd = Cmd::new("fuser").args(PACKAGE_LOCK_FILES.iter().copied()).allow_fail();
    match host.run(&cmd) {
        // fuser exits 0 when at least one file is in use.
        Ok(out) => out.success(),
        Err(e) => {
            tracing::warn!(error = %e, "could not run fuser; assuming lock is free");
            false
        }
    }
}

/// Block until apt/dpkg are idle, or skip when `fuser` is not installed.
pub fn wait_for_package_lock(
    host: &dyn Host,
    policy: RetryPolicy,
    sleep: impl FnMut(Duration),
) -> Result<LockWait, BootstrapError> {
    if !host.command_exists("fuser") {
        tracing::info!("fuser not available; skipping package lock wait");
        return Ok(LockWait::Skipped);
    }
    let polls = wait_until_free(|| package_lock_held(host), policy, sleep)?;
    Ok(LockWait::Acquired { polls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::FakeHost;
    use crate::process::CmdOutput;
    use std::cell::Cell;
    use std::rc::Rc;

    fn no_sleep(_: Duration) {}

    #[test]
    fn test_free_lock_returns_after_one_poll() {
        let polls = wait_until_free(|| false, RetryPolicy::default(), no_sleep).unwrap();
        assert_eq!(polls, 1);
    }

    #[test]
    fn test_polls_until_free_and_sleeps_between() {
        let mut remaining = 3;
        let mut slept = Vec::new();
        let polls = wait_until_free(
            || {
                if remaining == 0 {
                    return false;
                }
                remaining -= 1;
                true
            },
            RetryPolicy::default(),
            |d| slept.push(d),
        )
        .unwrap();
        assert_eq!(polls, 4);
        assert_eq!(slept, vec![DEFAULT_POLL_INTERVAL; 3]);
    }

    #[test]
    fn test_bounded_policy_times_out() {
        let policy = RetryPolicy {
            interval: Duration::from_secs(2),
            max_wait: Some(Duration::from_secs(10)),
        };
        let mut checks = 0;
        let err = wait_until_free(
            || {
                checks += 1;
                true
            },
            policy,
            no_sleep,
        )
        .unwrap_err();
        assert_eq!(checks, 6);
        match err {
            BootstrapError::LockTimeout { waited } => assert_eq!(waited, Duration::from_secs(10)),
            other => panic!("expected LockTimeout, got {other:?}"),
        }
    }

    #[test]
    fn test_short_timeout_still_sleeps_once() {
        let policy = RetryPolicy {
            interval: Duration::from_secs(5),
            max_wait: Some(Duration::from_secs(1)),
        };
        let mut checks = 0;
        let mut slept = Vec::new();
        let err = wait_until_free(
            || {
                checks += 1;
                true
            },
            policy,
            |d| slept.push(d),
        )
        .unwrap_err();
        assert_eq!(checks, 2);
        assert_eq!(slept, vec![Duration::from_secs(5)]);
        match err {
            BootstrapError::LockTimeout { waited } => assert_eq!(waited, Duration::from_secs(5)),
            other => panic!("expected LockTimeout, got {other:?}"),
        }
    }

    #[test]
    fn test_skipped_without_fuser() {
        let host = FakeHost::permissive(&[]);
        let result = wait_for_package_lock(&host, RetryPolicy::default(), no_sleep).unwrap();
        assert_eq!(result, LockWait::Skipped);
        assert!(host.history.borrow().is_empty());
    }

    #[test]
    fn test_waits_while_fuser_reports_holders() {
        let busy = Rc::new(Cell::new(2));
        let state = busy.clone();
        let host = FakeHost::new(&["fuser"], move |_| {
            if state.get() > 0 {
                state.set(state.get() - 1);
                CmdOutput::ok(" 1234")
            } else {
                CmdOutput::failed(1, "")
            }
        });
        let result = wait_for_package_lock(&host, RetryPolicy::default(), no_sleep).unwrap();
        assert_eq!(result, LockWait::Acquired { polls: 3 });
        assert_eq!(host.count("fuser /var/lib/dpkg/lock"), 3);
    }
}
