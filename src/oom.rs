//! Out-of-memory-killer priority management
//!
//! Scores are written per PID to `/proc/<pid>/oom_score_adj`. The proc
//! root is overridable through `APP_LAUNCH_OOM_PROC_PATH` for tests.
//! Unprivileged writes that the kernel refuses (`EACCES`) fall back to a
//! setuid helper executable invoked with `(pid, score)`.

use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const OOM_PROC_PATH_ENV: &str = "APP_LAUNCH_OOM_PROC_PATH";
pub const OOM_HELPER_ENV: &str = "APP_LAUNCH_OOM_HELPER";

const DEFAULT_HELPER: &str = "/usr/lib/app-launch/oom-adjust-setuid-helper";

/// An OOM priority tier. Lower means the kernel kills later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OomScore(i32);

impl OomScore {
    /// Tier for the focused, foreground application.
    pub const FOCUSED: OomScore = OomScore(100);
    /// Tier for short-lived untrusted helper processes.
    pub const UNTRUSTED_HELPER: OomScore = OomScore(200);
    /// Tier for paused applications, first in line for the killer.
    pub const PAUSED: OomScore = OomScore(900);

    /// Custom tier from a raw kernel value. Values outside `[-1000, 1000]`
    /// are rejected; values outside the expected `[100, 900]` band are
    /// accepted with a warning since they invert the usual priorities.
    pub fn from_raw(value: i32) -> Result<Self> {
        if !(-1000..=1000).contains(&value) {
            return Err(Error::OomScoreRange(value));
        }
        if !(100..=900).contains(&value) {
            log::warn!(
                "oom score {} is outside the expected [100, 900] band",
                value
            );
        }
        Ok(OomScore(value))
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

pub(crate) fn proc_root() -> PathBuf {
    std::env::var_os(OOM_PROC_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/proc"))
}

fn score_path(root: &Path, pid: u32) -> PathBuf {
    root.join(pid.to_string()).join("oom_score_adj")
}

/// Disposition of a failed score write.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WriteFallback {
    /// Process exited between snapshot and write; expected race, stay quiet.
    Ignore,
    /// Kernel refused the adjustment; route through the setuid helper.
    Helper,
    /// Anything else is logged and dropped.
    Log,
}

pub(crate) fn classify_write_error(err: &io::Error) -> WriteFallback {
    match err.raw_os_error() {
        Some(libc::ENOENT) => WriteFallback::Ignore,
        Some(libc::EACCES) => WriteFallback::Helper,
        _ => WriteFallback::Log,
    }
}

pub(crate) fn helper_command(pid: u32, score: OomScore) -> tokio::process::Command {
    let helper = std::env::var_os(OOM_HELPER_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HELPER));
    let mut cmd = tokio::process::Command::new(helper);
    cmd.arg(pid.to_string()).arg(score.value().to_string());
    cmd
}

pub(crate) fn set_pid_score_at(root: &Path, pid: u32, score: OomScore) {
    let path = score_path(root, pid);
    let err = match std::fs::write(&path, score.value().to_string()) {
        Ok(()) => return,
        Err(e) => e,
    };
    match classify_write_error(&err) {
        WriteFallback::Ignore => {}
        WriteFallback::Helper => match helper_command(pid, score).spawn() {
            Ok(mut child) => {
                // Fire and forget; reap off to the side.
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });
            }
            Err(e) => log::warn!("oom helper failed to spawn for pid {}: {}", pid, e),
        },
        WriteFallback::Log => log::warn!("failed to set oom score for pid {}: {}", pid, err),
    }
}

/// Best-effort score write for one pid.
pub(crate) fn set_pid_score(pid: u32, score: OomScore) {
    set_pid_score_at(&proc_root(), pid, score);
}

pub(crate) fn pid_score_at(root: &Path, pid: u32) -> Result<OomScore> {
    let content = std::fs::read_to_string(score_path(root, pid))?;
    let value: i32 = content.trim().parse().map_err(|_| {
        Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unparseable oom_score_adj for pid {}", pid),
        ))
    })?;
    Ok(OomScore(value))
}

/// Read a pid's current score. Unlike writes, read failures are hard
/// errors: the caller asked a direct question about a specific process.
pub(crate) fn pid_score(pid: u32) -> Result<OomScore> {
    pid_score_at(&proc_root(), pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicU32, Ordering};

    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_test_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = PathBuf::from(format!(
            "/tmp/app-launch-oom-{}-{}",
            std::process::id(),
            id
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_tier_constants() {
        assert_eq!(OomScore::FOCUSED.value(), 100);
        assert_eq!(OomScore::UNTRUSTED_HELPER.value(), 200);
        assert_eq!(OomScore::PAUSED.value(), 900);
    }

    #[test]
    fn test_from_raw_range() {
        assert!(OomScore::from_raw(-1001).is_err());
        assert!(OomScore::from_raw(1001).is_err());
        // Outside the expected band but inside kernel range: accepted.
        assert_eq!(OomScore::from_raw(-500).unwrap().value(), -500);
        assert_eq!(OomScore::from_raw(150).unwrap().value(), 150);
    }

    #[test]
    fn test_write_error_classification() {
        let enoent = io::Error::from_raw_os_error(libc::ENOENT);
        let eacces = io::Error::from_raw_os_error(libc::EACCES);
        let eperm = io::Error::from_raw_os_error(libc::EPERM);
        assert_eq!(classify_write_error(&enoent), WriteFallback::Ignore);
        assert_eq!(classify_write_error(&eacces), WriteFallback::Helper);
        assert_eq!(classify_write_error(&eperm), WriteFallback::Log);
    }

    #[test]
    fn test_helper_argv_is_pid_then_score() {
        let cmd = helper_command(1234, OomScore::PAUSED);
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["1234", "900"]);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let root = unique_test_dir();
        fs::create_dir_all(root.join("42")).unwrap();
        fs::write(root.join("42/oom_score_adj"), "0").unwrap();

        set_pid_score_at(&root, 42, OomScore::FOCUSED);
        assert_eq!(pid_score_at(&root, 42).unwrap().value(), 100);
    }

    #[test]
    fn test_vanished_pid_write_is_silent() {
        let root = unique_test_dir();
        // No directory for the pid: ENOENT, which must not warn or spawn.
        set_pid_score_at(&root, 9999, OomScore::PAUSED);
    }

    #[test]
    fn test_read_missing_pid_is_hard_error() {
        let root = unique_test_dir();
        assert!(pid_score_at(&root, 9999).is_err());
    }
}
