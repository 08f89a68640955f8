//! Running application instance
//!
//! An [`Instance`] is a lightweight handle: appid, job kind, instance id
//! and a weak link back to the Registry. It holds no process state of its
//! own; every query goes to the job backend or the cgroup bridge, so two
//! handles to the same unit always agree.
//!
//! Process-set operations (pause, resume, OOM adjustment) fight a race:
//! a signalled process can fork before its siblings are signalled. The
//! convergence loop re-snapshots the cgroup until a pass discovers no new
//! pid, acting on each pid exactly once.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Weak};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::activity::{self, ActivityEvent};
use crate::appid::AppId;
use crate::error::{Error, Result};
use crate::handshake;
use crate::jobs::{self, JobKind};
use crate::oom::{self, OomScore};
use crate::registry::RegistryInner;

/// Handle to one running (or launching) unit.
#[derive(Clone)]
pub struct Instance {
    appid: AppId,
    kind: JobKind,
    instance_id: String,
    instance_name: String,
    urls: Vec<String>,
    registry: Weak<RegistryInner>,
}

impl Instance {
    pub(crate) fn new(
        appid: AppId,
        kind: JobKind,
        instance_id: String,
        instance_name: String,
        urls: Vec<String>,
        registry: Weak<RegistryInner>,
    ) -> Self {
        Self {
            appid,
            kind,
            instance_id,
            instance_name,
            urls,
            registry,
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.appid
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    fn registry(&self) -> Result<Arc<RegistryInner>> {
        self.registry.upgrade().ok_or(Error::RegistryLost)
    }

    /// Cgroup of this unit under the job-control hierarchy.
    fn cgroup_name(&self) -> String {
        format!("upstart/{}", jobs::unit_name(self.kind, &self.instance_name))
    }

    /// Snapshot of every pid in the unit's cgroup. Racy: processes can
    /// come and go before the caller acts on the list.
    pub async fn pids(&self) -> Result<Vec<u32>> {
        let reg = self.registry()?;
        let cgroups = reg.cgroups.clone();
        let group = self.cgroup_name();
        reg.exec.run(async move { cgroups.tasks(&group).await }).await?
    }

    /// Pid of the unit's main process; 0 when the unit is not running.
    pub async fn primary_pid(&self) -> Result<u32> {
        let reg = self.registry()?;
        let inner = Arc::clone(&reg);
        let kind = self.kind;
        let name = self.instance_name.clone();
        reg.exec
            .run(async move { inner.jobs.backend.primary_pid(kind, &name).await })
            .await
    }

    /// SIGSTOP every process in the unit and demote it to the PAUSED OOM
    /// tier, then announce the pause on the session bus.
    pub async fn pause(&self) -> Result<()> {
        let reg = self.registry()?;
        let this = self.clone();
        let inner = Arc::clone(&reg);
        reg.exec
            .run(async move {
                log::debug!("pausing {}", this.appid);
                let pids = this
                    .visit_pids(&inner, |pid| {
                        signal_pid(pid, Signal::SIGSTOP);
                        oom::set_pid_score(pid, OomScore::PAUSED);
                    })
                    .await?;
                this.announce(&inner, "ApplicationPaused", pids).await;
                activity::report(&inner.conn, &this.appid, ActivityEvent::Leave);
                Ok(())
            })
            .await?
    }

    /// SIGCONT every process and restore the FOCUSED OOM tier.
    pub async fn resume(&self) -> Result<()> {
        let reg = self.registry()?;
        let this = self.clone();
        let inner = Arc::clone(&reg);
        reg.exec
            .run(async move {
                log::debug!("resuming {}", this.appid);
                let pids = this
                    .visit_pids(&inner, |pid| {
                        signal_pid(pid, Signal::SIGCONT);
                        oom::set_pid_score(pid, OomScore::FOCUSED);
                    })
                    .await?;
                this.announce(&inner, "ApplicationResumed", pids).await;
                activity::report(&inner.conn, &this.appid, ActivityEvent::Access);
                Ok(())
            })
            .await?
    }

    /// Move every process in the unit to the given OOM tier.
    pub async fn set_oom_adjustment(&self, score: OomScore) -> Result<()> {
        let reg = self.registry()?;
        let this = self.clone();
        let inner = Arc::clone(&reg);
        reg.exec
            .run(async move {
                this.visit_pids(&inner, |pid| oom::set_pid_score(pid, score))
                    .await?;
                Ok(())
            })
            .await?
    }

    /// Current OOM score of the unit's primary process. Unlike the write
    /// path this is a direct question with a hard answer: no primary pid
    /// or an unreadable score file is an error.
    pub async fn oom_adjustment(&self) -> Result<OomScore> {
        let pid = self.primary_pid().await?;
        if pid == 0 {
            return Err(Error::NoPrimaryPid(self.appid.to_string()));
        }
        oom::pid_score(pid)
    }

    /// Ask the backend to stop the unit. Best-effort: a unit that is
    /// already gone is success.
    pub async fn stop(&self) -> Result<()> {
        let reg = self.registry()?;
        let inner = Arc::clone(&reg);
        let kind = self.kind;
        let appid = self.appid.clone();
        let instance_id = self.instance_id.clone();
        reg.exec
            .run(async move { inner.jobs.backend.stop(kind, &appid, &instance_id).await })
            .await
    }

    /// Run `action` once per pid in the unit's cgroup, re-snapshotting
    /// until no new pid appears.
    async fn visit_pids<F>(&self, reg: &Arc<RegistryInner>, action: F) -> Result<Vec<u32>>
    where
        F: FnMut(u32),
    {
        let cgroups = reg.cgroups.clone();
        let group = self.cgroup_name();
        visit_converged(
            move || {
                let cgroups = cgroups.clone();
                let group = group.clone();
                async move { cgroups.tasks(&group).await }
            },
            action,
        )
        .await
    }

    async fn announce(&self, reg: &Arc<RegistryInner>, signal: &str, pids: Vec<u32>) {
        let body = (self.appid.to_string(), pids);
        if let Err(e) = handshake::emit_signal(&reg.conn, signal, &body).await {
            log::warn!("{} announcement for {} failed: {}", signal, self.appid, e);
        }
    }
}

/// Act on every pid a repeated snapshot can reach, exactly once each.
///
/// Terminates on the first pass that adds nothing; a unit that keeps
/// forking faster than it can be snapshotted keeps the loop alive, which
/// is the intended behavior against fork storms.
pub(crate) async fn visit_converged<S, Fut, A>(mut snapshot: S, mut action: A) -> Result<Vec<u32>>
where
    S: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<u32>>>,
    A: FnMut(u32),
{
    let mut seen = BTreeSet::new();
    loop {
        let mut grew = false;
        for pid in snapshot().await? {
            if seen.insert(pid) {
                action(pid);
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    Ok(seen.into_iter().collect())
}

/// Deliver a signal to one pid. A pid that exited since the snapshot is
/// the expected race and stays quiet; other failures are logged.
fn signal_pid(pid: u32, signal: Signal) {
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("{} to pid {} failed: {}", signal, pid, e),
    }
}
