//! Registry: the shared context every operation hangs off
//!
//! One `Registry` owns the background executor, the session bus
//! connection, the ordered store list, the job manager and the cgroup
//! bridge. It is cheap to clone (an `Arc` handle); collaborators that
//! need a way back hold `Weak` references only, so dropping the last
//! `Registry` tears the worker down instead of leaking it.
//!
//! ```text
//!             ┌──────────────────────────────┐
//!             │          Registry            │
//!             │  executor   session bus      │
//!             │  stores     job manager      │
//!             │  cgroups    observers        │
//!             └──────┬───────────┬───────────┘
//!                    │           │
//!              Application   Instance   (Weak back-refs)
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::StreamExt;
use zbus::message::Type as MessageType;
use zbus::{Connection, MatchRule, MessageStream};

use crate::appid::{AppId, AppName, Version};
use crate::cgroups::CgroupBridge;
use crate::error::Result;
use crate::executor::Executor;
use crate::handshake;
use crate::instance::Instance;
use crate::jobs::{EnvBuilder, JobBackend, JobKind, JobManager, LaunchMode, SystemdBackend, UpstartBackend};
use crate::stores::{self, AppStore, ClickDb, ClickStore, ContainerList, LegacyStore, LibertineStore, SnapStore, SnapdCache};

/// Which job-control service launches run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Upstart,
    Systemd,
}

/// Construction-time knobs: store collaborators and backend selection.
/// Everything defaults to "not configured"; a store without its
/// collaborator declines every package.
#[derive(Default)]
pub struct RegistryConfig {
    pub click_db: Option<Arc<dyn ClickDb>>,
    pub container_list: Option<Arc<dyn ContainerList>>,
    pub snapd_cache: Option<Arc<dyn SnapdCache>>,
    pub backend: BackendKind,
}

pub(crate) struct RegistryInner {
    pub(crate) exec: Executor,
    pub(crate) conn: Connection,
    pub(crate) stores: Vec<AppStore>,
    pub(crate) jobs: JobManager,
    pub(crate) cgroups: CgroupBridge,
    pub(crate) observers: ObserverRegistry,
}

/// Handle to the shared launch context.
#[derive(Clone)]
pub struct Registry {
    pub(crate) inner: Arc<RegistryInner>,
}

static DEFAULT: Mutex<Option<Registry>> = Mutex::new(None);

impl Registry {
    /// Start the worker thread, connect to the session bus and assemble
    /// the store list. The connection is established on the worker so all
    /// IPC lives on one thread from the first byte.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let exec = Executor::new()?;
        let conn = exec.run_blocking(async { Connection::session().await })??;

        let inner = Arc::new_cyclic(|weak: &Weak<RegistryInner>| {
            let backend = match config.backend {
                BackendKind::Upstart => JobBackend::Upstart(UpstartBackend::new(conn.clone())),
                BackendKind::Systemd => JobBackend::Systemd(SystemdBackend::new()),
            };
            RegistryInner {
                jobs: JobManager::new(backend, weak.clone()),
                stores: vec![
                    AppStore::Click(ClickStore::new(config.click_db)),
                    AppStore::Legacy(LegacyStore::new()),
                    AppStore::Libertine(LibertineStore::new(config.container_list)),
                    AppStore::Snap(SnapStore::new(config.snapd_cache)),
                ],
                cgroups: CgroupBridge::new(),
                observers: ObserverRegistry::new(),
                conn,
                exec,
            }
        });
        Ok(Self { inner })
    }

    /// The process-wide Registry, created on first use.
    pub fn get_default() -> Result<Registry> {
        let mut slot = DEFAULT.lock().unwrap();
        if let Some(reg) = slot.as_ref() {
            return Ok(reg.clone());
        }
        let reg = Registry::new(RegistryConfig::default())?;
        *slot = Some(reg.clone());
        Ok(reg)
    }

    /// Drop the process-wide Registry (tears down its worker if this was
    /// the last handle).
    pub fn clear_default() {
        DEFAULT.lock().unwrap().take();
    }

    /// Resolve a string of any supported shape into an AppId; empty when
    /// nothing can verify it.
    pub fn find_appid(&self, s: &str) -> AppId {
        stores::find(&self.inner.stores, s)
    }

    /// Wildcard-capable discovery across the stores.
    pub fn discover(&self, package: &str, appname: &AppName, version: &Version) -> AppId {
        stores::discover(&self.inner.stores, package, appname, version)
    }

    /// Everything the stores can currently launch.
    pub fn list_apps(&self) -> Vec<Application> {
        stores::list_all(&self.inner.stores)
            .into_iter()
            .map(|appid| Application::new(self, appid))
            .collect()
    }

    pub fn application(&self, appid: AppId) -> Application {
        Application::new(self, appid)
    }

    pub async fn launch(&self, appid: &AppId, urls: Vec<String>) -> Result<Instance> {
        self.launch_full(appid, urls, LaunchMode::Standard, Box::new(Vec::new))
            .await
    }

    /// Launch with the testability hook injected into the environment.
    pub async fn launch_test(&self, appid: &AppId, urls: Vec<String>) -> Result<Instance> {
        self.launch_full(appid, urls, LaunchMode::Test, Box::new(Vec::new))
            .await
    }

    pub async fn launch_full(
        &self,
        appid: &AppId,
        urls: Vec<String>,
        mode: LaunchMode,
        env_builder: EnvBuilder,
    ) -> Result<Instance> {
        let kind = self.job_kind_for(appid);
        let inner = Arc::clone(&self.inner);
        let appid = appid.clone();
        self.inner
            .exec
            .run(async move {
                inner
                    .jobs
                    .launch(appid, kind, urls, mode, env_builder, true)
                    .await
            })
            .await?
    }

    /// All live instances of one app.
    pub async fn instances(&self, appid: &AppId) -> Result<Vec<Instance>> {
        let kind = self.job_kind_for(appid);
        let inner = Arc::clone(&self.inner);
        let appid = appid.clone();
        self.inner
            .exec
            .run(async move { inner.jobs.instances(&appid, kind).await })
            .await?
    }

    /// Re-attach to a known unit without any IPC.
    pub fn existing_instance(&self, appid: &AppId, instance_id: &str) -> Instance {
        let kind = self.job_kind_for(appid);
        self.inner
            .jobs
            .existing(appid, kind, instance_id, Vec::new())
    }

    /// Every application with at least one live unit.
    pub async fn running_apps(&self) -> Result<Vec<Application>> {
        let inner = Arc::clone(&self.inner);
        let ids = self
            .inner
            .exec
            .run(async move { inner.jobs.running_app_ids().await })
            .await?;
        Ok(ids
            .iter()
            .map(|s| stores::find(&self.inner.stores, s))
            .filter(|appid| !appid.is_empty())
            .map(|appid| Application::new(self, appid))
            .collect())
    }

    /// Which job kind an AppId launches under: the first store that knows
    /// it decides; an unknown id falls back on its syntactic shape.
    fn job_kind_for(&self, appid: &AppId) -> JobKind {
        for store in &self.inner.stores {
            let s = store.as_store();
            if s.has_appid(appid) {
                return s.job_kind();
            }
        }
        if appid.is_legacy() {
            JobKind::LegacyApp
        } else {
            JobKind::ClickApp
        }
    }

    /// Watch launch announcements. While at least one such observer is
    /// alive the starting handshake skips its shell wait entirely; this
    /// process *is* the shell.
    pub fn observe_app_starting<F>(&self, mut callback: F) -> Result<ObserverHandle>
    where
        F: FnMut(AppId) + Send + 'static,
    {
        let counter = Arc::clone(&self.inner.observers.starting);
        counter.fetch_add(1, Ordering::SeqCst);
        let guard = CountGuard { counter };
        self.observe_signal("UnityStartingBroadcast", Some(guard), move |msg| {
            if let Ok((appid,)) = msg.body().deserialize::<(String,)>() {
                callback(AppId::parse(&appid));
            }
        })
    }

    /// Watch pause announcements: `(appid, affected pids)`.
    pub fn observe_app_paused<F>(&self, callback: F) -> Result<ObserverHandle>
    where
        F: FnMut(AppId, Vec<u32>) + Send + 'static,
    {
        self.observe_pid_signal("ApplicationPaused", callback)
    }

    /// Watch resume announcements: `(appid, affected pids)`.
    pub fn observe_app_resumed<F>(&self, callback: F) -> Result<ObserverHandle>
    where
        F: FnMut(AppId, Vec<u32>) + Send + 'static,
    {
        self.observe_pid_signal("ApplicationResumed", callback)
    }

    fn observe_pid_signal<F>(&self, member: &'static str, mut callback: F) -> Result<ObserverHandle>
    where
        F: FnMut(AppId, Vec<u32>) + Send + 'static,
    {
        self.observe_signal(member, None, move |msg| {
            if let Ok((appid, pids)) = msg.body().deserialize::<(String, Vec<u32>)>() {
                callback(AppId::parse(&appid), pids);
            }
        })
    }

    /// Subscribe to one broadcast-surface signal and feed each message to
    /// `handle` on the worker loop until the returned handle drops.
    fn observe_signal<H>(
        &self,
        member: &'static str,
        guard: Option<CountGuard>,
        mut handle: H,
    ) -> Result<ObserverHandle>
    where
        H: FnMut(&zbus::Message) + Send + 'static,
    {
        let conn = self.inner.conn.clone();
        let stream = self.inner.exec.run_blocking(async move {
            let rule = MatchRule::builder()
                .msg_type(MessageType::Signal)
                .interface(handshake::SHELL_INTERFACE)?
                .member(member)?
                .build();
            MessageStream::for_match_rule(rule, &conn, Some(16)).await
        })??;

        let task = self.inner.exec.spawn(async move {
            let _guard = guard;
            let mut stream = stream;
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(msg) => handle(&msg),
                    Err(e) => log::debug!("{} observer stream error: {}", member, e),
                }
            }
        });
        Ok(ObserverHandle { task })
    }
}

/// Live-observer bookkeeping shared with the launch path.
pub(crate) struct ObserverRegistry {
    starting: Arc<AtomicUsize>,
}

impl ObserverRegistry {
    fn new() -> Self {
        Self {
            starting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Does this process watch launch announcements itself?
    pub(crate) fn starting_observed(&self) -> bool {
        self.starting.load(Ordering::SeqCst) > 0
    }
}

/// Decrements the observer count when its listener ends, however it ends.
struct CountGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for CountGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns one signal listener; dropping it unsubscribes.
pub struct ObserverHandle {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// One application as the stores know it, bound to a Registry.
#[derive(Clone)]
pub struct Application {
    appid: AppId,
    registry: Registry,
}

impl Application {
    fn new(registry: &Registry, appid: AppId) -> Self {
        Self {
            appid,
            registry: registry.clone(),
        }
    }

    pub fn appid(&self) -> &AppId {
        &self.appid
    }

    pub async fn launch(&self, urls: Vec<String>) -> Result<Instance> {
        self.registry.launch(&self.appid, urls).await
    }

    pub async fn launch_test(&self, urls: Vec<String>) -> Result<Instance> {
        self.registry.launch_test(&self.appid, urls).await
    }

    pub async fn instances(&self) -> Result<Vec<Instance>> {
        self.registry.instances(&self.appid).await
    }

    pub async fn has_instances(&self) -> Result<bool> {
        Ok(!self.instances().await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_count_guard() {
        let observers = ObserverRegistry::new();
        assert!(!observers.starting_observed());

        observers.starting.fetch_add(1, Ordering::SeqCst);
        let guard = CountGuard {
            counter: Arc::clone(&observers.starting),
        };
        assert!(observers.starting_observed());
        drop(guard);
        assert!(!observers.starting_observed());
    }

    #[test]
    fn test_backend_kind_default() {
        assert_eq!(BackendKind::default(), BackendKind::Upstart);
        let config = RegistryConfig::default();
        assert!(config.click_db.is_none());
        assert_eq!(config.backend, BackendKind::Upstart);
    }
}
