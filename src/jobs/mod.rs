//! Job management
//!
//! A "job" is one job-control-managed process group, named by job kind +
//! AppId + optional instance id. The job-control service itself is
//! pluggable; the variant set is closed:
//!
//! - [`UpstartBackend`]: the fully implemented backend, speaking the
//!   Upstart job/instance D-Bus API.
//! - [`SystemdBackend`]: a stub: the method contract compiles, every
//!   operation reports itself unimplemented.
//!
//! All backend IPC runs on the Registry's worker loop.

mod systemd;
mod upstart;

pub(crate) use systemd::SystemdBackend;
pub(crate) use upstart::UpstartBackend;

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::Weak;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::appid::AppId;
use crate::error::{Error, Result};
use crate::handshake::{self, SessionShell};
use crate::instance::Instance;
use crate::registry::RegistryInner;

/// How long the starting handshake waits for the shell's ack.
const STARTING_TIMEOUT: Duration = Duration::from_secs(1);

/// Kind of job-control unit an application launches under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    ClickApp,
    LegacyApp,
    SnapApp,
    UntrustedHelper,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClickApp => "application-click",
            Self::LegacyApp => "application-legacy",
            Self::SnapApp => "application-snap",
            Self::UntrustedHelper => "untrusted-helper",
        }
    }

    /// Click units are single-instance: a re-launch targets the same unit.
    /// Every other kind mints a fresh instance id per launch.
    pub fn is_single_instance(&self) -> bool {
        matches!(self, Self::ClickApp)
    }
}

/// Launch mode. TEST injects the testability hook into the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Standard,
    Test,
}

/// Caller-supplied environment contribution (desktop exec line,
/// confinement variables and the like: assembled outside this crate).
pub type EnvBuilder = Box<dyn FnOnce() -> Vec<(String, String)> + Send + 'static>;

/// Outcome of a backend Start call.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StartOutcome {
    Started,
    /// The unit was already running; the second-exec protocol takes over.
    AlreadyStarted,
}

/// Closed set of job-control backends.
pub(crate) enum JobBackend {
    Upstart(UpstartBackend),
    Systemd(SystemdBackend),
}

impl JobBackend {
    pub(crate) async fn start(&self, kind: JobKind, env: Vec<String>) -> Result<StartOutcome> {
        match self {
            Self::Upstart(b) => b.start(kind, env).await,
            Self::Systemd(b) => b.start(kind, env).await,
        }
    }

    /// Best-effort stop; failures are logged, never surfaced.
    pub(crate) async fn stop(&self, kind: JobKind, appid: &AppId, instance_id: &str) {
        match self {
            Self::Upstart(b) => b.stop(kind, appid, instance_id).await,
            Self::Systemd(b) => b.stop(kind, appid, instance_id).await,
        }
    }

    /// Primary pid of a named instance; every miss is 0, not an error.
    pub(crate) async fn primary_pid(&self, kind: JobKind, instance_name: &str) -> u32 {
        match self {
            Self::Upstart(b) => b.primary_pid(kind, instance_name).await,
            Self::Systemd(b) => b.primary_pid(kind, instance_name).await,
        }
    }

    pub(crate) async fn instance_names(&self, kind: JobKind) -> Result<Vec<String>> {
        match self {
            Self::Upstart(b) => b.instance_names(kind).await,
            Self::Systemd(b) => b.instance_names(kind).await,
        }
    }
}

/// Instance name within the job: bare appid for single-instance kinds,
/// `appid-instanceid` otherwise.
pub(crate) fn instance_name(kind: JobKind, appid: &AppId, instance_id: &str) -> String {
    if kind.is_single_instance() || instance_id.is_empty() {
        appid.to_string()
    } else {
        format!("{}-{}", appid, instance_id)
    }
}

/// Full unit name, also the tail of the unit's cgroup path.
pub(crate) fn unit_name(kind: JobKind, instance_name: &str) -> String {
    format!("{}-{}", kind.as_str(), instance_name)
}

/// Fresh instance id for multi-instance kinds: the realtime clock in
/// microseconds, distinct per launch.
pub(crate) fn mint_instance_id(kind: JobKind) -> String {
    if kind.is_single_instance() {
        return String::new();
    }
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    micros.to_string()
}

/// Match a backend instance name against an AppId, capturing the instance
/// id. Names that do not belong to the app are skipped by callers.
pub(crate) fn match_instance_name(kind: JobKind, appid: &AppId, name: &str) -> Option<String> {
    let base = appid.to_string();
    if kind.is_single_instance() {
        return (name == base).then(String::new);
    }
    name.strip_prefix(base.as_str())
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|suffix| !suffix.is_empty())
        .map(str::to_string)
}

/// Assemble the launch environment: the caller's contribution first, then
/// the manager's fixed variables.
pub(crate) fn build_env(
    appid: &AppId,
    instance_id: &str,
    urls: &[String],
    mode: LaunchMode,
    env_builder: EnvBuilder,
) -> Vec<String> {
    let mut env: Vec<String> = env_builder()
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    env.push(format!("APP_ID={}", appid));
    env.push(format!("APP_LAUNCHER_PID={}", std::process::id()));
    if !urls.is_empty() {
        env.push(format!("APP_URIS={}", quote_urls(urls)));
    }
    if !instance_id.is_empty() {
        env.push(format!("INSTANCE_ID={}", instance_id));
    }
    if mode == LaunchMode::Test {
        env.push("QT_LOAD_TESTABILITY=1".to_string());
    }
    env
}

/// Shell-quote and space-join the URI list for APP_URIS.
fn quote_urls(urls: &[String]) -> String {
    urls.iter()
        .map(|u| match shlex::try_quote(u) {
            Ok(q) => q,
            Err(e) => {
                log::warn!("uri {:?} cannot be shell-quoted: {}", u, e);
                Cow::Borrowed(u.as_str())
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Launch coordination over one backend.
pub(crate) struct JobManager {
    pub(crate) backend: JobBackend,
    registry: Weak<RegistryInner>,
}

impl JobManager {
    pub(crate) fn new(backend: JobBackend, registry: Weak<RegistryInner>) -> Self {
        Self { backend, registry }
    }

    /// Launch with a freshly minted instance id.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn launch(
        &self,
        appid: AppId,
        kind: JobKind,
        urls: Vec<String>,
        mode: LaunchMode,
        env_builder: EnvBuilder,
        with_handshake: bool,
    ) -> Result<Instance> {
        let instance_id = mint_instance_id(kind);
        let name = instance_name(kind, &appid, &instance_id);
        self.launch_named(appid, kind, instance_id, name, urls, mode, env_builder, with_handshake)
            .await
    }

    /// Launch a unit whose instance name is already determined (helpers
    /// encode their type into it).
    ///
    /// Returns as soon as the Start call is in flight: its completion is
    /// observed only to run the second-exec protocol when the unit turns
    /// out to be running already.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn launch_named(
        &self,
        appid: AppId,
        kind: JobKind,
        instance_id: String,
        instance_name: String,
        urls: Vec<String>,
        mode: LaunchMode,
        env_builder: EnvBuilder,
        with_handshake: bool,
    ) -> Result<Instance> {
        let reg = self.registry.upgrade().ok_or(Error::RegistryLost)?;

        if with_handshake {
            let wait = if reg.observers.starting_observed() {
                // An in-process observer sees the broadcast directly; a
                // wait would only race ourselves.
                Duration::ZERO
            } else {
                STARTING_TIMEOUT
            };
            let shell = SessionShell::new(reg.conn.clone());
            handshake::starting_handshake(&shell, &appid, wait).await;
        }

        let env = build_env(&appid, &instance_id, &urls, mode, env_builder);
        let instance = Instance::new(
            appid.clone(),
            kind,
            instance_id.clone(),
            instance_name.clone(),
            urls.clone(),
            self.registry.clone(),
        );

        let weak = self.registry.clone();
        let observer_instance = instance.clone();
        tokio::spawn(async move {
            let Some(reg) = weak.upgrade() else { return };
            match reg.jobs.backend.start(kind, env).await {
                Ok(StartOutcome::Started) => {
                    log::debug!("{} started as {}", appid, instance_name);
                    if kind == JobKind::UntrustedHelper {
                        if let Err(e) = observer_instance
                            .set_oom_adjustment(crate::oom::OomScore::UNTRUSTED_HELPER)
                            .await
                        {
                            log::debug!("oom tier for helper {} not applied: {}", appid, e);
                        }
                    }
                }
                Ok(StartOutcome::AlreadyStarted) if kind != JobKind::UntrustedHelper => {
                    log::debug!("{} already running, delivering new invocation", appid);
                    let primary = reg.jobs.backend.primary_pid(kind, &instance_name).await;
                    let shell = SessionShell::new(reg.conn.clone());
                    handshake::second_exec(&shell, &appid, &instance_id, primary, &urls).await;
                }
                Ok(StartOutcome::AlreadyStarted) => {
                    log::debug!("helper {} already running", appid);
                }
                Err(e) => log::warn!("start of {} failed: {}", appid, e),
            }
        });

        Ok(instance)
    }

    /// Re-attach to a unit whose instance id is already known. No IPC.
    pub(crate) fn existing(
        &self,
        appid: &AppId,
        kind: JobKind,
        instance_id: &str,
        urls: Vec<String>,
    ) -> Instance {
        Instance::new(
            appid.clone(),
            kind,
            instance_id.to_string(),
            instance_name(kind, appid, instance_id),
            urls,
            self.registry.clone(),
        )
    }

    /// All live instances of an app under one job kind.
    pub(crate) async fn instances(&self, appid: &AppId, kind: JobKind) -> Result<Vec<Instance>> {
        let names = self.backend.instance_names(kind).await?;
        Ok(names
            .iter()
            .filter_map(|name| match_instance_name(kind, appid, name))
            .map(|iid| self.existing(appid, kind, &iid, Vec::new()))
            .collect())
    }

    /// Bare identifiers of everything currently running: multi-instance
    /// names stripped of their suffix, deduplicated, unioned with the
    /// (already bare) click instance names.
    pub(crate) async fn running_app_ids(&self) -> Vec<String> {
        let mut ids = BTreeSet::new();
        for kind in [JobKind::LegacyApp, JobKind::SnapApp] {
            let names = match self.backend.instance_names(kind).await {
                Ok(n) => n,
                Err(e) => {
                    log::debug!("cannot list {} instances: {}", kind.as_str(), e);
                    continue;
                }
            };
            for name in names {
                let bare = match name.rsplit_once('-') {
                    Some((bare, _suffix)) => bare.to_string(),
                    None => name,
                };
                ids.insert(bare);
            }
        }
        match self.backend.instance_names(JobKind::ClickApp).await {
            Ok(names) => ids.extend(names),
            Err(e) => log::debug!("cannot list click instances: {}", e),
        }
        ids.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_kind_strings() {
        assert_eq!(JobKind::ClickApp.as_str(), "application-click");
        assert_eq!(JobKind::LegacyApp.as_str(), "application-legacy");
        assert_eq!(JobKind::SnapApp.as_str(), "application-snap");
        assert_eq!(JobKind::UntrustedHelper.as_str(), "untrusted-helper");
        assert!(JobKind::ClickApp.is_single_instance());
        assert!(!JobKind::LegacyApp.is_single_instance());
    }

    #[test]
    fn test_instance_and_unit_naming() {
        let id = AppId::parse("pkg_app_1.0");
        assert_eq!(instance_name(JobKind::ClickApp, &id, ""), "pkg_app_1.0");
        assert_eq!(
            instance_name(JobKind::LegacyApp, &id, "123"),
            "pkg_app_1.0-123"
        );
        assert_eq!(
            unit_name(JobKind::ClickApp, "pkg_app_1.0"),
            "application-click-pkg_app_1.0"
        );
    }

    #[test]
    fn test_instance_matching() {
        let bar = AppId::legacy("bar");
        // A legacy instance literally named bar-2342345 is instance 2342345.
        assert_eq!(
            match_instance_name(JobKind::LegacyApp, &bar, "bar-2342345"),
            Some("2342345".to_string())
        );
        // No separator after the appid: not ours.
        assert_eq!(match_instance_name(JobKind::LegacyApp, &bar, "barbaz-1"), None);
        assert_eq!(match_instance_name(JobKind::LegacyApp, &bar, "bar"), None);
        // Click instances are the bare appid.
        let click = AppId::parse("pkg_app_1.0");
        assert_eq!(
            match_instance_name(JobKind::ClickApp, &click, "pkg_app_1.0"),
            Some(String::new())
        );
        assert_eq!(
            match_instance_name(JobKind::ClickApp, &click, "pkg_app_1.0-1"),
            None
        );
    }

    #[test]
    fn test_mint_instance_id() {
        assert_eq!(mint_instance_id(JobKind::ClickApp), "");
        let a = mint_instance_id(JobKind::LegacyApp);
        assert!(!a.is_empty());
        assert!(a.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_build_env_fixed_vars() {
        let id = AppId::parse("pkg_app_1.0");
        let env = build_env(
            &id,
            "42",
            &["file:///tmp/x y".to_string(), "http://e.com".to_string()],
            LaunchMode::Standard,
            Box::new(|| vec![("APP_EXEC".to_string(), "foo %U".to_string())]),
        );
        assert!(env.contains(&"APP_ID=pkg_app_1.0".to_string()));
        assert!(env.contains(&"INSTANCE_ID=42".to_string()));
        assert!(env.contains(&format!("APP_LAUNCHER_PID={}", std::process::id())));
        // Caller contribution comes first.
        assert_eq!(env[0], "APP_EXEC=foo %U");
        // URIs are shell-quoted and space-joined.
        let uris = env
            .iter()
            .find(|e| e.starts_with("APP_URIS="))
            .expect("APP_URIS present");
        assert_eq!(uris, "APP_URIS='file:///tmp/x y' http://e.com");
        assert!(!env.iter().any(|e| e.starts_with("QT_LOAD_TESTABILITY")));
    }

    #[test]
    fn test_build_env_test_mode_and_omissions() {
        let id = AppId::legacy("gedit");
        let env = build_env(&id, "", &[], LaunchMode::Test, Box::new(Vec::new));
        assert!(env.contains(&"QT_LOAD_TESTABILITY=1".to_string()));
        assert!(!env.iter().any(|e| e.starts_with("APP_URIS=")));
        assert!(!env.iter().any(|e| e.starts_with("INSTANCE_ID=")));
    }
}
