//! Upstart-style job-control backend
//!
//! Talks the Upstart 0.6 D-Bus API: one job object per job kind, one
//! instance object per running unit. Job object paths are resolved once
//! per kind and cached for the Registry's lifetime.

use std::collections::HashMap;

use tokio::sync::Mutex;
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

use crate::appid::AppId;
use crate::error::Result;

use super::{JobKind, StartOutcome};

const ALREADY_STARTED_ERROR: &str = "com.ubuntu.Upstart0_6.Error.AlreadyStarted";

#[zbus::proxy(
    interface = "com.ubuntu.Upstart0_6",
    default_service = "com.ubuntu.Upstart",
    default_path = "/com/ubuntu/Upstart",
    gen_blocking = false
)]
trait Upstart {
    fn get_job_by_name(&self, name: &str) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "com.ubuntu.Upstart0_6.Job",
    default_service = "com.ubuntu.Upstart",
    gen_blocking = false
)]
trait UpstartJob {
    /// Returns the instance object path once the unit is up.
    fn start(&self, env: &[String], wait: bool) -> zbus::Result<OwnedObjectPath>;

    fn stop(&self, env: &[String], wait: bool) -> zbus::Result<()>;

    fn get_instance_by_name(&self, name: &str) -> zbus::Result<OwnedObjectPath>;

    fn get_all_instances(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

#[zbus::proxy(
    interface = "com.ubuntu.Upstart0_6.Instance",
    default_service = "com.ubuntu.Upstart",
    gen_blocking = false
)]
trait UpstartInstance {
    // Upstart property names are lowercase and it never emits
    // PropertiesChanged, so values are fetched fresh each time.
    #[zbus(property(emits_changed_signal = "false"), name = "name")]
    fn name(&self) -> zbus::Result<String>;

    /// `(process label, pid)` pairs; the first entry is the primary.
    #[zbus(property(emits_changed_signal = "false"), name = "processes")]
    fn processes(&self) -> zbus::Result<Vec<(String, i32)>>;
}

pub(crate) struct UpstartBackend {
    conn: Connection,
    /// Job object path per kind; one GetJobByName round trip per distinct
    /// kind, ever.
    job_paths: Mutex<HashMap<JobKind, OwnedObjectPath>>,
}

impl UpstartBackend {
    pub(crate) fn new(conn: Connection) -> Self {
        Self {
            conn,
            job_paths: Mutex::new(HashMap::new()),
        }
    }

    async fn job_path(&self, kind: JobKind) -> Result<OwnedObjectPath> {
        let mut cache = self.job_paths.lock().await;
        if let Some(path) = cache.get(&kind) {
            return Ok(path.clone());
        }
        let upstart = UpstartProxy::new(&self.conn).await?;
        let path = upstart.get_job_by_name(kind.as_str()).await?;
        log::debug!("job {} is at {}", kind.as_str(), path.as_str());
        cache.insert(kind, path.clone());
        Ok(path)
    }

    async fn job_proxy(&self, kind: JobKind) -> Result<UpstartJobProxy<'_>> {
        let path = self.job_path(kind).await?;
        Ok(UpstartJobProxy::builder(&self.conn)
            .path(path)?
            .build()
            .await?)
    }

    async fn instance_proxy(&self, path: OwnedObjectPath) -> Result<UpstartInstanceProxy<'_>> {
        Ok(UpstartInstanceProxy::builder(&self.conn)
            .path(path)?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?)
    }

    pub(crate) async fn start(&self, kind: JobKind, env: Vec<String>) -> Result<StartOutcome> {
        let job = self.job_proxy(kind).await?;
        match job.start(&env, true).await {
            Ok(_instance) => Ok(StartOutcome::Started),
            Err(zbus::Error::MethodError(name, _, _))
                if name.as_str() == ALREADY_STARTED_ERROR =>
            {
                Ok(StartOutcome::AlreadyStarted)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn stop(&self, kind: JobKind, appid: &AppId, instance_id: &str) {
        let mut env = vec![format!("APP_ID={}", appid)];
        if !instance_id.is_empty() {
            env.push(format!("INSTANCE_ID={}", instance_id));
        }
        let result: Result<()> = async {
            let job = self.job_proxy(kind).await?;
            job.stop(&env, false).await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            log::warn!("stop of {} failed: {}", appid, e);
        }
    }

    pub(crate) async fn primary_pid(&self, kind: JobKind, instance_name: &str) -> u32 {
        let result: Result<u32> = async {
            let job = self.job_proxy(kind).await?;
            let instance = job.get_instance_by_name(instance_name).await?;
            let instance = self.instance_proxy(instance).await?;
            let processes = instance.processes().await?;
            Ok(processes.first().map(|(_, pid)| *pid as u32).unwrap_or(0))
        }
        .await;
        match result {
            Ok(pid) => pid,
            Err(e) => {
                // Not running is an answer, not an error.
                log::debug!("no primary pid for {}: {}", instance_name, e);
                0
            }
        }
    }

    pub(crate) async fn instance_names(&self, kind: JobKind) -> Result<Vec<String>> {
        let job = self.job_proxy(kind).await?;
        let paths = job.get_all_instances().await?;
        let mut names = Vec::with_capacity(paths.len());
        for path in paths {
            let instance = self.instance_proxy(path.clone()).await?;
            match instance.name().await {
                Ok(name) => names.push(name),
                // Instance exited between enumeration and query.
                Err(e) => log::debug!("instance {} vanished: {}", path.as_str(), e),
            }
        }
        Ok(names)
    }
}
