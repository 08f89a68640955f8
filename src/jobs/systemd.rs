//! Systemd-style backend stub
//!
//! Holds the backend contract open for a transient-unit implementation
//! (StartTransientUnit + cgroup-derived pid tracking). Only the method
//! surface exists today; every operation reports itself unimplemented.

use crate::appid::AppId;
use crate::error::{Error, Result};

use super::{JobKind, StartOutcome};

pub(crate) struct SystemdBackend;

impl SystemdBackend {
    pub(crate) fn new() -> Self {
        Self
    }

    pub(crate) async fn start(&self, _kind: JobKind, _env: Vec<String>) -> Result<StartOutcome> {
        Err(Error::BackendUnsupported("systemd start"))
    }

    pub(crate) async fn stop(&self, _kind: JobKind, appid: &AppId, _instance_id: &str) {
        log::warn!("systemd backend cannot stop {} yet", appid);
    }

    pub(crate) async fn primary_pid(&self, _kind: JobKind, instance_name: &str) -> u32 {
        log::debug!("systemd backend has no pid for {}", instance_name);
        0
    }

    pub(crate) async fn instance_names(&self, _kind: JobKind) -> Result<Vec<String>> {
        Err(Error::BackendUnsupported("systemd instance listing"))
    }
}
