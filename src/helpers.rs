//! Untrusted helper subsystem
//!
//! Helpers are short-lived processes run on behalf of an application
//! (content-hub transfers, url-dispatcher probes and the like) under the
//! `untrusted-helper` job kind. They launch with the same environment
//! contract as apps plus `HELPER_TYPE`, never involve the shell (no
//! starting handshake), and live in the `UNTRUSTED_HELPER` OOM tier.
//!
//! A helper unit's instance name encodes all three coordinates as
//! `type:instanceid:appid`, so enumeration can filter by type without a
//! side table.

use std::sync::Arc;

use crate::appid::AppId;
use crate::error::Result;
use crate::instance::Instance;
use crate::jobs::{self, EnvBuilder, JobKind, LaunchMode};
use crate::registry::Registry;

/// One helper type bound to one application.
pub struct Helper {
    helper_type: String,
    appid: AppId,
    registry: Registry,
}

impl Registry {
    pub fn helper(&self, helper_type: &str, appid: AppId) -> Helper {
        Helper {
            helper_type: helper_type.to_string(),
            appid,
            registry: self.clone(),
        }
    }

    /// AppIds with at least one live helper unit of the given type.
    pub async fn running_helpers(&self, helper_type: &str) -> Result<Vec<AppId>> {
        let inner = Arc::clone(&self.inner);
        let names = self
            .inner
            .exec
            .run(async move {
                inner
                    .jobs
                    .backend
                    .instance_names(JobKind::UntrustedHelper)
                    .await
            })
            .await??;
        Ok(names
            .iter()
            .filter_map(|name| decode_instance_name(name))
            .filter(|(t, _, _)| t == helper_type)
            .map(|(_, _, appid)| AppId::parse(&appid))
            .collect())
    }
}

impl Helper {
    pub fn helper_type(&self) -> &str {
        &self.helper_type
    }

    pub fn appid(&self) -> &AppId {
        &self.appid
    }

    /// Start one helper unit. Returns as soon as the Start call is in
    /// flight, like an app launch; the OOM tier is applied once the unit
    /// is up.
    pub async fn launch(&self, urls: Vec<String>) -> Result<Instance> {
        let appid = self.appid.clone();
        let instance_id = jobs::mint_instance_id(JobKind::UntrustedHelper);
        let name = encode_instance_name(&self.helper_type, &instance_id, &appid);
        let helper_type = self.helper_type.clone();
        let env_builder: EnvBuilder =
            Box::new(move || vec![("HELPER_TYPE".to_string(), helper_type)]);

        let inner = Arc::clone(&self.registry.inner);
        self.registry
            .inner
            .exec
            .run(async move {
                inner
                    .jobs
                    .launch_named(
                        appid,
                        JobKind::UntrustedHelper,
                        instance_id,
                        name,
                        urls,
                        LaunchMode::Standard,
                        env_builder,
                        false,
                    )
                    .await
            })
            .await?
    }

    /// Live units for this helper type and appid.
    pub async fn instances(&self) -> Result<Vec<Instance>> {
        let inner = Arc::clone(&self.registry.inner);
        let names = self
            .registry
            .inner
            .exec
            .run(async move {
                inner
                    .jobs
                    .backend
                    .instance_names(JobKind::UntrustedHelper)
                    .await
            })
            .await??;
        let appid_str = self.appid.to_string();
        let weak = Arc::downgrade(&self.registry.inner);
        Ok(names
            .iter()
            .filter_map(|name| decode_instance_name(name).map(|parts| (parts, name)))
            .filter(|((t, _, a), _)| *t == self.helper_type && *a == appid_str)
            .map(|((_, iid, _), name)| {
                Instance::new(
                    self.appid.clone(),
                    JobKind::UntrustedHelper,
                    iid,
                    name.clone(),
                    Vec::new(),
                    weak.clone(),
                )
            })
            .collect())
    }

    /// Stop one helper unit. Best-effort, like app stop.
    pub async fn stop(&self, instance_id: &str) -> Result<()> {
        let inner = Arc::clone(&self.registry.inner);
        let appid = self.appid.clone();
        let instance_id = instance_id.to_string();
        self.registry
            .inner
            .exec
            .run(async move {
                inner
                    .jobs
                    .backend
                    .stop(JobKind::UntrustedHelper, &appid, &instance_id)
                    .await
            })
            .await
    }
}

fn encode_instance_name(helper_type: &str, instance_id: &str, appid: &AppId) -> String {
    format!("{}:{}:{}", helper_type, instance_id, appid)
}

/// Split `type:instanceid:appid`; names that do not carry all three
/// coordinates are not helper units.
fn decode_instance_name(name: &str) -> Option<(String, String, String)> {
    let mut parts = name.splitn(3, ':');
    let helper_type = parts.next()?;
    let instance_id = parts.next()?;
    let appid = parts.next()?;
    Some((
        helper_type.to_string(),
        instance_id.to_string(),
        appid.to_string(),
    ))
}
