//! Snap package store
//!
//! Snap metadata comes from snapd; querying and interface validation live
//! behind the [`SnapdCache`] collaborator, which is expected to cache
//! snapd answers on its side (the daemon round trip is not cheap).

use std::sync::Arc;

use super::{select_appname, Store};
use crate::appid::{AppId, AppName};
use crate::jobs::JobKind;

/// One installed snap as snapd reports it.
pub struct SnapInfo {
    pub version: String,
    /// Exposed apps in snap.yaml order.
    pub apps: Vec<String>,
}

/// Read-only view of snapd state.
pub trait SnapdCache: Send + Sync {
    fn snaps(&self) -> Vec<String>;
    fn snap_info(&self, package: &str) -> Option<SnapInfo>;
}

pub struct SnapStore {
    snapd: Option<Arc<dyn SnapdCache>>,
}

impl SnapStore {
    pub fn new(snapd: Option<Arc<dyn SnapdCache>>) -> Self {
        Self { snapd }
    }

    fn info(&self, package: &str) -> Option<SnapInfo> {
        self.snapd.as_ref()?.snap_info(package)
    }
}

impl Store for SnapStore {
    fn kind_name(&self) -> &'static str {
        "snap"
    }

    fn job_kind(&self) -> JobKind {
        JobKind::SnapApp
    }

    fn verify_package(&self, package: &str) -> bool {
        !package.is_empty() && self.info(package).is_some()
    }

    fn verify_appname(&self, package: &str, appname: &str) -> bool {
        self.info(package)
            .map(|i| i.apps.iter().any(|a| a == appname))
            .unwrap_or(false)
    }

    fn find_appname(&self, package: &str, card: &AppName) -> Option<String> {
        let info = self.info(package)?;
        select_appname(&info.apps, card)
    }

    fn find_version(&self, package: &str, _appname: &str) -> Option<String> {
        self.info(package).map(|i| i.version)
    }

    fn has_appid(&self, appid: &AppId) -> bool {
        match self.info(appid.package()) {
            Some(info) => {
                info.version == appid.version()
                    && info.apps.iter().any(|a| a == appid.appname())
            }
            None => false,
        }
    }

    fn list(&self) -> Vec<AppId> {
        let Some(snapd) = self.snapd.as_ref() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for pkg in snapd.snaps() {
            let Some(info) = snapd.snap_info(&pkg) else {
                continue;
            };
            for app in &info.apps {
                out.push(AppId::from_parts(&pkg, app, &info.version));
            }
        }
        out
    }
}
