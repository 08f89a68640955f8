//! Libertine container store
//!
//! Libertine runs classic desktop applications inside named containers.
//! An AppId uses the container id as the package and the fixed version
//! `0.0` (containers have no per-app versioning). Container enumeration
//! comes from the [`ContainerList`] collaborator; the apps launch under
//! the legacy job kind.

use std::sync::Arc;

use super::{select_appname, Store};
use crate::appid::{AppId, AppName};
use crate::jobs::JobKind;

/// Fixed version for containerized apps.
const LIBERTINE_VERSION: &str = "0.0";

/// Read-only view of the libertine container registry.
pub trait ContainerList: Send + Sync {
    fn containers(&self) -> Vec<String>;
    /// Apps installed in a container, in registry order.
    fn container_apps(&self, container: &str) -> Vec<String>;
}

pub struct LibertineStore {
    containers: Option<Arc<dyn ContainerList>>,
}

impl LibertineStore {
    pub fn new(containers: Option<Arc<dyn ContainerList>>) -> Self {
        Self { containers }
    }

    fn registry(&self) -> Option<&Arc<dyn ContainerList>> {
        self.containers.as_ref()
    }
}

impl Store for LibertineStore {
    fn kind_name(&self) -> &'static str {
        "libertine"
    }

    fn job_kind(&self) -> JobKind {
        JobKind::LegacyApp
    }

    fn verify_package(&self, package: &str) -> bool {
        !package.is_empty()
            && self
                .registry()
                .map(|r| r.containers().iter().any(|c| c == package))
                .unwrap_or(false)
    }

    fn verify_appname(&self, package: &str, appname: &str) -> bool {
        self.registry()
            .map(|r| r.container_apps(package).iter().any(|a| a == appname))
            .unwrap_or(false)
    }

    fn find_appname(&self, package: &str, card: &AppName) -> Option<String> {
        let apps = self.registry()?.container_apps(package);
        select_appname(&apps, card)
    }

    fn find_version(&self, _package: &str, _appname: &str) -> Option<String> {
        Some(LIBERTINE_VERSION.to_string())
    }

    fn has_appid(&self, appid: &AppId) -> bool {
        appid.version() == LIBERTINE_VERSION
            && self.verify_package(appid.package())
            && self.verify_appname(appid.package(), appid.appname())
    }

    fn list(&self) -> Vec<AppId> {
        let Some(registry) = self.registry() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for container in registry.containers() {
            for app in registry.container_apps(&container) {
                out.push(AppId::from_parts(&container, app, LIBERTINE_VERSION));
            }
        }
        out
    }
}
