//! Click package store
//!
//! Click packages install per-user; the package database (manifests,
//! registrations) is parsed by a separate service exposed here as the
//! [`ClickDb`] collaborator.

use std::sync::Arc;

use super::{select_appname, Store};
use crate::appid::{AppId, AppName};
use crate::jobs::JobKind;

/// Read-only view of the click package database.
pub trait ClickDb: Send + Sync {
    /// Every package registered for the current user.
    fn packages(&self) -> Vec<String>;
    fn has_package(&self, package: &str) -> bool;
    /// Apps in manifest order.
    fn app_names(&self, package: &str) -> Vec<String>;
    /// The version registered for the current user.
    fn current_version(&self, package: &str) -> Option<String>;
}

pub struct ClickStore {
    db: Option<Arc<dyn ClickDb>>,
}

impl ClickStore {
    pub fn new(db: Option<Arc<dyn ClickDb>>) -> Self {
        Self { db }
    }

    fn db(&self) -> Option<&Arc<dyn ClickDb>> {
        self.db.as_ref()
    }
}

impl Store for ClickStore {
    fn kind_name(&self) -> &'static str {
        "click"
    }

    fn job_kind(&self) -> JobKind {
        JobKind::ClickApp
    }

    fn verify_package(&self, package: &str) -> bool {
        !package.is_empty()
            && self
                .db()
                .map(|db| db.has_package(package))
                .unwrap_or(false)
    }

    fn verify_appname(&self, package: &str, appname: &str) -> bool {
        self.db()
            .map(|db| db.app_names(package).iter().any(|a| a == appname))
            .unwrap_or(false)
    }

    fn find_appname(&self, package: &str, card: &AppName) -> Option<String> {
        let apps = self.db()?.app_names(package);
        select_appname(&apps, card)
    }

    fn find_version(&self, package: &str, _appname: &str) -> Option<String> {
        self.db()?.current_version(package)
    }

    fn has_appid(&self, appid: &AppId) -> bool {
        if appid.package().is_empty() || appid.version().is_empty() {
            return false;
        }
        self.verify_appname(appid.package(), appid.appname())
            && self
                .db()
                .and_then(|db| db.current_version(appid.package()))
                .as_deref()
                == Some(appid.version())
    }

    fn list(&self) -> Vec<AppId> {
        let Some(db) = self.db() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for pkg in db.packages() {
            let Some(version) = db.current_version(&pkg) else {
                continue;
            };
            for app in db.app_names(&pkg) {
                out.push(AppId::from_parts(&pkg, app, &version));
            }
        }
        out
    }
}
