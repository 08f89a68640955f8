//! App store backends
//!
//! Each packaging technology gets one backend implementing the same
//! capability set (package/app verification, wildcard discovery, version
//! lookup, enumeration). The variant set is closed, so dispatch is a plain
//! enum over the four stores rather than open-ended trait objects:
//!
//! ```text
//! ┌───────┬────────┬───────────┬──────┐
//! │ Click │ Legacy │ Libertine │ Snap │   tried in this order;
//! └───────┴────────┴───────────┴──────┘   first success wins
//! ```
//!
//! A backend that cannot answer (missing collaborator, unknown package,
//! bad metadata) *declines*: discovery moves on to the next store and
//! only an exhausted list yields the empty AppId.
//!
//! Package metadata itself (click manifests, libertine container configs,
//! snapd state) is parsed elsewhere; the stores consult injected
//! collaborator handles.

mod click;
mod legacy;
mod libertine;
mod snap;

pub use click::{ClickDb, ClickStore};
pub use legacy::LegacyStore;
pub use libertine::{ContainerList, LibertineStore};
pub use snap::{SnapInfo, SnapStore, SnapdCache};

use crate::appid::{AppId, AppName, Version};
use crate::jobs::JobKind;

/// The capability set every store implements.
pub trait Store {
    /// Short name used in log messages.
    fn kind_name(&self) -> &'static str;

    /// The job kind this store's applications launch under.
    fn job_kind(&self) -> JobKind;

    /// Does this store know the package at all?
    fn verify_package(&self, package: &str) -> bool;

    /// Is `appname` one of the package's apps?
    fn verify_appname(&self, package: &str, appname: &str) -> bool;

    /// Resolve an app-name selector against the package's ordered app list.
    fn find_appname(&self, package: &str, card: &AppName) -> Option<String>;

    /// The installed version for this user, if the store can tell.
    fn find_version(&self, package: &str, appname: &str) -> Option<String>;

    /// Full-triplet membership check.
    fn has_appid(&self, appid: &AppId) -> bool;

    /// Every AppId this store can currently launch.
    fn list(&self) -> Vec<AppId>;
}

/// Closed set of store backends.
pub enum AppStore {
    Click(ClickStore),
    Legacy(LegacyStore),
    Libertine(LibertineStore),
    Snap(SnapStore),
}

impl AppStore {
    pub fn as_store(&self) -> &dyn Store {
        match self {
            AppStore::Click(s) => s,
            AppStore::Legacy(s) => s,
            AppStore::Libertine(s) => s,
            AppStore::Snap(s) => s,
        }
    }
}

/// Resolve wildcard app-name selection against an ordered app list.
/// Shared by the store implementations.
fn select_appname(apps: &[String], card: &AppName) -> Option<String> {
    match card {
        AppName::FirstListed => apps.first().cloned(),
        AppName::LastListed => apps.last().cloned(),
        AppName::OnlyListed => {
            if apps.len() == 1 {
                apps.first().cloned()
            } else {
                None
            }
        }
        AppName::Literal(name) => apps.iter().find(|a| *a == name).cloned(),
    }
}

/// Discover an AppId from partial input.
///
/// Stores are tried in list order; a store that declines at any step
/// (package, app name, version, final verification) just means "try the
/// next one". Exhaustion yields the empty AppId, never an error.
pub fn discover(
    stores: &[AppStore],
    package: &str,
    appname: &AppName,
    version: &Version,
) -> AppId {
    for store in stores {
        let s = store.as_store();
        if !s.verify_package(package) {
            continue;
        }
        let app = match appname {
            AppName::Literal(name) => {
                if !s.verify_appname(package, name) {
                    log::debug!("{}: {} has no app {}", s.kind_name(), package, name);
                    continue;
                }
                name.clone()
            }
            wildcard => match s.find_appname(package, wildcard) {
                Some(a) => a,
                None => continue,
            },
        };
        let ver = match version {
            Version::Literal(v) => v.clone(),
            Version::CurrentUser => match s.find_version(package, &app) {
                Some(v) => v,
                None => continue,
            },
        };
        let appid = AppId::from_parts(package, app, ver);
        if s.has_appid(&appid) {
            log::debug!("{} resolved {}", s.kind_name(), appid);
            return appid;
        }
    }
    AppId::empty()
}

/// Resolve a string of any supported shape into an AppId.
///
/// Full `pkg_app_ver` and bare legacy names parse directly; the short
/// `pkg_app` form discovers the current user version through the stores.
pub fn find(stores: &[AppStore], s: &str) -> AppId {
    let parts: Vec<&str> = s.split('_').collect();
    match parts.as_slice() {
        [pkg, app] if !pkg.is_empty() && !app.is_empty() => discover(
            stores,
            pkg,
            &AppName::literal(*app),
            &Version::CurrentUser,
        ),
        _ => AppId::parse(s),
    }
}

/// Union of every store's enumeration.
pub fn list_all(stores: &[AppStore]) -> Vec<AppId> {
    let mut out = Vec::new();
    for store in stores {
        out.extend(store.as_store().list());
    }
    out
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn click_stores(db: FakeClickDb) -> Vec<AppStore> {
        vec![
            AppStore::Click(ClickStore::new(Some(Arc::new(db)))),
            AppStore::Legacy(LegacyStore::with_dirs(vec![])),
            AppStore::Libertine(LibertineStore::new(None)),
            AppStore::Snap(SnapStore::new(None)),
        ]
    }

    #[test]
    fn test_discovery_wildcards() {
        let db = FakeClickDb::single("pkg", &["first", "second", "third"], "1.0");
        let stores = click_stores(db);

        let first = discover(&stores, "pkg", &AppName::FirstListed, &Version::CurrentUser);
        assert_eq!(first.appname(), "first");

        let last = discover(&stores, "pkg", &AppName::LastListed, &Version::CurrentUser);
        assert_eq!(last.appname(), "third");

        // ONLY_LISTED on a package with more than one app resolves nothing.
        let only = discover(&stores, "pkg", &AppName::OnlyListed, &Version::CurrentUser);
        assert!(only.is_empty());
    }

    #[test]
    fn test_discovery_only_listed_single_app() {
        let db = FakeClickDb::single("pkg", &["lonely"], "2.0");
        let stores = click_stores(db);
        let id = discover(&stores, "pkg", &AppName::OnlyListed, &Version::CurrentUser);
        assert_eq!(id.to_string(), "pkg_lonely_2.0");
    }

    #[test]
    fn test_discovery_literal_and_version() {
        let db = FakeClickDb::single("pkg", &["app"], "1.2");
        let stores = click_stores(db);

        let id = discover(
            &stores,
            "pkg",
            &AppName::literal("app"),
            &Version::CurrentUser,
        );
        assert_eq!(id.version(), "1.2");

        // Literal version must still verify against the store.
        let stale = discover(
            &stores,
            "pkg",
            &AppName::literal("app"),
            &Version::literal("0.9"),
        );
        assert!(stale.is_empty());
    }

    #[test]
    fn test_discovery_unknown_package_exhausts_quietly() {
        let db = FakeClickDb::single("pkg", &["app"], "1.0");
        let stores = click_stores(db);
        let id = discover(
            &stores,
            "nope",
            &AppName::FirstListed,
            &Version::CurrentUser,
        );
        assert!(id.is_empty());
    }

    #[test]
    fn test_store_order_click_wins_over_snap() {
        // Same package name known to both click and snapd; click is listed
        // first, so it claims the id.
        let click = FakeClickDb::single("dual", &["app"], "1.0");
        let mut snaps = HashMap::new();
        snaps.insert(
            "dual".to_string(),
            SnapInfo {
                version: "9.9".to_string(),
                apps: vec!["app".to_string()],
            },
        );
        let stores = vec![
            AppStore::Click(ClickStore::new(Some(Arc::new(click)))),
            AppStore::Legacy(LegacyStore::with_dirs(vec![])),
            AppStore::Libertine(LibertineStore::new(None)),
            AppStore::Snap(SnapStore::new(Some(Arc::new(FakeSnapd { snaps })))),
        ];
        let id = discover(
            &stores,
            "dual",
            &AppName::literal("app"),
            &Version::CurrentUser,
        );
        assert_eq!(id.version(), "1.0");
    }

    #[test]
    fn test_find_short_form_discovers_version() {
        let db = FakeClickDb::single("pkg", &["app"], "3.1");
        let stores = click_stores(db);
        assert_eq!(find(&stores, "pkg_app").to_string(), "pkg_app_3.1");
    }

    #[test]
    fn test_find_full_and_legacy_forms() {
        let stores = click_stores(FakeClickDb {
            packages: HashMap::new(),
        });
        assert_eq!(find(&stores, "pkg_app_1.0").to_string(), "pkg_app_1.0");
        assert!(find(&stores, "gedit").is_legacy());
        assert!(find(&stores, "pkg_app").is_empty());
    }

    #[test]
    fn test_libertine_discovery() {
        let mut containers = HashMap::new();
        containers.insert(
            "xenial".to_string(),
            vec!["gimp".to_string(), "inkscape".to_string()],
        );
        let stores = vec![
            AppStore::Click(ClickStore::new(None)),
            AppStore::Legacy(LegacyStore::with_dirs(vec![])),
            AppStore::Libertine(LibertineStore::new(Some(Arc::new(FakeContainers {
                containers,
            })))),
            AppStore::Snap(SnapStore::new(None)),
        ];
        let id = discover(
            &stores,
            "xenial",
            &AppName::literal("gimp"),
            &Version::CurrentUser,
        );
        assert_eq!(id.to_string(), "xenial_gimp_0.0");
        assert_eq!(
            stores[2].as_store().job_kind(),
            crate::jobs::JobKind::LegacyApp
        );
    }

    #[test]
    fn test_list_all() {
        let db = FakeClickDb::single("pkg", &["a", "b"], "1.0");
        let stores = click_stores(db);
        let all = list_all(&stores);
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|id| id.appname() == "a"));
    }
}
