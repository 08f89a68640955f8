//! Legacy (package-less) application store
//!
//! Legacy apps are plain desktop entries in the XDG data dirs. Their
//! AppIds carry only the app name; package and version stay empty. This
//! store never parses the desktop files, it only answers existence and
//! enumeration questions.

use std::path::PathBuf;

use super::{select_appname, Store};
use crate::appid::{AppId, AppName};
use crate::jobs::JobKind;

pub const LEGACY_APP_DIRS_ENV: &str = "APP_LAUNCH_LEGACY_APP_DIRS";

pub struct LegacyStore {
    app_dirs: Vec<PathBuf>,
}

impl LegacyStore {
    /// Search path from the environment: the override variable if set,
    /// otherwise `applications/` under XDG_DATA_HOME and XDG_DATA_DIRS.
    pub fn new() -> Self {
        if let Some(paths) = std::env::var_os(LEGACY_APP_DIRS_ENV) {
            let dirs = std::env::split_paths(&paths).collect();
            return Self::with_dirs(dirs);
        }
        let mut dirs = Vec::new();
        if let Some(home) = dirs::data_dir() {
            dirs.push(home.join("applications"));
        }
        let system = std::env::var("XDG_DATA_DIRS")
            .unwrap_or_else(|_| "/usr/local/share:/usr/share".to_string());
        for d in system.split(':').filter(|d| !d.is_empty()) {
            dirs.push(PathBuf::from(d).join("applications"));
        }
        Self::with_dirs(dirs)
    }

    pub fn with_dirs(app_dirs: Vec<PathBuf>) -> Self {
        Self { app_dirs }
    }

    fn desktop_exists(&self, appname: &str) -> bool {
        if appname.is_empty() || appname.contains('/') {
            return false;
        }
        self.app_dirs
            .iter()
            .any(|d| d.join(format!("{}.desktop", appname)).is_file())
    }

    /// Sorted names of every desktop entry on the search path.
    fn desktop_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for dir in &self.app_dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if let Some(stem) = name.strip_suffix(".desktop") {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        names
    }
}

impl Default for LegacyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for LegacyStore {
    fn kind_name(&self) -> &'static str {
        "legacy"
    }

    fn job_kind(&self) -> JobKind {
        JobKind::LegacyApp
    }

    // Legacy apps have no package; only the empty package is ours.
    fn verify_package(&self, package: &str) -> bool {
        package.is_empty()
    }

    fn verify_appname(&self, _package: &str, appname: &str) -> bool {
        self.desktop_exists(appname)
    }

    fn find_appname(&self, _package: &str, card: &AppName) -> Option<String> {
        select_appname(&self.desktop_names(), card)
    }

    fn find_version(&self, _package: &str, _appname: &str) -> Option<String> {
        // Legacy ids are version-less.
        Some(String::new())
    }

    fn has_appid(&self, appid: &AppId) -> bool {
        appid.is_legacy() && self.desktop_exists(appid.appname())
    }

    fn list(&self) -> Vec<AppId> {
        self.desktop_names().into_iter().map(AppId::legacy).collect()
    }
}
