//! End-to-end discovery across all four store backends, driven through
//! the public API with fake collaborators and real desktop files on disk.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use app_launch::stores::{
    discover, find, list_all, AppStore, ClickDb, ClickStore, ContainerList, LegacyStore,
    LibertineStore, SnapInfo, SnapStore, SnapdCache,
};
use app_launch::{AppId, AppName, JobKind, Version};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn desktop_dir(names: &[&str]) -> PathBuf {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = PathBuf::from(format!(
        "/tmp/app-launch-discovery-{}-{}",
        std::process::id(),
        id
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    for n in names {
        fs::write(dir.join(format!("{}.desktop", n)), "[Desktop Entry]\n").unwrap();
    }
    dir
}

struct ClickFixture {
    packages: HashMap<String, (Vec<String>, String)>,
}

impl ClickDb for ClickFixture {
    fn packages(&self) -> Vec<String> {
        let mut v: Vec<String> = self.packages.keys().cloned().collect();
        v.sort();
        v
    }
    fn has_package(&self, package: &str) -> bool {
        self.packages.contains_key(package)
    }
    fn app_names(&self, package: &str) -> Vec<String> {
        self.packages
            .get(package)
            .map(|(apps, _)| apps.clone())
            .unwrap_or_default()
    }
    fn current_version(&self, package: &str) -> Option<String> {
        self.packages.get(package).map(|(_, v)| v.clone())
    }
}

struct SnapdFixture {
    snaps: HashMap<String, (Vec<String>, String)>,
}

impl SnapdCache for SnapdFixture {
    fn snaps(&self) -> Vec<String> {
        let mut v: Vec<String> = self.snaps.keys().cloned().collect();
        v.sort();
        v
    }
    fn snap_info(&self, package: &str) -> Option<SnapInfo> {
        self.snaps.get(package).map(|(apps, version)| SnapInfo {
            version: version.clone(),
            apps: apps.clone(),
        })
    }
}

struct ContainerFixture {
    containers: HashMap<String, Vec<String>>,
}

impl ContainerList for ContainerFixture {
    fn containers(&self) -> Vec<String> {
        let mut v: Vec<String> = self.containers.keys().cloned().collect();
        v.sort();
        v
    }
    fn container_apps(&self, container: &str) -> Vec<String> {
        self.containers.get(container).cloned().unwrap_or_default()
    }
}

/// All four stores populated: one click package, two desktop files, one
/// libertine container, one snap.
fn full_store_set() -> Vec<AppStore> {
    let mut click_packages = HashMap::new();
    click_packages.insert(
        "com.example.calc".to_string(),
        (vec!["calculator".to_string()], "1.3.1".to_string()),
    );

    let mut snaps = HashMap::new();
    snaps.insert(
        "spotify".to_string(),
        (vec!["spotify".to_string()], "1.2.31".to_string()),
    );

    let mut containers = HashMap::new();
    containers.insert(
        "xenial".to_string(),
        vec!["gimp".to_string(), "inkscape".to_string()],
    );

    let legacy_dir = desktop_dir(&["gedit", "xterm"]);

    vec![
        AppStore::Click(ClickStore::new(Some(Arc::new(ClickFixture {
            packages: click_packages,
        })))),
        AppStore::Legacy(LegacyStore::with_dirs(vec![legacy_dir])),
        AppStore::Libertine(LibertineStore::new(Some(Arc::new(ContainerFixture {
            containers,
        })))),
        AppStore::Snap(SnapStore::new(Some(Arc::new(SnapdFixture { snaps })))),
    ]
}

#[test]
fn test_each_store_resolves_its_own_apps() {
    let stores = full_store_set();

    let click = discover(
        &stores,
        "com.example.calc",
        &AppName::literal("calculator"),
        &Version::CurrentUser,
    );
    assert_eq!(click.to_string(), "com.example.calc_calculator_1.3.1");

    let legacy = discover(&stores, "", &AppName::literal("gedit"), &Version::CurrentUser);
    assert!(legacy.is_legacy());
    assert_eq!(legacy.to_string(), "gedit");

    let libertine = discover(
        &stores,
        "xenial",
        &AppName::literal("gimp"),
        &Version::CurrentUser,
    );
    assert_eq!(libertine.to_string(), "xenial_gimp_0.0");

    let snap = discover(
        &stores,
        "spotify",
        &AppName::literal("spotify"),
        &Version::CurrentUser,
    );
    assert_eq!(snap.to_string(), "spotify_spotify_1.2.31");
}

#[test]
fn test_store_job_kinds() {
    let stores = full_store_set();
    let kinds: Vec<JobKind> = stores.iter().map(|s| s.as_store().job_kind()).collect();
    assert_eq!(
        kinds,
        vec![
            JobKind::ClickApp,
            JobKind::LegacyApp,
            // Libertine apps run as legacy units inside their container.
            JobKind::LegacyApp,
            JobKind::SnapApp,
        ]
    );
}

#[test]
fn test_find_resolves_every_input_shape() {
    let stores = full_store_set();

    // Short form: current-user version discovered from the store.
    assert_eq!(
        find(&stores, "com.example.calc_calculator").to_string(),
        "com.example.calc_calculator_1.3.1"
    );
    // Full triplet parses without consulting any store.
    assert_eq!(
        find(&stores, "unknown.pkg_app_9.9").to_string(),
        "unknown.pkg_app_9.9"
    );
    // Bare names are legacy.
    assert!(find(&stores, "xterm").is_legacy());
    // Short form nobody can verify resolves to nothing.
    assert!(find(&stores, "nope_nothing").is_empty());
}

#[test]
fn test_list_all_unions_the_stores() {
    let stores = full_store_set();
    let all = list_all(&stores);
    let strings: Vec<String> = all.iter().map(|id| id.to_string()).collect();

    assert!(strings.contains(&"com.example.calc_calculator_1.3.1".to_string()));
    assert!(strings.contains(&"gedit".to_string()));
    assert!(strings.contains(&"xterm".to_string()));
    assert!(strings.contains(&"xenial_gimp_0.0".to_string()));
    assert!(strings.contains(&"spotify_spotify_1.2.31".to_string()));
    assert_eq!(all.len(), 6);
}

#[test]
fn test_discovered_ids_survive_dbus_escaping() {
    let stores = full_store_set();
    for appid in list_all(&stores) {
        let escaped = appid.dbus_id();
        assert_eq!(AppId::parse_dbus_id(&escaped), appid);
    }
}

#[test]
fn test_unconfigured_stores_decline_everything() {
    let stores = vec![
        AppStore::Click(ClickStore::new(None)),
        AppStore::Legacy(LegacyStore::with_dirs(vec![])),
        AppStore::Libertine(LibertineStore::new(None)),
        AppStore::Snap(SnapStore::new(None)),
    ];
    assert!(discover(
        &stores,
        "com.example.calc",
        &AppName::FirstListed,
        &Version::CurrentUser
    )
    .is_empty());
    assert!(list_all(&stores).is_empty());
}
