//! Application identifiers
//!
//! An [`AppId`] is the `{package, appname, version}` triplet naming an
//! installable application. String form is `package_appname_version`;
//! legacy (package-less) applications use the bare app name.
//!
//! Parsing here is pure. Resolving partial input against the app stores
//! (short `pkg_app` form, wildcards) lives on
//! [`Registry`](crate::registry::Registry).

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifier of one installable application unit.
///
/// Invariant: either all three fields are empty (the "empty" AppId), or
/// package and version are both non-empty, or only the app name is set
/// (legacy form).
#[derive(Debug, Clone, Eq)]
pub struct AppId {
    package: String,
    appname: String,
    version: String,
}

impl AppId {
    /// The empty sentinel. Callers must check [`AppId::is_empty`] after
    /// parsing: "no match" is not an error.
    pub fn empty() -> Self {
        Self {
            package: String::new(),
            appname: String::new(),
            version: String::new(),
        }
    }

    /// Explicit triplet construction. No validation beyond what the caller
    /// provides; use [`Registry::discover`](crate::registry::Registry::discover)
    /// to build verified ids.
    pub fn from_parts(
        package: impl Into<String>,
        appname: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            package: package.into(),
            appname: appname.into(),
            version: version.into(),
        }
    }

    /// Legacy single-field form (`package` and `version` empty).
    pub fn legacy(appname: impl Into<String>) -> Self {
        Self::from_parts("", appname, "")
    }

    /// Parse a string-form AppId.
    ///
    /// Matches, in order: full `pkg_app_ver`, then a bare legacy name.
    /// The short `pkg_app` form needs store discovery for the version and
    /// is *not* resolved here: it parses to the empty AppId, as does any
    /// other non-match.
    pub fn parse(s: &str) -> Self {
        if s.is_empty() {
            return Self::empty();
        }
        let parts: Vec<&str> = s.split('_').collect();
        match parts.as_slice() {
            [pkg, app, ver] if !pkg.is_empty() && !app.is_empty() && !ver.is_empty() => {
                Self::from_parts(*pkg, *app, *ver)
            }
            [app] if !app.is_empty() => Self::legacy(*app),
            _ => Self::empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.package.is_empty() && self.appname.is_empty() && self.version.is_empty()
    }

    /// Legacy ids carry only an app name.
    pub fn is_legacy(&self) -> bool {
        !self.appname.is_empty() && self.package.is_empty() && self.version.is_empty()
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn appname(&self) -> &str {
        &self.appname
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Version-less form used for persistent references: `package_appname`
    /// (bare app name for legacy ids).
    pub fn persistent_id(&self) -> String {
        if self.is_legacy() {
            self.appname.clone()
        } else {
            format!("{}_{}", self.package, self.appname)
        }
    }

    /// D-Bus-safe encoding of the string form.
    ///
    /// Every byte that is not `[A-Za-z]`, or (after position 0) `[0-9]`,
    /// becomes `_` followed by two lowercase hex digits, so the result is a
    /// valid bus-name/object-path element.
    pub fn dbus_id(&self) -> String {
        let s = self.to_string();
        let mut out = String::with_capacity(s.len());
        for (i, b) in s.bytes().enumerate() {
            let plain = b.is_ascii_alphabetic() || (i > 0 && b.is_ascii_digit());
            if plain {
                out.push(b as char);
            } else {
                out.push_str(&format!("_{:02x}", b));
            }
        }
        out
    }

    /// Decode a [`dbus_id`](AppId::dbus_id)-encoded string back into an
    /// AppId. Malformed escapes yield the empty AppId.
    pub fn parse_dbus_id(s: &str) -> Self {
        let bytes = s.as_bytes();
        let mut raw = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'_' {
                if i + 3 > bytes.len() {
                    return Self::empty();
                }
                let hex = &s[i + 1..i + 3];
                match u8::from_str_radix(hex, 16) {
                    Ok(b) => raw.push(b),
                    Err(_) => return Self::empty(),
                }
                i += 3;
            } else {
                raw.push(bytes[i]);
                i += 1;
            }
        }
        match String::from_utf8(raw) {
            Ok(decoded) => Self::parse(&decoded),
            Err(_) => Self::empty(),
        }
    }

    /// Deterministic object path for addressing the running application
    /// over the bus: `/` + the escaped string form.
    pub fn dbus_path(&self) -> String {
        format!("/{}", self.dbus_id())
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_legacy() || self.is_empty() {
            write!(f, "{}", self.appname)
        } else {
            write!(f, "{}_{}_{}", self.package, self.appname, self.version)
        }
    }
}

// Equality and ordering are defined over the string form.
impl PartialEq for AppId {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Ord for AppId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl PartialOrd for AppId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for AppId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

/// App-name selector for discovery: a literal name or one of the wildcard
/// rules applied to the package's ordered app list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppName {
    FirstListed,
    LastListed,
    /// Only valid when the package lists exactly one app.
    OnlyListed,
    Literal(String),
}

impl AppName {
    pub fn literal(name: impl Into<String>) -> Self {
        Self::Literal(name.into())
    }
}

/// Version selector for discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    /// Whatever version the store reports as installed for this user.
    CurrentUser,
    Literal(String),
}

impl Version {
    pub fn literal(version: impl Into<String>) -> Self {
        Self::Literal(version.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_triplet() {
        let id = AppId::parse("com.example.pkg_app_1.2.3");
        assert_eq!(id.package(), "com.example.pkg");
        assert_eq!(id.appname(), "app");
        assert_eq!(id.version(), "1.2.3");
        assert!(!id.is_empty());
    }

    #[test]
    fn test_parse_legacy_name() {
        let id = AppId::parse("gedit");
        assert!(id.is_legacy());
        assert!(!id.is_empty());
        assert_eq!(id.appname(), "gedit");
        assert_eq!(id.to_string(), "gedit");
    }

    #[test]
    fn test_parse_short_form_is_empty_without_discovery() {
        // pkg_app needs a store lookup for the version; pure parse declines.
        assert!(AppId::parse("com.example.pkg_app").is_empty());
    }

    #[test]
    fn test_parse_garbage_is_empty() {
        assert!(AppId::parse("").is_empty());
        assert!(AppId::parse("a_b_c_d").is_empty());
        assert!(AppId::parse("_app_1.0").is_empty());
        assert!(AppId::parse("pkg__1.0").is_empty());
    }

    #[test]
    fn test_string_round_trip() {
        for (pkg, app, ver) in [
            ("pkg", "app", "1.0"),
            ("com.example.hello", "hello", "0.1-2"),
            ("p", "a", "v"),
        ] {
            let id = AppId::from_parts(pkg, app, ver);
            assert_eq!(AppId::parse(&id.to_string()), id);
        }
    }

    #[test]
    fn test_persistent_id() {
        let id = AppId::from_parts("pkg", "app", "1.0");
        assert_eq!(id.persistent_id(), "pkg_app");
        assert_eq!(AppId::legacy("gedit").persistent_id(), "gedit");
    }

    #[test]
    fn test_dbus_id_escaping() {
        let id = AppId::from_parts("com.example", "app", "1.0");
        let escaped = id.dbus_id();
        // Everything outside [A-Za-z] / non-leading [0-9] is _xx.
        assert!(!escaped.contains('.'));
        assert!(!escaped.contains('-'));
        assert_eq!(escaped, "com_2eexample_5fapp_5f1_2e0");
    }

    #[test]
    fn test_dbus_id_round_trip() {
        for s in ["pkg_app_1.0", "gedit", "com.ex-2_my.app_0.1~beta"] {
            let id = AppId::parse(s);
            assert_eq!(AppId::parse_dbus_id(&id.dbus_id()), id);
        }
    }

    #[test]
    fn test_dbus_id_leading_digit_escaped() {
        let id = AppId::legacy("7zip");
        assert_eq!(id.dbus_id(), "_37zip");
        assert_eq!(AppId::parse_dbus_id("_37zip"), id);
    }

    #[test]
    fn test_dbus_path() {
        let id = AppId::from_parts("pkg", "app", "1");
        assert_eq!(id.dbus_path(), "/pkg_5fapp_5f1");
    }

    #[test]
    fn test_ordering_follows_string_form() {
        let a = AppId::parse("alpha_app_1");
        let b = AppId::parse("beta_app_1");
        assert!(a < b);
        assert_eq!(a.cmp(&a), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_malformed_dbus_id() {
        assert!(AppId::parse_dbus_id("bad_5").is_empty());
        assert!(AppId::parse_dbus_id("bad_zz").is_empty());
    }
}
