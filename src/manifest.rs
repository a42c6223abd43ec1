//! Asset manifest and versioned partition names.

use crate::error::{Error, Result};

/// Default partition name prefix.
pub const DEFAULT_CACHE_PREFIX: &str = "eco-explorer";

/// Default version tag embedded in partition names.
pub const DEFAULT_VERSION: &str = "v1.0.0";

/// Default offline document.
pub const DEFAULT_OFFLINE_PAGE: &str = "/offline.html";

/// Assets the site needs to render offline.
pub const DEFAULT_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/offline.html",
    "/manifest.json",
    "/assets/css/main.css",
    "/assets/js/main.js",
    "/assets/js/i18n.js",
    "/assets/js/language-switcher.js",
    "/assets/images/eco-explorer-thumbnail.png",
    "/locales/en.json",
    "/locales/pt.json",
    "/locales/es.json",
    "/locales/fr.json",
];

/// Ordered set of absolute paths that must be in the static partition
/// before a worker counts as installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    paths: Vec<String>,
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self {
            paths: DEFAULT_ASSETS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl AssetManifest {
    /// Builds a manifest, keeping first-seen order and dropping duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a path is not absolute or has a query
    /// or fragment.
    pub fn new<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for path in paths {
            let path = path.as_ref().trim();
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "manifest path must be absolute: {path:?}"
                )));
            }
            if path.contains(['?', '#']) {
                return Err(Error::Config(format!(
                    "manifest path must not carry a query or fragment: {path:?}"
                )));
            }
            if !out.iter().any(|p| p == path) {
                out.push(path.to_string());
            }
        }
        Ok(Self { paths: out })
    }

    /// Exact path membership.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// The two partition names of one worker version.
///
/// Both are derived from a single version tag so a new deployment
/// invalidates both at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
    pub static_name: String,
    pub dynamic_name: String,
}

impl Default for CacheNames {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_PREFIX, DEFAULT_VERSION)
    }
}

impl CacheNames {
    #[must_use]
    pub fn new(prefix: &str, version: &str) -> Self {
        Self {
            static_name: format!("{prefix}-static-{version}"),
            dynamic_name: format!("{prefix}-dynamic-{version}"),
        }
    }

    /// Partition names that survive activation.
    #[must_use]
    pub fn allow_list(&self) -> [&str; 2] {
        [&self.static_name, &self.dynamic_name]
    }

    #[must_use]
    pub fn is_current(&self, name: &str) -> bool {
        self.allow_list().contains(&name)
    }
}
