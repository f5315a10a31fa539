//! Site configuration (`mdregions.toml`).
//!
//! ```toml
//! [site]
//! templates = "templates"
//! static = "static"
//! renderer = "comrak"
//! log = "info"
//!
//! [regions]
//! overview = "gender_novels_overview"
//!
//! [pages.landing_page]
//! team = "team_roles"
//! ```
//!
//! Every section is optional. Without `[regions]` the built-in map from
//! [`ContentMap::default_site`] applies to every page.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::content_map::ContentMap;
use crate::markdown::RendererKind;

/// File name looked up in the site root when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "mdregions.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error when reading `{}`", .0.display())]
    Io(PathBuf, #[source] io::Error),

    #[error("config file parsing error")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    #[serde(default)]
    pub site: SiteSection,
    /// Regions filled on every page. `None` means "use the built-in map".
    #[serde(default)]
    pub regions: Option<BTreeMap<String, String>>,
    /// Per-page overrides keyed by template stem.
    #[serde(default)]
    pub pages: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SiteSection {
    /// Template directory, relative to the site root.
    pub templates: PathBuf,
    /// Static directory exposed under `/static/`, relative to the site root.
    #[serde(rename = "static")]
    pub static_dir: PathBuf,
    pub renderer: RendererKind,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log: Option<String>,
    /// Origin the server fetches its own resources from. Derived from the
    /// bind address when unset.
    pub origin: Option<String>,
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            templates: PathBuf::from("templates"),
            static_dir: PathBuf::from("static"),
            renderer: RendererKind::default(),
            log: None,
            origin: None,
        }
    }
}

impl SiteConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml(&text)
    }

    /// Load `explicit` if given, else `<site_root>/mdregions.toml` if it
    /// exists, else the defaults.
    pub fn discover(explicit: Option<&Path>, site_root: &Path) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = site_root.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }

    /// Build the content map for `page`: site-wide regions overlaid with the
    /// page's own table.
    pub fn content_map_for(&self, page: &str) -> ContentMap {
        let mut map = match &self.regions {
            Some(regions) => ContentMap::from(regions.clone()),
            None => ContentMap::default_site(),
        };
        if let Some(overrides) = self.pages.get(page) {
            map.overlay(&ContentMap::from(overrides.clone()));
        }
        map
    }

    pub fn templates_dir(&self, site_root: &Path) -> PathBuf {
        site_root.join(&self.site.templates)
    }

    pub fn static_dir(&self, site_root: &Path) -> PathBuf {
        site_root.join(&self.site.static_dir)
    }
}
