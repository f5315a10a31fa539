//! Static mapping from page-region identifiers to markdown resource names.
//!
//! A [`ContentMap`] is built once per page load and never mutated afterwards
//! by the loader. Entries are independent of each other and of the page: an
//! identifier that matches no element, or an empty resource name, is a legal
//! entry that simply fails to load.

use std::collections::BTreeMap;

/// Built-in map used when no site configuration provides `[regions]`.
const DEFAULT_REGIONS: &[(&str, &str)] = &[("overview", "gender_novels_overview")];

/// One (target region, resource) pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    /// `id` of the page element whose content is replaced.
    pub target: String,
    /// Resource name, without the base path or `.md` extension.
    pub resource: String,
}

/// Ordered mapping of target identifier → resource name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentMap {
    entries: BTreeMap<String, String>,
}

impl ContentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The map every page gets when the site has no configuration.
    pub fn default_site() -> Self {
        DEFAULT_REGIONS.iter().copied().collect()
    }

    /// Add or replace the entry for `target`.
    pub fn insert(&mut self, target: impl Into<String>, resource: impl Into<String>) {
        self.entries.insert(target.into(), resource.into());
    }

    /// Overlay `other` on top of `self`; entries in `other` win.
    pub fn overlay(&mut self, other: &ContentMap) {
        for (target, resource) in &other.entries {
            self.entries.insert(target.clone(), resource.clone());
        }
    }

    #[cfg(test)]
    pub fn get(&self, target: &str) -> Option<&str> {
        self.entries.get(target).map(String::as_str)
    }

    /// Iterate the entries in identifier order.
    pub fn entries(&self) -> impl Iterator<Item = ContentEntry> + '_ {
        self.entries.iter().map(|(target, resource)| ContentEntry {
            target: target.clone(),
            resource: resource.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ContentMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = ContentMap::new();
        for (target, resource) in iter {
            map.insert(target, resource);
        }
        map
    }
}

impl From<BTreeMap<String, String>> for ContentMap {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}
