//! Load markdown resources into page regions.
//!
//! [`load`] handles one (region, resource) pair: fetch, render, locate,
//! replace. [`load_all`] drives it across a whole [`ContentMap`], capturing
//! every failure in an [`EntryOutcome`] so that one missing region or missing
//! file never stops the remaining entries. Failures are never written to the
//! page; they only surface in the returned outcomes and in the log.

use serde::Serialize;
use thiserror::Error;

use crate::content_map::{ContentEntry, ContentMap};
use crate::markdown::Renderer;
use crate::page::{Page, PageError};
use crate::resource::{resource_address, FetchError, Fetcher};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("retrieving {address} failed")]
    Fetch {
        address: String,
        #[source]
        source: FetchError,
    },

    #[error(transparent)]
    Page(#[from] PageError),
}

impl LoadError {
    /// Short, stable label for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::Fetch { .. } => "fetch",
            LoadError::Page(PageError::RegionMissing(_)) => "region-missing",
            LoadError::Page(PageError::NotContainer { .. }) => "region-not-container",
            LoadError::Page(PageError::Parse(_)) => "page-parse",
        }
    }

    /// Full error chain joined with `: `.
    pub fn chain(&self) -> String {
        let mut msg = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            msg.push_str(": ");
            msg.push_str(&err.to_string());
            source = err.source();
        }
        msg
    }
}

/// Result of processing one entry during a [`load_all`] pass.
#[derive(Debug)]
pub struct EntryOutcome {
    pub entry: ContentEntry,
    pub result: Result<(), LoadError>,
}

impl EntryOutcome {
    pub fn is_loaded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn report(&self) -> OutcomeReport {
        let (kind, error) = match &self.result {
            Ok(()) => (None, None),
            Err(e) => (Some(e.kind()), Some(e.chain())),
        };
        OutcomeReport {
            target: self.entry.target.clone(),
            resource: self.entry.resource.clone(),
            address: resource_address(&self.entry.resource),
            loaded: self.is_loaded(),
            kind,
            error,
        }
    }
}

/// Serializable view of an [`EntryOutcome`].
#[derive(Debug, Serialize)]
pub struct OutcomeReport {
    pub target: String,
    pub resource: String,
    pub address: String,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Render resource `resource` into the region `target` of `page`.
///
/// The resource is retrieved and rendered before the region is looked up.
/// On any error the page is left unchanged.
pub fn load(
    page: &mut Page,
    target: &str,
    resource: &str,
    fetcher: &dyn Fetcher,
    renderer: &dyn Renderer,
) -> Result<(), LoadError> {
    let address = resource_address(resource);
    let text = fetcher
        .fetch(&address)
        .map_err(|source| LoadError::Fetch { address, source })?;
    let html = renderer.render(&text);
    page.replace_region(target, &html)?;
    Ok(())
}

/// Run [`load`] once for every entry of `map`, in map order.
///
/// Each entry is fully settled before the next one starts. Never fails as a
/// whole; per-entry failures are returned in the outcomes.
pub fn load_all(
    page: &mut Page,
    map: &ContentMap,
    fetcher: &dyn Fetcher,
    renderer: &dyn Renderer,
) -> Vec<EntryOutcome> {
    let mut outcomes = Vec::with_capacity(map.len());
    for entry in map.entries() {
        let result = load(page, &entry.target, &entry.resource, fetcher, renderer);
        match &result {
            Ok(()) => {
                tracing::debug!(target_id = %entry.target, resource = %entry.resource, "region loaded");
            }
            Err(e @ LoadError::Page(_)) => {
                tracing::debug!(target_id = %entry.target, resource = %entry.resource, reason = e.kind(), "region skipped");
            }
            Err(e) => {
                tracing::warn!(target_id = %entry.target, resource = %entry.resource, error = %e.chain(), "resource not loaded");
            }
        }
        outcomes.push(EntryOutcome { entry, result });
    }
    let loaded = outcomes.iter().filter(|o| o.is_loaded()).count();
    tracing::debug!(entries = outcomes.len(), loaded, "load pass complete");
    outcomes
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::markdown::ComrakRenderer;

    /// In-memory fetcher that records every address it was asked for.
    #[derive(Default)]
    struct MapFetcher {
        files: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        fn with(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Fetcher for MapFetcher {
        fn fetch(&self, address: &str) -> Result<String, FetchError> {
            self.requests.lock().unwrap().push(address.to_owned());
            self.files
                .get(address)
                .cloned()
                .ok_or_else(|| FetchError::NotFound {
                    address: address.to_owned(),
                })
        }
    }

    const PAGE: &str = "<html><body>\
<div id=\"overview\"></div>\
<div id=\"team\"><p>old</p></div>\
<div id=\"test-page\"></div>\
</body></html>";

    fn files() -> MapFetcher {
        MapFetcher::with(&[
            ("/static/markdowns/team_roles.md", "# Hello"),
            ("/static/markdowns/gender_novels_overview.md", "Overview *text*."),
        ])
    }

    #[test]
    fn loads_heading_into_region() {
        let fetcher = files();
        let mut page = Page::new(PAGE);
        load(&mut page, "overview", "team_roles", &fetcher, &ComrakRenderer).unwrap();
        assert_eq!(page.region_html("overview").unwrap(), "<h1>Hello</h1>\n");
    }

    #[test]
    fn region_content_equals_rendering_of_resource() {
        let fetcher = files();
        let mut page = Page::new(PAGE);
        load(&mut page, "team", "gender_novels_overview", &fetcher, &ComrakRenderer).unwrap();
        assert_eq!(
            page.region_html("team").unwrap(),
            ComrakRenderer.render("Overview *text*.")
        );
    }

    #[test]
    fn load_is_idempotent() {
        let fetcher = files();
        let mut page = Page::new(PAGE);
        load(&mut page, "overview", "team_roles", &fetcher, &ComrakRenderer).unwrap();
        let first = page.clone();
        load(&mut page, "overview", "team_roles", &fetcher, &ComrakRenderer).unwrap();
        assert_eq!(page, first);
    }

    #[test]
    fn missing_resource_is_fetch_error_and_page_untouched() {
        let fetcher = files();
        let mut page = Page::new(PAGE);
        let err = load(&mut page, "overview", "does_not_exist", &fetcher, &ComrakRenderer)
            .unwrap_err();
        assert_eq!(err.kind(), "fetch");
        assert_eq!(page.as_str(), PAGE);
    }

    #[test]
    fn missing_region_fetches_first_then_fails() {
        let fetcher = files();
        let mut page = Page::new(PAGE);
        let err = load(&mut page, "missing", "team_roles", &fetcher, &ComrakRenderer).unwrap_err();
        assert_eq!(err.kind(), "region-missing");
        assert_eq!(fetcher.requests(), ["/static/markdowns/team_roles.md"]);
        assert_eq!(page.as_str(), PAGE);
    }

    #[test]
    fn empty_resource_name_requests_bare_extension() {
        let fetcher = files();
        let mut page = Page::new(PAGE);
        let map: ContentMap = [("test-page", "")].into_iter().collect();
        let outcomes = load_all(&mut page, &map, &fetcher, &ComrakRenderer);
        assert_eq!(fetcher.requests(), ["/static/markdowns/.md"]);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].result.as_ref().unwrap_err().kind(), "fetch");
        assert_eq!(page.region_html("test-page").unwrap(), "");
    }

    #[test]
    fn missing_region_scenario_does_not_escape() {
        let fetcher = files();
        let mut page = Page::new(PAGE);
        let map: ContentMap = [("missing", "does_not_exist")].into_iter().collect();
        let outcomes = load_all(&mut page, &map, &fetcher, &ComrakRenderer);
        assert!(!outcomes[0].is_loaded());
        assert_eq!(page.as_str(), PAGE);
    }

    #[test]
    fn failures_do_not_stop_later_entries() {
        let fetcher = files();
        let mut page = Page::new(PAGE);
        // Identifier order: "a-missing", "b-ghost", "overview", "team".
        let map: ContentMap = [
            ("a-missing", "does_not_exist"),
            ("b-ghost", "team_roles"),
            ("overview", "gender_novels_overview"),
            ("team", "team_roles"),
        ]
        .into_iter()
        .collect();

        let outcomes = load_all(&mut page, &map, &fetcher, &ComrakRenderer);

        let summary: Vec<(&str, bool)> = outcomes
            .iter()
            .map(|o| (o.entry.target.as_str(), o.is_loaded()))
            .collect();
        assert_eq!(
            summary,
            [
                ("a-missing", false),
                ("b-ghost", false),
                ("overview", true),
                ("team", true),
            ]
        );
        assert_eq!(fetcher.requests().len(), 4);
        assert!(page.region_html("overview").unwrap().contains("<em>text</em>"));
        assert_eq!(page.region_html("team").unwrap(), "<h1>Hello</h1>\n");
    }

    #[test]
    fn report_describes_failure() {
        let fetcher = files();
        let mut page = Page::new(PAGE);
        let map: ContentMap = [("missing", "team_roles"), ("overview", "nope")]
            .into_iter()
            .collect();
        let outcomes = load_all(&mut page, &map, &fetcher, &ComrakRenderer);

        let missing = outcomes[0].report();
        assert_eq!(missing.target, "missing");
        assert_eq!(missing.kind, Some("region-missing"));
        assert!(!missing.loaded);

        let nope = outcomes[1].report();
        assert_eq!(nope.address, "/static/markdowns/nope.md");
        assert_eq!(nope.kind, Some("fetch"));
        let error = nope.error.unwrap();
        assert!(error.contains("retrieving /static/markdowns/nope.md failed"), "{error}");
        assert!(error.contains("not found"), "{error}");
    }

    #[test]
    fn successful_report_omits_error_fields() {
        let fetcher = files();
        let mut page = Page::new(PAGE);
        let map: ContentMap = [("team", "team_roles")].into_iter().collect();
        let outcomes = load_all(&mut page, &map, &fetcher, &ComrakRenderer);
        let json = serde_json::to_value(outcomes[0].report()).unwrap();
        assert_eq!(json["loaded"], true);
        assert!(json.get("kind").is_none());
        assert!(json.get("error").is_none());
    }
}
