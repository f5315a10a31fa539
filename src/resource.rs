//! Resource addressing and blocking retrieval.
//!
//! A resource named `R` always lives at `/static/markdowns/R.md`. How that
//! address is turned into text is up to a [`Fetcher`]:
//!
//! - [`HttpFetcher`] issues a blocking `GET` against an origin URL.
//! - [`DirFetcher`] maps the address onto a static directory on disk.
//!
//! Every call is synchronous and returns only after the retrieval has fully
//! settled, success or failure. Nothing is cached.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Fixed base path of every markdown resource.
pub const MARKDOWN_BASE: &str = "/static/markdowns/";

/// Fixed extension appended to every resource name.
pub const MARKDOWN_EXT: &str = ".md";

/// URL prefix under which the site's static directory is exposed.
pub const STATIC_PREFIX: &str = "/static/";

/// Build the address for `name`: base path + name + extension.
///
/// No validation is done; an empty name yields `/static/markdowns/.md`.
pub fn resource_address(name: &str) -> String {
    format!("{MARKDOWN_BASE}{name}{MARKDOWN_EXT}")
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("GET {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} returned a body that is not UTF-8")]
    NotUtf8 {
        url: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("resource {address} not found")]
    NotFound { address: String },

    #[error("resource address {address} escapes the static root")]
    OutsideRoot { address: String },

    #[error("reading {} failed", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Blocking retrieval of a resource's raw text by address.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, address: &str) -> Result<String, FetchError>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Fetches addresses relative to an HTTP origin such as `http://127.0.0.1:3333`.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    origin: String,
}

impl HttpFetcher {
    /// Build a fetcher for `origin`. Requests never time out.
    pub fn new(origin: &str) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            client,
            origin: origin.trim_end_matches('/').to_owned(),
        })
    }

    pub fn url_for(&self, address: &str) -> String {
        format!("{}{}", self.origin, address)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, address: &str) -> Result<String, FetchError> {
        let url = self.url_for(address);
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }
        let body = resp.bytes().map_err(|source| FetchError::Request {
            url: url.clone(),
            source,
        })?;
        String::from_utf8(body.to_vec()).map_err(|source| FetchError::NotUtf8 { url, source })
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Serves addresses under `/static/` from a directory on disk.
pub struct DirFetcher {
    static_root: PathBuf,
}

impl DirFetcher {
    pub fn new(static_root: impl Into<PathBuf>) -> Self {
        Self {
            static_root: static_root.into(),
        }
    }

    /// Resolve `address` to a path under the static root.
    ///
    /// Returns `None` when the address is not under `/static/` or when `..`
    /// components would climb out of the root.
    pub fn path_for(&self, address: &str) -> Option<PathBuf> {
        let rest = address.strip_prefix(STATIC_PREFIX)?;
        let relative = normalize_path(rest)?;
        if relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.static_root.join(relative))
    }
}

impl Fetcher for DirFetcher {
    fn fetch(&self, address: &str) -> Result<String, FetchError> {
        let path = self
            .path_for(address)
            .ok_or_else(|| FetchError::OutsideRoot {
                address: address.to_owned(),
            })?;
        if !path.is_file() {
            return Err(FetchError::NotFound {
                address: address.to_owned(),
            });
        }
        if !is_contained(&path, &self.static_root) {
            return Err(FetchError::OutsideRoot {
                address: address.to_owned(),
            });
        }
        std::fs::read_to_string(&path).map_err(|source| FetchError::Io { path, source })
    }
}

/// Normalize a decoded URL path, stripping `.` and `..` components.
///
/// Splits on `/`, ignores empty components and `.`, resolves `..` by popping
/// the stack. Returns `None` if a `..` would escape the root.
pub fn normalize_path(decoded: &str) -> Option<PathBuf> {
    let mut parts: Vec<&str> = Vec::new();
    for component in decoded.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            name => parts.push(name),
        }
    }
    Some(parts.iter().collect())
}

/// `true` when `path` lies inside `root` once both are canonicalized.
pub fn is_contained(path: &Path, root: &Path) -> bool {
    match (std::fs::canonicalize(path), std::fs::canonicalize(root)) {
        (Ok(p), Ok(r)) => p.starts_with(r),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- resource_address ---

    #[test]
    fn address_concatenates_base_name_and_extension() {
        assert_eq!(resource_address("team_roles"), "/static/markdowns/team_roles.md");
    }

    #[test]
    fn empty_name_yields_bare_extension() {
        assert_eq!(resource_address(""), "/static/markdowns/.md");
    }

    // --- normalize_path ---

    #[test]
    fn normalize_simple_path() {
        assert_eq!(normalize_path("/docs/guide").unwrap(), PathBuf::from("docs/guide"));
    }

    #[test]
    fn normalize_root_gives_empty() {
        assert_eq!(normalize_path("/").unwrap(), PathBuf::new());
    }

    #[test]
    fn normalize_dotdot_within_root() {
        assert_eq!(normalize_path("/a/b/../c").unwrap(), PathBuf::from("a/c"));
    }

    #[test]
    fn normalize_traversal_above_root_rejected() {
        assert!(normalize_path("/../etc/passwd").is_none());
        assert!(normalize_path("/a/../../etc/passwd").is_none());
    }

    // --- DirFetcher ---

    fn static_dir() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let md = tmp.path().join("markdowns");
        std::fs::create_dir_all(&md).unwrap();
        std::fs::write(md.join("team_roles.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("secret.txt"), "not markdown").unwrap();
        tmp
    }

    #[test]
    fn dir_fetcher_reads_existing_resource() {
        let tmp = static_dir();
        let fetcher = DirFetcher::new(tmp.path());
        let text = fetcher.fetch(&resource_address("team_roles")).unwrap();
        assert_eq!(text, "# Hello");
    }

    #[test]
    fn dir_fetcher_missing_resource_is_not_found() {
        let tmp = static_dir();
        let fetcher = DirFetcher::new(tmp.path());
        let err = fetcher.fetch(&resource_address("does_not_exist")).unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }), "got {err:?}");
    }

    #[test]
    fn dir_fetcher_empty_name_fails() {
        let tmp = static_dir();
        let fetcher = DirFetcher::new(tmp.path());
        assert!(fetcher.fetch(&resource_address("")).is_err());
    }

    #[test]
    fn dir_fetcher_rejects_traversal() {
        let tmp = static_dir();
        let fetcher = DirFetcher::new(tmp.path().join("markdowns"));
        let err = fetcher.fetch(&resource_address("../../etc/passwd")).unwrap_err();
        assert!(matches!(err, FetchError::OutsideRoot { .. }), "got {err:?}");
    }

    #[test]
    fn dir_fetcher_rejects_addresses_outside_static_prefix() {
        let tmp = static_dir();
        let fetcher = DirFetcher::new(tmp.path());
        assert!(fetcher.path_for("/templates/base.html").is_none());
        assert!(fetcher.path_for("/static/").is_none());
    }

    #[test]
    fn dir_fetcher_maps_nested_names() {
        let fetcher = DirFetcher::new("/srv/site/static");
        assert_eq!(
            fetcher.path_for(&resource_address("about/team")).unwrap(),
            PathBuf::from("/srv/site/static/markdowns/about/team.md")
        );
    }

    // --- HttpFetcher ---

    #[test]
    fn http_fetcher_joins_origin_and_address() {
        let fetcher = HttpFetcher::new("http://127.0.0.1:3333/").unwrap();
        assert_eq!(
            fetcher.url_for(&resource_address("team_roles")),
            "http://127.0.0.1:3333/static/markdowns/team_roles.md"
        );
    }

    #[test]
    fn http_fetcher_connection_refused_is_request_error() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let fetcher = HttpFetcher::new(&format!("http://127.0.0.1:{port}")).unwrap();
        let err = fetcher.fetch(&resource_address("team_roles")).unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }), "got {err:?}");
    }

    /// Accept one connection, answer it with a 200 carrying `body`, then exit.
    fn one_shot_server(body: &'static [u8]) -> (String, std::thread::JoinHandle<()>) {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/markdown\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(body).unwrap();
        });
        (origin, handle)
    }

    #[test]
    fn http_fetcher_reads_utf8_body() {
        let (origin, handle) = one_shot_server("# Hi ✓".as_bytes());
        let fetcher = HttpFetcher::new(&origin).unwrap();
        let text = fetcher.fetch(&resource_address("team_roles")).unwrap();
        handle.join().unwrap();
        assert_eq!(text, "# Hi ✓");
    }

    #[test]
    fn http_fetcher_rejects_invalid_utf8_body() {
        let (origin, handle) = one_shot_server(b"# Hi \xff\xfe");
        let fetcher = HttpFetcher::new(&origin).unwrap();
        let err = fetcher.fetch(&resource_address("team_roles")).unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, FetchError::NotUtf8 { .. }), "got {err:?}");
    }

    #[test]
    fn dir_fetcher_rejects_invalid_utf8_file() {
        let tmp = static_dir();
        std::fs::write(tmp.path().join("markdowns/binary.md"), b"# Hi \xff\xfe").unwrap();
        let fetcher = DirFetcher::new(tmp.path());
        let err = fetcher.fetch(&resource_address("binary")).unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }), "got {err:?}");
    }

    // --- is_contained ---

    #[cfg(unix)]
    #[test]
    fn symlink_outside_root_is_not_contained() {
        use std::os::unix::fs::symlink;

        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("secret.md");
        std::fs::write(&target, "secret").unwrap();
        let link = root.path().join("evil.md");
        symlink(&target, &link).unwrap();

        assert!(!is_contained(&link, root.path()));
        let inside = root.path().join("fine.md");
        std::fs::write(&inside, "fine").unwrap();
        assert!(is_contained(&inside, root.path()));
    }
}
