//! Request and response descriptors seen by the worker.

use std::fmt;

use bytes::Bytes;
use reqwest::Url;

use crate::error::{Error, Result};
use crate::manifest::AssetManifest;

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Other(String),
}

impl Method {
    /// Parses a method name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "OPTIONS" => Self::Options,
            other => Self::Other(other.to_string()),
        }
    }

    /// Canonical upper-case name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fetch mode of a request, as reported by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level or frame navigation.
    Navigate,
    #[default]
    SameOrigin,
    NoCors,
    Cors,
}

/// An intercepted request. Carries only what the worker reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    /// Value of the `Accept` header, if any.
    pub accept: Option<String>,
    pub mode: RequestMode,
}

impl Request {
    /// Creates a GET request for an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `url` is not an absolute URL.
    pub fn get(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::from_url(url))
    }

    /// Creates a navigation GET request accepting HTML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if `url` is not an absolute URL.
    pub fn navigate(url: &str) -> Result<Self> {
        Ok(Self {
            mode: RequestMode::Navigate,
            accept: Some("text/html,application/xhtml+xml".to_string()),
            ..Self::get(url)?
        })
    }

    /// Creates a GET request from an already parsed URL.
    #[must_use]
    pub const fn from_url(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            accept: None,
            mode: RequestMode::SameOrigin,
        }
    }

    /// Sets the request method.
    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the `Accept` header.
    #[must_use]
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Sets the request mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns true if the request expects an HTML document.
    #[must_use]
    pub fn accepts_html(&self) -> bool {
        self.accept
            .as_deref()
            .is_some_and(|accept| accept.contains("text/html"))
    }

    /// Returns true if the request targets the same origin as `origin`.
    #[must_use]
    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }

    /// Cache key for this request.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.url)
    }

    /// Classifies the request for strategy selection.
    #[must_use]
    pub fn classify(&self, manifest: &AssetManifest) -> RequestKind {
        if self.mode == RequestMode::Navigate || self.accepts_html() {
            RequestKind::Navigation
        } else if manifest.contains(self.url.path()) {
            RequestKind::StaticAsset
        } else {
            RequestKind::Other
        }
    }
}

/// Strategy-relevant classification of a same-origin GET request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// HTML document load; served network-first.
    Navigation,
    /// Path listed in the asset manifest; served cache-first from the static partition.
    StaticAsset,
    /// Any other same-origin GET; served cache-first from the dynamic partition.
    Other,
}

/// Key of a cached entry: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds the key for `method` and `url`.
    #[must_use]
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(format!("{method} {url}"))
    }

    /// Parses a key previously produced by [`CacheKey::as_str`].
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A response, either from the network or from a partition.
///
/// The body is a [`Bytes`] handle: cloning is cheap and both copies read the
/// same immutable buffer independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// URL the response was produced for.
    pub url: String,
}

impl Response {
    /// Creates a response with no headers.
    #[must_use]
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            url: url.into(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Looks up a header value, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Only complete 200 responses are ever written to a partition.
    #[must_use]
    pub const fn is_cacheable(&self) -> bool {
        self.status == 200
    }
}
