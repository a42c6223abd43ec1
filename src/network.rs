//! Network abstraction for testability.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;

use crate::error::{Error, Result};
use crate::request::{Request, Response};

/// Something that can turn a request into a response over the network.
///
/// `Err` means no response was produced at all (connection refused, DNS
/// failure, reset). Any HTTP status, including 404 and 500, is `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

#[async_trait]
impl<T: Network + ?Sized> Network for std::sync::Arc<T> {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        (**self).fetch(request).await
    }
}

/// Builds a pooled HTTP client. Failure signalling is left to the client.
///
/// Redirects are not followed: a 3xx reaches the worker with its
/// `Location` header, like a navigation fetch in manual redirect mode.
fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_idle_timeout(Duration::from_secs(60))
        .pool_max_idle_per_host(8)
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// [`Network`] backed by `reqwest`.
///
/// With an upstream set, page-origin URLs are re-targeted at the upstream
/// server (scheme, host and port replaced; path and query kept). Responses
/// still report the page-facing URL.
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
    upstream: Option<Url>,
}

impl HttpNetwork {
    /// Creates a network that fetches URLs as given.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            upstream: None,
        })
    }

    /// Creates a network that re-targets requests at `upstream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_upstream(upstream: Url) -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            upstream: Some(upstream),
        })
    }

    /// Returns the URL actually requested for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the upstream cannot be combined with the path.
    pub fn target_url(&self, url: &Url) -> Result<Url> {
        let Some(upstream) = &self.upstream else {
            return Ok(url.clone());
        };
        let mut target = upstream.clone();
        target.set_path(url.path());
        target.set_query(url.query());
        if target.cannot_be_a_base() {
            return Err(Error::InvalidUrl(upstream.to_string()));
        }
        Ok(target)
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let target = self.target_url(&request.url)?;
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| Error::InvalidUrl(format!("bad method {}: {e}", request.method)))?;

        let mut builder = self.client.request(method, target.clone());
        if let Some(accept) = &request.accept {
            builder = builder.header(reqwest::header::ACCEPT, accept);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("{target}: {e}")))?;

        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("{target}: {e}")))?;

        log::debug!("{} {} -> {status}", request.method, request.url);

        Ok(Response {
            status,
            headers,
            body,
            url: request.url.to_string(),
        })
    }
}
