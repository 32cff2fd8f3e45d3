//! Request flattening
//!
//! A [`RequestSpec`] describes *what* to fetch; flattening turns it into the
//! concrete calls to make. A spec without a timeseries becomes exactly one
//! [`FlattenedRequest`]. A spec with a timeseries becomes one request per
//! chunk, each with its own copy of the query carrying that chunk's bounds.
//!
//! Every request of a run holds the same [`RateLimiter`], so the quota is
//! enforced across endpoints and workers.

use reqwest::{Method, Url};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::RequestSpec;
use crate::pipeline::rate_limit::RateLimiter;
use crate::timeseries::{chunk_range, ChunkError, TimeLayout};

/// Flattening errors
#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    /// URL could not be built from base and endpoint
    #[error("failed to construct URL from {base:?} and {endpoint:?}: {reason}")]
    UrlConstruction {
        /// Base URL
        base: String,
        /// Endpoint fragment
        endpoint: String,
        /// What went wrong
        reason: String,
    },

    /// Method is not a valid HTTP method
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    /// Timeseries chunking failed
    #[error("failed to chunk timeseries for {endpoint:?}: {source}")]
    Chunk {
        /// Endpoint being chunked
        endpoint: String,
        /// Chunking error
        #[source]
        source: ChunkError,
    },
}

/// One fully resolved HTTP call
#[derive(Debug, Clone)]
pub struct FlattenedRequest {
    method: Method,
    url: Url,
    table: Option<String>,
    truncate: Option<bool>,
    rate_limiter: Arc<RateLimiter>,
}

impl FlattenedRequest {
    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full URL including query
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Explicit destination table, if the spec declared one
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Truncate override from the originating spec
    pub fn truncate(&self) -> Option<bool> {
        self.truncate
    }

    /// Shared rate limiter for the run
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }
}

impl fmt::Display for FlattenedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)?;
        if let Some(table) = &self.table {
            write!(f, " -> {table}")?;
        }
        Ok(())
    }
}

/// Join `endpoint` onto `base`.
///
/// Path segments are joined with single slashes. A query string on the
/// base or the endpoint is kept. Endpoints that are absolute URLs, carry a
/// fragment, or climb with `..` are rejected rather than silently rewritten.
pub fn join_url(base: &str, endpoint: &str) -> Result<Url, FlattenError> {
    let error = |reason: &str| FlattenError::UrlConstruction {
        base: base.to_string(),
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(base).map_err(|e| error(&e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(error("base URL cannot carry a path"));
    }
    if url.fragment().is_some() {
        return Err(error("base URL must not carry a fragment"));
    }
    if endpoint.contains("://") {
        return Err(error("endpoint must be a path, not an absolute URL"));
    }
    if endpoint.contains('#') {
        return Err(error("endpoint must not carry a fragment"));
    }

    let (path, query) = endpoint.split_once('?').unwrap_or((endpoint, ""));

    let mut segments = Vec::new();
    for segment in url.path().split('/').chain(path.split('/')) {
        match segment {
            "" | "." => {}
            ".." => return Err(error("endpoint must not contain '..' segments")),
            segment => segments.push(segment.to_string()),
        }
    }
    url.set_path(&format!("/{}", segments.join("/")));

    let combined: Vec<&str> = [url.query().unwrap_or(""), query]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();
    let combined = combined.join("&");
    url.set_query(if combined.is_empty() {
        None
    } else {
        Some(combined.as_str())
    });

    Ok(url)
}

/// Decoded query pairs of a URL, in order.
pub fn query_pairs(url: &Url) -> Vec<(String, String)> {
    url.query_pairs().into_owned().collect()
}

/// Set each key in `params` on `url`, replacing existing values for it.
pub fn apply_query(url: &mut Url, params: &BTreeMap<String, String>) {
    if params.is_empty() {
        return;
    }

    let mut pairs: Vec<(String, String)> = query_pairs(url)
        .into_iter()
        .filter(|(key, _)| !params.contains_key(key))
        .collect();
    pairs.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

    url.query_pairs_mut().clear().extend_pairs(pairs);
}

/// Flatten one spec into the requests it stands for.
pub fn flatten(
    spec: &RequestSpec,
    base_url: &str,
    rate_limiter: &Arc<RateLimiter>,
) -> Result<Vec<FlattenedRequest>, FlattenError> {
    let method = spec
        .http_method()
        .map_err(|_| FlattenError::InvalidMethod(spec.method.clone()))?;

    let mut url = join_url(base_url, &spec.endpoint)?;
    apply_query(&mut url, &spec.query);

    let build = |url: Url| FlattenedRequest {
        method: method.clone(),
        url,
        table: spec.table.clone(),
        truncate: spec.truncate,
        rate_limiter: Arc::clone(rate_limiter),
    };

    let Some(timeseries) = &spec.timeseries else {
        return Ok(vec![build(url)]);
    };

    let chunks = chunk_range(&query_pairs(&url), timeseries).map_err(|source| {
        FlattenError::Chunk {
            endpoint: spec.endpoint.clone(),
            source,
        }
    })?;
    let layout = TimeLayout::from_spec(timeseries);

    Ok(chunks
        .iter()
        .map(|chunk| {
            let mut bounds = BTreeMap::new();
            bounds.insert(timeseries.start_name.clone(), layout.format(&chunk.start));
            bounds.insert(timeseries.end_name.clone(), layout.format(&chunk.end));

            let mut chunk_url = url.clone();
            apply_query(&mut chunk_url, &bounds);
            build(chunk_url)
        })
        .collect())
}

/// Flatten every spec, preserving spec order.
pub fn flatten_all(
    specs: &[RequestSpec],
    base_url: &str,
    rate_limiter: &Arc<RateLimiter>,
) -> Result<Vec<FlattenedRequest>, FlattenError> {
    let mut requests = Vec::new();
    for spec in specs {
        requests.extend(flatten(spec, base_url, rate_limiter)?);
    }
    Ok(requests)
}
