//! Tool Registry client over HTTP.
//!
//! Endpoints:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | list functions | `GET /functions?limit=&offset=` |
//! | get function | `GET /functions/{name}` |
//! | list by category | `GET /functions/category/{category}?limit=&offset=` |
//! | list categories | `GET /categories` |
//! | search | `GET /search?q=&limit=&offset=` |
//! | execute | `POST /{category}/{function}` with a JSON object body |
//! | health | `GET /` |
//!
//! Names are sent as single percent-encoded path segments, so a `/`, `?` or
//! `#` in a name never reaches a different endpoint.
//!
//! Discovery requests are idempotent and retried on transient errors.
//! Execute is never retried; the planner records its failure instead.

use super::catalog::FunctionSpec;
use super::{DiscoveryFuture, ExecuteFuture, Page, PageRequest, ToolId, ToolRegistry};
use crate::api::retry::{RetryConfig, is_transient_error, retry_call};
use crate::error::{DiscoveryError, ToolExecutionError};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default registry location.
pub const DEFAULT_REGISTRY_URL: &str = "http://localhost:9999";

#[derive(Deserialize)]
struct FunctionsPage {
    #[serde(default)]
    functions: Vec<FunctionSpec>,
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

#[derive(Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<FunctionSpec>,
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

#[derive(Deserialize)]
struct CategoriesBody {
    categories: Vec<String>,
}

fn into_page(
    items: Vec<FunctionSpec>,
    total: Option<usize>,
    offset: Option<usize>,
    request: PageRequest,
) -> Page<FunctionSpec> {
    let offset = offset.unwrap_or(request.offset);
    Page {
        total: total.unwrap_or(offset + items.len()),
        items,
        offset,
        limit: request.limit,
    }
}

/// HTTP-backed [`ToolRegistry`].
pub struct HttpToolRegistry {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl HttpToolRegistry {
    /// Create a client for `base_url` with a 30 second request timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("replan/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::with_retries(2),
        })
    }

    /// Override the discovery retry policy (builder pattern).
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /`. True when the registry answers with a success status.
    pub async fn health_check(&self) -> bool {
        match self.client.get(&self.base_url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Registry health check failed: {e}");
                false
            }
        }
    }

    fn page_query(page: PageRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![("offset", page.offset.to_string())];
        if let Some(limit) = page.limit {
            query.push(("limit", limit.to_string()));
        }
        query
    }

    /// `base_url` with `segments` appended, each encoded as one segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, String> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| format!("invalid registry URL: {e}"))?;
        url.path_segments_mut()
            .map_err(|_| format!("registry URL cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET and decode, retrying transient failures. `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<Option<T>, DiscoveryError> {
        let mut url = self.endpoint(segments).map_err(DiscoveryError::Transport)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        let path = url.path().to_string();
        let text = retry_call(
            &self.retry,
            "registry discovery",
            |e: &String| is_transient_error(e),
            || async {
                let start = Instant::now();
                let resp = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| format!("request failed: {e}"))?;
                let status = resp.status();
                let body = resp
                    .text()
                    .await
                    .map_err(|e| format!("request failed: reading body: {e}"))?;
                debug!(
                    "Registry GET {path}: HTTP {status} in {:.0}ms ({} bytes)",
                    start.elapsed().as_secs_f64() * 1000.0,
                    body.len()
                );
                if status == StatusCode::NOT_FOUND {
                    return Ok(None);
                }
                if !status.is_success() {
                    return Err(format!("registry HTTP {}: {body}", status.as_u16()));
                }
                Ok(Some(body))
            },
        )
        .await
        .map_err(DiscoveryError::Transport)?;

        match text {
            None => Ok(None),
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| DiscoveryError::Decode(format!("{path}: {e}"))),
        }
    }
}

impl ToolRegistry for HttpToolRegistry {
    fn list_functions(&self, page: PageRequest) -> DiscoveryFuture<'_, Page<FunctionSpec>> {
        Box::pin(async move {
            let body: Option<FunctionsPage> =
                self.get_json(&["functions"], &Self::page_query(page)).await?;
            Ok(match body {
                Some(b) => into_page(b.functions, b.total, b.offset, page),
                None => Page::slice(Vec::new(), page),
            })
        })
    }

    fn get_function<'a>(&'a self, name: &'a str) -> DiscoveryFuture<'a, Option<FunctionSpec>> {
        Box::pin(async move { self.get_json(&["functions", name], &[]).await })
    }

    fn list_by_category<'a>(
        &'a self,
        category: &'a str,
        page: PageRequest,
    ) -> DiscoveryFuture<'a, Page<FunctionSpec>> {
        Box::pin(async move {
            let body: Option<FunctionsPage> = self
                .get_json(&["functions", "category", category], &Self::page_query(page))
                .await?;
            // Unknown categories are a 404 upstream; report them as empty.
            Ok(match body {
                Some(b) => into_page(b.functions, b.total, b.offset, page),
                None => Page::slice(Vec::new(), page),
            })
        })
    }

    fn list_categories(&self) -> DiscoveryFuture<'_, Vec<String>> {
        Box::pin(async move {
            let body: Option<CategoriesBody> = self.get_json(&["categories"], &[]).await?;
            Ok(body.map(|b| b.categories).unwrap_or_default())
        })
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        page: PageRequest,
    ) -> DiscoveryFuture<'a, Page<FunctionSpec>> {
        Box::pin(async move {
            let mut params = vec![("q", query.to_string())];
            params.extend(Self::page_query(page));
            let body: Option<SearchPage> = self.get_json(&["search"], &params).await?;
            Ok(match body {
                Some(b) => into_page(b.results, b.total, b.offset, page),
                None => Page::slice(Vec::new(), page),
            })
        })
    }

    fn execute<'a>(&'a self, tool: &'a ToolId, params: &'a Value) -> ExecuteFuture<'a> {
        Box::pin(async move {
            let url = self
                .endpoint(&[tool.category.as_str(), tool.function.as_str()])
                .map_err(|e| ToolExecutionError::Transport(format!("{tool}: {e}")))?;
            let start = Instant::now();
            let resp = self
                .client
                .post(url)
                .json(params)
                .send()
                .await
                .map_err(|e| ToolExecutionError::Transport(format!("{tool}: {e}")))?;
            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| ToolExecutionError::Transport(format!("{tool}: {e}")))?;
            debug!(
                "Registry POST {tool}: HTTP {status} in {:.0}ms ({} bytes)",
                start.elapsed().as_secs_f64() * 1000.0,
                body.len()
            );
            trace!("Registry POST {tool} body: {}", body.chars().take(300).collect::<String>());

            if !status.is_success() {
                return Err(ToolExecutionError::Transport(format!(
                    "{tool}: HTTP {}: {}",
                    status.as_u16(),
                    body.chars().take(300).collect::<String>()
                )));
            }
            serde_json::from_str(&body)
                .map_err(|e| ToolExecutionError::MalformedResponse(format!("{tool}: {e}")))
        })
    }
}
