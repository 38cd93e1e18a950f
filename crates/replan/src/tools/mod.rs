//! The Tool Registry contract and its adapters.
//!
//! A Tool Registry is an external catalog of callable functions grouped by
//! category. The planner only ever sees it through [`ToolRegistry`]: paginated
//! discovery plus one `execute` operation. Everything coming back from a
//! registry is treated as untrusted and validated before use.
//!
//! # Submodules
//!
//! - [`catalog`]: [`FunctionSpec`] discovery metadata, JSON Schema derivation
//!   and parameter validation.
//! - [`response`]: validation of the execute wrapper and its string-encoded
//!   inner payload.
//! - [`http`]: [`HttpToolRegistry`] for registries served over HTTP.
//! - [`local`]: [`LocalToolRegistry`], an in-process registry of closures.
//! - [`expr`]: the sandboxed expression evaluator behind `calc.evaluate`.

pub mod catalog;
pub mod expr;
pub mod http;
pub mod local;
pub mod response;

pub use catalog::{FunctionSpec, ParamSpec, validate_parameters};
pub use http::HttpToolRegistry;
pub use local::{LocalFunction, LocalToolRegistry};
pub use response::unwrap_payload;

use crate::error::{DiscoveryError, ToolExecutionError, ValidationError};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Default page size for discovery calls.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Upper bound on pages fetched by [`collect_catalog`].
const MAX_CATALOG_PAGES: usize = 100;

// ── Identifiers ────────────────────────────────────────────────────

/// A fully qualified tool: `category.function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ToolId {
    pub category: String,
    pub function: String,
}

impl ToolId {
    pub fn new(category: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            function: function.into(),
        }
    }

    /// Parse `"category.function"`. Both halves must be non-empty.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (category, function) = qualified.split_once('.')?;
        if category.is_empty() || function.is_empty() {
            return None;
        }
        Some(Self::new(category, function))
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.function)
    }
}

// ── Pagination ─────────────────────────────────────────────────────

/// Offset/limit window for discovery calls. `limit: None` asks for everything
/// from `offset` onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            offset: 0,
            limit: Some(limit),
        }
    }

    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: None,
        }
    }

    /// The request for the page following `page`.
    pub fn next_after<T>(&self, page: &Page<T>) -> Self {
        Self {
            offset: page.offset + page.items.len(),
            limit: self.limit,
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first(DEFAULT_PAGE_SIZE)
    }
}

/// One page of discovery results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl<T> Page<T> {
    /// Slice `all` according to `request`, the way registries page results.
    pub fn slice(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let items: Vec<T> = match request.limit {
            Some(limit) => all.into_iter().skip(request.offset).take(limit).collect(),
            None => all.into_iter().skip(request.offset).collect(),
        };
        Self {
            items,
            total,
            offset: request.offset,
            limit: request.limit,
        }
    }

    pub fn has_more(&self) -> bool {
        !self.items.is_empty() && self.offset + self.items.len() < self.total
    }
}

// ── Contract ───────────────────────────────────────────────────────

/// Boxed future returned by discovery operations.
pub type DiscoveryFuture<'a, T> = BoxFuture<'a, Result<T, DiscoveryError>>;

/// Boxed future returned by [`ToolRegistry::execute`]. Resolves to the raw
/// response wrapper, which callers validate with [`unwrap_payload`].
pub type ExecuteFuture<'a> = BoxFuture<'a, Result<Value, ToolExecutionError>>;

/// Catalog and executor for concrete actions.
///
/// Discovery results are keyed by function name; `execute` addresses a
/// function by its [`ToolId`] and sends a JSON object of parameters. The
/// execute response is a wrapper `{function_name, success, result}` whose
/// `result` is a string-encoded JSON object with its own `success` field.
pub trait ToolRegistry: Send + Sync {
    fn list_functions(&self, page: PageRequest) -> DiscoveryFuture<'_, Page<FunctionSpec>>;

    /// Look up one function's metadata. `Ok(None)` when the name is unknown.
    fn get_function<'a>(&'a self, name: &'a str) -> DiscoveryFuture<'a, Option<FunctionSpec>>;

    fn list_by_category<'a>(
        &'a self,
        category: &'a str,
        page: PageRequest,
    ) -> DiscoveryFuture<'a, Page<FunctionSpec>>;

    fn list_categories(&self) -> DiscoveryFuture<'_, Vec<String>>;

    /// Search names and descriptions.
    fn search<'a>(
        &'a self,
        query: &'a str,
        page: PageRequest,
    ) -> DiscoveryFuture<'a, Page<FunctionSpec>>;

    fn execute<'a>(&'a self, tool: &'a ToolId, params: &'a Value) -> ExecuteFuture<'a>;
}

// ── Helpers over the contract ──────────────────────────────────────

/// Resolve `tool` against the registry's catalog.
///
/// Fails closed: an unknown name, a spec for some other function or
/// category, or an unreachable catalog are all validation failures.
pub async fn resolve(
    registry: &dyn ToolRegistry,
    tool: &ToolId,
) -> Result<FunctionSpec, ValidationError> {
    let found = registry.get_function(&tool.function).await.map_err(|e| {
        ValidationError::CatalogUnavailable {
            tool: tool.to_string(),
            reason: e.to_string(),
        }
    })?;
    match found {
        Some(spec) if spec.category == tool.category && spec.name == tool.function => Ok(spec),
        _ => Err(ValidationError::UnknownTool {
            category: tool.category.clone(),
            function: tool.function.clone(),
        }),
    }
}

/// Walk every page of `list_functions`.
pub async fn collect_catalog(
    registry: &dyn ToolRegistry,
) -> Result<Vec<FunctionSpec>, DiscoveryError> {
    let mut request = PageRequest::default();
    let mut functions = Vec::new();
    for _ in 0..MAX_CATALOG_PAGES {
        let page = registry.list_functions(request).await?;
        let more = page.has_more();
        request = request.next_after(&page);
        functions.extend(page.items);
        if !more {
            break;
        }
    }
    Ok(functions)
}

/// Render the catalog as a prompt section, grouped by category.
///
/// List endpoints may return bare names; those entries are completed with a
/// `get_function` lookup so parameters can be shown.
pub async fn tools_summary(registry: &dyn ToolRegistry) -> Result<String, DiscoveryError> {
    let mut functions = collect_catalog(registry).await?;
    for spec in functions.iter_mut() {
        if spec.category.is_empty()
            && let Some(full) = registry.get_function(&spec.name).await?
        {
            *spec = full;
        }
    }
    functions.sort_by(|a, b| (&a.category, &a.name).cmp(&(&b.category, &b.name)));

    let mut out = String::new();
    let mut current: Option<&str> = None;
    for spec in &functions {
        if current != Some(spec.category.as_str()) {
            if current.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("## {}\n", spec.category));
            current = Some(spec.category.as_str());
        }
        out.push_str(&spec.summary_line());
        out.push('\n');
    }
    Ok(out)
}
