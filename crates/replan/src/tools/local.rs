//! An in-process Tool Registry backed by closures.
//!
//! Useful for embedding the planner next to native Rust capabilities and for
//! tests. Responses go through the same wrapper encoding as a remote registry,
//! so the planner's validation path is identical.

use super::catalog::FunctionSpec;
use super::expr;
use super::response::{wrap_error, wrap_payload};
use super::{DiscoveryFuture, ExecuteFuture, Page, PageRequest, ToolId, ToolRegistry};
use crate::tools::catalog::ParamSpec;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Type-erased async handler for [`LocalFunction`].
type ErasedHandler =
    Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> + Send + Sync>;

/// A function served by [`LocalToolRegistry`].
///
/// The handler receives the validated parameter object and returns either a
/// payload or an error message. Object payloads without a `success` field get
/// `success: true`; other payloads are wrapped as `{"success": true, "value": ...}`.
pub struct LocalFunction {
    spec: FunctionSpec,
    handler: ErasedHandler,
}

impl LocalFunction {
    pub fn new<F, Fut>(spec: FunctionSpec, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let erased = move |params: Value| -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> {
            Box::pin(handler(params))
        };
        Self {
            spec,
            handler: Box::new(erased),
        }
    }

    /// Create a function whose parameters are deserialized into `A` first.
    pub fn typed<A, F, Fut>(spec: FunctionSpec, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let erased = move |params: Value| -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> {
            match serde_json::from_value::<A>(params) {
                Ok(args) => Box::pin(handler(args)),
                Err(e) => Box::pin(async move { Err(format!("invalid parameters: {e}")) }),
            }
        };
        Self {
            spec,
            handler: Box::new(erased),
        }
    }

    pub fn spec(&self) -> &FunctionSpec {
        &self.spec
    }
}

impl fmt::Debug for LocalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFunction")
            .field("category", &self.spec.category)
            .field("name", &self.spec.name)
            .finish()
    }
}

fn normalize_payload(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            map.entry("success").or_insert(Value::Bool(true));
            Value::Object(map)
        }
        other => {
            let mut map = Map::new();
            map.insert("success".into(), Value::Bool(true));
            map.insert("value".into(), other);
            Value::Object(map)
        }
    }
}

/// In-process registry keyed by function name.
#[derive(Debug, Default)]
pub struct LocalToolRegistry {
    functions: BTreeMap<String, LocalFunction>,
}

impl LocalToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function (builder pattern). A later registration with the
    /// same name replaces the earlier one.
    pub fn with(mut self, function: LocalFunction) -> Self {
        self.register(function);
        self
    }

    pub fn register(&mut self, function: LocalFunction) {
        self.functions.insert(function.spec.name.clone(), function);
    }

    /// Register the built-in `calc.evaluate` function backed by the sandboxed
    /// evaluator in [`expr`].
    pub fn with_calculator(self) -> Self {
        let spec = FunctionSpec::new(
            "calc",
            "evaluate",
            "Evaluate an arithmetic, comparison or boolean expression",
        )
        .param("expr", ParamSpec::required("str"))
        .param("variables", ParamSpec::optional("Optional[dict]"));

        self.with(LocalFunction::new(spec, |params: Value| async move {
            let source = params["expr"].as_str().unwrap_or_default().to_string();
            let variables: BTreeMap<String, expr::Literal> = match params.get("variables") {
                Some(Value::Object(map)) => map
                    .iter()
                    .filter_map(|(k, v)| expr::Literal::from_json(v).map(|lit| (k.clone(), lit)))
                    .collect(),
                _ => BTreeMap::new(),
            };
            let value = expr::evaluate(&source, &variables).map_err(|e| e.to_string())?;
            Ok(json!({"success": true, "expr": source, "result": value.to_json()}))
        }))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn specs(&self) -> Vec<FunctionSpec> {
        self.functions.values().map(|f| f.spec.clone()).collect()
    }
}

impl ToolRegistry for LocalToolRegistry {
    fn list_functions(&self, page: PageRequest) -> DiscoveryFuture<'_, Page<FunctionSpec>> {
        let page = Page::slice(self.specs(), page);
        Box::pin(async move { Ok(page) })
    }

    fn get_function<'a>(&'a self, name: &'a str) -> DiscoveryFuture<'a, Option<FunctionSpec>> {
        let found = self.functions.get(name).map(|f| f.spec.clone());
        Box::pin(async move { Ok(found) })
    }

    fn list_by_category<'a>(
        &'a self,
        category: &'a str,
        page: PageRequest,
    ) -> DiscoveryFuture<'a, Page<FunctionSpec>> {
        let matching: Vec<FunctionSpec> = self
            .specs()
            .into_iter()
            .filter(|s| s.category == category)
            .collect();
        Box::pin(async move { Ok(Page::slice(matching, page)) })
    }

    fn list_categories(&self) -> DiscoveryFuture<'_, Vec<String>> {
        let categories: BTreeSet<String> = self
            .functions
            .values()
            .map(|f| f.spec.category.clone())
            .collect();
        Box::pin(async move { Ok(categories.into_iter().collect()) })
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        page: PageRequest,
    ) -> DiscoveryFuture<'a, Page<FunctionSpec>> {
        let needle = query.to_lowercase();
        let matching: Vec<FunctionSpec> = self
            .specs()
            .into_iter()
            .filter(|s| {
                s.name.to_lowercase().contains(&needle)
                    || s.description.to_lowercase().contains(&needle)
            })
            .collect();
        Box::pin(async move { Ok(Page::slice(matching, page)) })
    }

    fn execute<'a>(&'a self, tool: &'a ToolId, params: &'a Value) -> ExecuteFuture<'a> {
        Box::pin(async move {
            let function = match self.functions.get(&tool.function) {
                Some(f) if f.spec.category == tool.category => f,
                _ => return Ok(wrap_error(&tool.function, &format!("unknown function '{tool}'"))),
            };
            match (function.handler)(params.clone()).await {
                Ok(value) => Ok(wrap_payload(&tool.function, &normalize_payload(value))),
                Err(e) => Ok(wrap_error(&tool.function, &e)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{collect_catalog, resolve, tools_summary, unwrap_payload};

    fn registry() -> LocalToolRegistry {
        let search = FunctionSpec::new("weather", "search", "Look up a forecast")
            .param("city", ParamSpec::required("str"));
        LocalToolRegistry::new()
            .with(LocalFunction::new(search, |params: Value| async move {
                match params["city"].as_str() {
                    Some("Tokyo") => Ok(json!({"rain_chance": 75})),
                    Some(other) => Err(format!("no forecast for {other}")),
                    None => Err("city missing".into()),
                }
            }))
            .with_calculator()
    }

    #[tokio::test]
    async fn discovery_operations() {
        let reg = registry();
        assert_eq!(reg.list_categories().await.unwrap(), vec!["calc", "weather"]);

        let all = reg.list_functions(PageRequest::first(1)).await.unwrap();
        assert_eq!(all.items.len(), 1);
        assert_eq!(all.total, 2);
        assert_eq!(collect_catalog(&reg).await.unwrap().len(), 2);

        let weather = reg
            .list_by_category("weather", PageRequest::default())
            .await
            .unwrap();
        assert_eq!(weather.items[0].name, "search");

        let hits = reg.search("FORECAST", PageRequest::default()).await.unwrap();
        assert_eq!(hits.total, 1);

        let summary = tools_summary(&reg).await.unwrap();
        assert!(summary.contains("## calc"));
        assert!(summary.contains("- search(city: str): Look up a forecast"));
    }

    #[tokio::test]
    async fn resolve_checks_category() {
        let reg = registry();
        assert!(resolve(&reg, &ToolId::new("weather", "search")).await.is_ok());
        assert!(resolve(&reg, &ToolId::new("calc", "search")).await.is_err());
        assert!(resolve(&reg, &ToolId::new("unknown", "func")).await.is_err());
    }

    #[tokio::test]
    async fn execute_wraps_payload_and_errors() {
        let reg = registry();
        let tool = ToolId::new("weather", "search");

        let raw = reg.execute(&tool, &json!({"city": "Tokyo"})).await.unwrap();
        let payload = unwrap_payload(&raw, &tool).unwrap();
        assert_eq!(payload["rain_chance"], 75);
        assert_eq!(payload["success"], true);

        let raw = reg.execute(&tool, &json!({"city": "Oslo"})).await.unwrap();
        assert_eq!(raw["success"], false);
        assert!(unwrap_payload(&raw, &tool).is_err());
    }

    #[tokio::test]
    async fn calculator_evaluates_comparison() {
        let reg = registry();
        let tool = ToolId::new("calc", "evaluate");
        let raw = reg.execute(&tool, &json!({"expr": "75 > 50"})).await.unwrap();
        let payload = unwrap_payload(&raw, &tool).unwrap();
        assert_eq!(payload["result"], true);

        let raw = reg
            .execute(&tool, &json!({"expr": "rain * 2", "variables": {"rain": 21}}))
            .await
            .unwrap();
        assert_eq!(unwrap_payload(&raw, &tool).unwrap()["result"], 42.0);
    }

    #[tokio::test]
    async fn typed_functions_reject_bad_parameters() {
        #[derive(serde::Deserialize)]
        struct Args {
            n: i64,
        }
        let spec = FunctionSpec::new("math", "double", "Double a number")
            .param("n", ParamSpec::required("int"));
        let reg = LocalToolRegistry::new().with(LocalFunction::typed(spec, |args: Args| async move {
            Ok(json!(args.n * 2))
        }));
        let tool = ToolId::new("math", "double");

        let raw = reg.execute(&tool, &json!({"n": 4})).await.unwrap();
        assert_eq!(unwrap_payload(&raw, &tool).unwrap()["value"], 8);

        let raw = reg.execute(&tool, &json!({"n": "four"})).await.unwrap();
        assert_eq!(raw["success"], false);
    }
}
