//! HTTP/REST runtime.
//!
//! A stage carrying a materializer issues one request; the same-runtime
//! descendants it claims read their fields from that response instead of
//! calling the backend again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use tg_util::{decode_base64_text, fill_path_template, placeholders};
use tracing::{debug, warn};
use url::Url;

use super::{MaterializeContext, Runtime, RuntimeInit, RuntimeState, Waitlist, collect_relative_stages, log_materialized};
use crate::error::{ConfigError, PlanError};
use crate::materializer::MaterializedStage;
use crate::model::StageSpec;
use crate::resolver::{Batcher, ParentFieldResolver, Resolver, ResolverError, ResolverInput};
use crate::stage::field_name;

const DEFAULT_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    fn as_method(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    /// GET and DELETE carry their arguments in the query string.
    fn sends_body(self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }
}

/// Per-stage request description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpMaterializer {
    pub method: HttpMethod,
    /// Request path relative to the runtime endpoint, with `{name}` placeholders.
    pub path: String,
    pub content_type: Option<String>,
    /// Arguments starting with this prefix are sent as headers.
    pub header_prefix: Option<String>,
    /// For body-carrying methods, arguments sent in the query string instead.
    pub query_fields: Option<Vec<String>>,
    /// Argument name to request parameter name.
    pub rename_fields: IndexMap<String, String>,
    /// For body-carrying methods, restrict the body to these arguments.
    pub body_fields: Option<Vec<String>>,
    /// Argument whose value is sent as a bearer token.
    pub auth_token_field: Option<String>,
}

/// A request ready to be sent, independent of any client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<JsonMap<String, Value>>,
    pub bearer_token: Option<String>,
}

impl HttpMaterializer {
    /// Place `args` into path, headers, query and body.
    ///
    /// Path placeholders are filled from the arguments first and then from
    /// fields of the parent instance.
    pub fn prepare(&self, args: &JsonMap<String, Value>, parent: Option<&Value>) -> PreparedRequest {
        let mut remaining = JsonMap::new();
        for (name, value) in args {
            let target = self.rename_fields.get(name).cloned().unwrap_or_else(|| name.clone());
            remaining.insert(target, value.clone());
        }

        let bearer_token = self
            .auth_token_field
            .as_ref()
            .and_then(|field| remaining.remove(field))
            .map(value_to_string);

        let mut headers = Vec::new();
        if let Some(prefix) = self.header_prefix.as_deref().filter(|prefix| !prefix.is_empty()) {
            let header_names: Vec<String> = remaining.keys().filter(|name| name.starts_with(prefix)).cloned().collect();
            for name in header_names {
                if let Some(value) = remaining.remove(&name) {
                    headers.push((name[prefix.len()..].to_string(), value_to_string(value)));
                }
            }
        }

        let (path, consumed) = fill_path_template(&self.path, &remaining);
        for name in consumed {
            remaining.remove(&name);
        }
        let path = match parent.and_then(Value::as_object) {
            Some(fields) if !placeholders(&path).is_empty() => fill_path_template(&path, fields).0,
            _ => path,
        };

        let mut query = Vec::new();
        let body = if self.method.sends_body() {
            for field in self.query_fields.iter().flatten() {
                if let Some(value) = remaining.remove(field) {
                    push_query_pairs(&mut query, field.clone(), value);
                }
            }
            let body = match &self.body_fields {
                Some(fields) => fields
                    .iter()
                    .filter_map(|field| remaining.get(field).map(|value| (field.clone(), value.clone())))
                    .collect(),
                None => remaining,
            };
            Some(body)
        } else {
            for (name, value) in remaining {
                push_query_pairs(&mut query, name, value);
            }
            None
        };

        PreparedRequest {
            method: self.method,
            path,
            headers,
            query,
            body,
            bearer_token,
        }
    }
}

fn push_query_pairs(pairs: &mut Vec<(String, String)>, name: String, value: Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                pairs.push((name.clone(), value_to_string(item)));
            }
        }
        Value::Null => {}
        other => pairs.push((name, value_to_string(other))),
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

#[derive(Clone)]
struct BasicAuth {
    username: String,
    password: Option<String>,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug)]
pub struct HttpRuntime {
    name: String,
    endpoint: Url,
    client: Client,
    basic_auth: Option<BasicAuth>,
    state: RuntimeState,
}

impl HttpRuntime {
    pub const KIND: &'static str = "http";

    /// Build from `endpoint`, optional `basic_auth_secret` and optional `timeout_ms`.
    pub fn init(init: RuntimeInit<'_>) -> Result<Arc<dyn Runtime>, ConfigError> {
        let invalid = |name: &str, reason: String| ConfigError::InvalidParameter {
            runtime: init.name.to_string(),
            name: name.to_string(),
            reason,
        };

        let endpoint = init.required_str("endpoint")?;
        let endpoint = Url::parse(endpoint).map_err(|error| invalid("endpoint", error.to_string()))?;

        let basic_auth = match init.optional_str("basic_auth_secret")? {
            Some(key) => {
                let encoded = init.secret(key)?;
                let decoded = decode_base64_text(&encoded)?;
                let (username, password) = match decoded.split_once(':') {
                    Some((username, password)) => (username.to_string(), Some(password.to_string())),
                    None => (decoded, None),
                };
                Some(BasicAuth { username, password })
            }
            None => None,
        };

        let mut builder = Client::builder();
        if let Some(timeout_ms) = init.optional_u64("timeout_ms")? {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder.build().map_err(|error| invalid("endpoint", error.to_string()))?;

        debug!(
            runtime = %init.name,
            endpoint = %endpoint,
            basic_auth = basic_auth.is_some(),
            "http runtime initialized"
        );
        Ok(Arc::new(Self {
            name: init.name.to_string(),
            endpoint,
            client,
            basic_auth,
            state: RuntimeState::default(),
        }))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn materialize_one(&self, stage: &StageSpec, context: &MaterializeContext) -> Result<MaterializedStage, PlanError> {
        let is_list = context.types.is_list(stage.out_type).map_err(|source| PlanError::Type {
            stage: stage.id.clone(),
            source,
        })?;

        let resolver: Arc<dyn Resolver> = match &stage.materializer {
            Some(raw) => {
                let materializer: HttpMaterializer = serde_json::from_value(raw.clone()).map_err(|error| ConfigError::InvalidMaterializer {
                    stage: stage.id.clone(),
                    reason: error.to_string(),
                })?;
                Arc::new(HttpRequestResolver {
                    runtime: self.name.clone(),
                    client: self.client.clone(),
                    endpoint: self.endpoint.clone(),
                    basic_auth: self.basic_auth.clone(),
                    materializer,
                })
            }
            None => Arc::new(ParentFieldResolver::new(field_name(&stage.id))),
        };

        let batcher = if is_list { Batcher::Flatten } else { Batcher::Identity };
        Ok(MaterializedStage::from_spec(stage, resolver).with_batcher(batcher))
    }
}

impl Runtime for HttpRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn materialize(
        &self,
        stage: &StageSpec,
        waitlist: &mut Waitlist,
        context: &MaterializeContext,
    ) -> Result<Vec<MaterializedStage>, PlanError> {
        self.state.ensure_active(&self.name)?;

        let primary = self.materialize_one(stage, context)?;
        let relatives = collect_relative_stages(stage, waitlist);
        let mut produced = Vec::with_capacity(1 + relatives.len());
        produced.push(primary);
        for relative in &relatives {
            let dependent = self.materialize_one(relative, context)?.depending_on(&stage.id);
            produced.push(dependent);
        }

        log_materialized(&self.name, &produced, context.verbose);
        Ok(produced)
    }

    fn release(&self) {
        if self.state.release() {
            debug!(runtime = %self.name, "http runtime released");
        }
    }

    fn is_released(&self) -> bool {
        self.state.is_released()
    }
}

struct HttpRequestResolver {
    runtime: String,
    client: Client,
    endpoint: Url,
    basic_auth: Option<BasicAuth>,
    materializer: HttpMaterializer,
}

impl HttpRequestResolver {
    fn url(&self, path: &str) -> String {
        let base = self.endpoint.as_str().trim_end_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path.trim_start_matches('/'))
        }
    }

    async fn send(&self, request: PreparedRequest) -> Result<Value, ResolverError> {
        let start = Instant::now();
        let url = self.url(&request.path);
        let method = request.method.as_method();
        debug!(runtime = %self.runtime, method = %method, url = %url, "http request started");

        let mut builder = self.client.request(method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &request.bearer_token {
            builder = builder.bearer_auth(token);
        } else if let Some(auth) = &self.basic_auth {
            builder = builder.basic_auth(&auth.username, auth.password.as_ref());
        }
        if let Some(body) = &request.body {
            let content_type = self.materializer.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
            builder = builder.header(CONTENT_TYPE, content_type).body(Value::Object(body.clone()).to_string());
        }

        let response = builder.send().await.map_err(|error| ResolverError::Backend(error.to_string()))?;
        let status = response.status();
        let text = response.text().await.map_err(|error| ResolverError::Backend(error.to_string()))?;

        if !status.is_success() {
            warn!(
                runtime = %self.runtime,
                method = %method,
                url = %url,
                status = %status,
                duration_ms = start.elapsed().as_millis(),
                "http request failed"
            );
            return Err(ResolverError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        debug!(
            runtime = %self.runtime,
            method = %method,
            url = %url,
            status = %status,
            duration_ms = start.elapsed().as_millis(),
            "http request completed"
        );

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|error| ResolverError::InvalidResponse(error.to_string()))
    }
}

#[async_trait]
impl Resolver for HttpRequestResolver {
    async fn resolve(&self, input: ResolverInput) -> Result<Value, ResolverError> {
        let request = self.materializer.prepare(&input.args, input.parent.as_ref());
        tokio::select! {
            biased;
            _ = input.cancellation.cancelled() => Err(ResolverError::Cancelled),
            result = self.send(request) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tg_util::{MapSecretProvider, encode_base64};

    fn args(value: Value) -> JsonMap<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn get_sends_leftover_arguments_as_query() {
        let materializer: HttpMaterializer = serde_json::from_value(json!({
            "path": "/users/{id}/posts",
            "header_prefix": "header_",
            "auth_token_field": "token",
            "rename_fields": {"size": "per_page"}
        }))
        .expect("materializer");

        let request = materializer.prepare(
            &args(json!({"id": 7, "header_x-trace": "abc", "token": "t", "size": 20, "tags": ["a", "b"]})),
            None,
        );

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.path, "/users/7/posts");
        assert_eq!(request.headers, vec![("x-trace".to_string(), "abc".to_string())]);
        assert_eq!(request.bearer_token.as_deref(), Some("t"));
        assert_eq!(
            request.query,
            vec![
                ("per_page".to_string(), "20".to_string()),
                ("tags".to_string(), "a".to_string()),
                ("tags".to_string(), "b".to_string()),
            ]
        );
        assert!(request.body.is_none());
    }

    #[test]
    fn post_splits_query_and_body_fields() {
        let materializer: HttpMaterializer = serde_json::from_value(json!({
            "method": "POST",
            "path": "/orgs/{org}/users",
            "query_fields": ["dry_run"],
            "body_fields": ["name"]
        }))
        .expect("materializer");

        let request = materializer.prepare(&args(json!({"dry_run": true, "name": "ada", "ignored": 1})), Some(&json!({"org": "acme"})));

        assert_eq!(request.path, "/orgs/acme/users");
        assert_eq!(request.query, vec![("dry_run".to_string(), "true".to_string())]);
        assert_eq!(request.body, Some(args(json!({"name": "ada"}))));
    }

    #[test]
    fn rejects_unknown_materializer_options() {
        let result = serde_json::from_value::<HttpMaterializer>(json!({"path": "/x", "verb": "GET"}));
        assert!(result.is_err());
    }

    #[test]
    fn init_requires_valid_endpoint() {
        let secrets = MapSecretProvider::new();
        let missing = json!({});
        let error = HttpRuntime::init(RuntimeInit::new("users", missing.as_object().expect("object"), &secrets)).expect_err("missing endpoint");
        assert!(matches!(error, ConfigError::MissingParameter { ref name, .. } if name == "endpoint"));

        let invalid = json!({"endpoint": "not a url"});
        let error = HttpRuntime::init(RuntimeInit::new("users", invalid.as_object().expect("object"), &secrets)).expect_err("bad endpoint");
        assert!(matches!(error, ConfigError::InvalidParameter { .. }));
    }

    #[test]
    fn init_decodes_basic_auth_secret() {
        let params = json!({"endpoint": "http://127.0.0.1:9/api", "basic_auth_secret": "basic", "timeout_ms": 500});
        let params = params.as_object().expect("object");

        let secrets = MapSecretProvider::new().with_secret("users", "basic", encode_base64("ada:lovelace"));
        let runtime = HttpRuntime::init(RuntimeInit::new("users", params, &secrets)).expect("runtime");
        assert_eq!(runtime.kind(), "http");
        assert!(format!("{runtime:?}").contains("[REDACTED]"));
        assert!(!format!("{runtime:?}").contains("lovelace"));

        let empty = MapSecretProvider::new();
        let error = HttpRuntime::init(RuntimeInit::new("users", params, &empty)).expect_err("missing secret");
        assert!(error.to_string().contains("TG_USERS_BASIC"));

        let garbage = MapSecretProvider::new().with_secret("users", "basic", "%%%");
        let error = HttpRuntime::init(RuntimeInit::new("users", params, &garbage)).expect_err("bad secret");
        assert!(matches!(error, ConfigError::SecretEncoding(_)));
    }

    #[test]
    fn materializes_request_stage_with_field_dependents() {
        let params = json!({"endpoint": "http://127.0.0.1:9"});
        let secrets = MapSecretProvider::new();
        let runtime = HttpRuntime::init(RuntimeInit::new("api", params.as_object().expect("object"), &secrets)).expect("runtime");
        let types = serde_json::from_value(json!([
            {"kind": "list", "items": 1},
            {"kind": "struct", "properties": {"name": 2}},
            {"kind": "string"}
        ]))
        .expect("types");
        let context = MaterializeContext::new(Arc::new(types), false);

        let primary = StageSpec::new("users", "api", 0).with_materializer(json!({"path": "/users"}));
        let mut waitlist: Waitlist = vec![StageSpec::new("users.name", "api", 2)].into();
        let produced = runtime.materialize(&primary, &mut waitlist, &context).expect("materialize");

        assert_eq!(produced.len(), 2);
        assert_eq!(produced[0].batcher, Batcher::Flatten);
        assert_eq!(produced[1].batcher, Batcher::Identity);
        assert_eq!(produced[1].dependencies, vec!["users".to_string()]);
        assert!(waitlist.is_empty());

        let bad = StageSpec::new("broken", "api", 2).with_materializer(json!({"method": "FETCH"}));
        let error = runtime.materialize(&bad, &mut Waitlist::new(), &context).expect_err("invalid materializer");
        assert!(matches!(error, PlanError::Configuration(ConfigError::InvalidMaterializer { .. })));
    }

    #[tokio::test]
    async fn cancelled_request_returns_promptly() {
        let resolver = HttpRequestResolver {
            runtime: "api".into(),
            client: Client::new(),
            endpoint: Url::parse("http://10.255.255.1:81").expect("url"),
            basic_auth: None,
            materializer: HttpMaterializer::default(),
        };
        let input = ResolverInput::default();
        input.cancellation.cancel();
        let error = resolver.resolve(input).await.expect_err("cancelled");
        assert!(matches!(error, ResolverError::Cancelled));
    }
}
