//! Router assembly: module mounts, middleware and the merged OpenAPI document.

use std::time::Duration;

use axum::{routing::get, Router};
use serde_json::{json, Map, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};

use shelfswap_kernel::ModuleRegistry;

use crate::MakeRequestUuidV7;

const API_TITLE: &str = "ShelfSwap API";
const API_VERSION: &str = "1.0.0";

pub struct RouterBuilder {
    router: Router,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
        }
    }

    pub fn route(mut self, path: &str, route: axum::routing::MethodRouter) -> Self {
        self.router = self.router.route(path, route);
        self
    }

    /// Mount a module's router under `/api/{module_name}`
    pub fn mount_module(mut self, module_name: &str, module_router: Router) -> Self {
        self.router = self.router.nest(&format!("/api/{module_name}"), module_router);
        self
    }

    pub fn with_tracing(mut self) -> Self {
        self.router = self.router.layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_request(DefaultOnRequest::new().level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        );
        self
    }

    pub fn with_cors(mut self) -> Self {
        self.router = self.router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
        self
    }

    /// Stamp each request with a UUIDv7 id and echo it on the response
    pub fn with_request_id(mut self) -> Self {
        self.router = self
            .router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7));
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.router = self
            .router
            .layer(TimeoutLayer::new(Duration::from_millis(timeout_ms)));
        self
    }

    /// Serve the merged document at `/docs/openapi.json` and a Swagger UI
    /// at `/swagger-ui`.
    pub fn with_openapi(mut self, registry: &ModuleRegistry) -> Self {
        let document = openapi_document(registry);

        match serde_json::from_value::<utoipa::openapi::OpenApi>(document.clone()) {
            Ok(openapi) => {
                self.router = self.router.merge(
                    utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                        .url("/api-docs/openapi.json", openapi),
                );
            }
            Err(e) => tracing::warn!(error = %e, "merged OpenAPI document rejected, swagger UI disabled"),
        }

        self.router = self.router.route(
            "/docs/openapi.json",
            get(move || {
                let document = document.clone();
                async move { axum::Json(document) }
            }),
        );
        self
    }

    pub fn build(self) -> Router {
        self.router
    }
}

impl Default for RouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Base document plus every module's paths (prefixed with the module's
/// mount point) and component schemas.
pub fn openapi_document(registry: &ModuleRegistry) -> Value {
    let mut paths = Map::new();
    paths.insert(
        "/healthz".to_string(),
        json!({
            "get": {
                "summary": "Liveness check",
                "responses": { "200": { "description": "Service is up" } }
            }
        }),
    );

    let mut schemas = Map::new();
    schemas.insert("ErrorResponse".to_string(), error_response_schema());

    for module in registry.modules() {
        let Some(spec) = module.openapi() else { continue };

        if let Some(module_paths) = spec.get("paths").and_then(Value::as_object) {
            for (path, item) in module_paths {
                let mounted = match path.as_str() {
                    "/" => format!("/api/{}", module.name()),
                    _ => format!("/api/{}{}", module.name(), path),
                };
                paths.insert(mounted, item.clone());
            }
        }
        if let Some(module_schemas) = spec
            .pointer("/components/schemas")
            .and_then(Value::as_object)
        {
            for (name, schema) in module_schemas {
                if schemas.insert(name.clone(), schema.clone()).is_some() {
                    tracing::debug!(module = module.name(), schema = %name, "schema redefined");
                }
            }
        }
    }

    json!({
        "openapi": "3.0.3",
        "info": {
            "title": API_TITLE,
            "version": API_VERSION,
            "description": "Book registry, swap requests and notifications"
        },
        "paths": paths,
        "components": { "schemas": schemas }
    })
}

/// Envelope every error response is wrapped in.
fn error_response_schema() -> Value {
    let string = json!({ "type": "string" });
    json!({
        "type": "object",
        "required": ["error"],
        "properties": {
            "error": {
                "type": "object",
                "required": ["code", "message", "details", "trace_id", "timestamp"],
                "properties": {
                    "code": {
                        "type": "string",
                        "enum": [
                            "validation_error", "conflict", "invalid_state", "not_found",
                            "unauthorized", "forbidden", "bad_request", "internal_error"
                        ]
                    },
                    "message": string.clone(),
                    "details": { "type": "array", "items": { "type": "object" } },
                    "trace_id": string.clone(),
                    "timestamp": string
                }
            }
        }
    })
}
