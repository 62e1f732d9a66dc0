//! Swap requests: the state machine, its book side effects and the
//! notifications each transition produces.

pub mod engine;
pub mod models;
pub mod repo;
pub mod routes;
pub mod state;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use serde_json::json;
use shelfswap_kernel::{InitCtx, Migration, Module};

pub use engine::SwapEngine;
pub use models::{SwapEvent, SwapRequest, SwapStatus};
pub use state::{SwapCommand, Transition};

pub struct SwapsModule {
    engine: SwapEngine,
}

impl SwapsModule {
    pub fn new(engine: SwapEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Module for SwapsModule {
    fn name(&self) -> &'static str {
        "swaps"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            subscribers = self.engine.events().subscriber_count(),
            "swaps module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.engine.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        let error = json!({"application/json": {"schema": {"$ref": "#/components/schemas/ErrorResponse"}}});
        let request = json!({"application/json": {"schema": {"$ref": "#/components/schemas/SwapRequest"}}});
        let id_param = json!([{"name": "id", "in": "path", "required": true, "schema": {"type": "string"}}]);
        let transition = |summary: &str, body: Option<&str>| {
            let mut op = json!({
                "summary": summary,
                "tags": ["Swaps"],
                "parameters": id_param.clone(),
                "responses": {
                    "200": {"description": "Updated swap request", "content": request.clone()},
                    "403": {"description": "Actor lacks the role for this transition", "content": error.clone()},
                    "404": {"description": "Unknown request, or caller is not a party", "content": error.clone()},
                    "409": {"description": "Illegal in the current state, or lost a race", "content": error.clone()},
                    "422": {"description": "Validation error", "content": error.clone()}
                }
            });
            if let Some(schema) = body {
                op["requestBody"] = json!({
                    "content": {"application/json": {"schema": {"$ref": format!("#/components/schemas/{schema}")}}}
                });
            }
            json!({"post": op})
        };

        Some(json!({
            "paths": {
                "/": {
                    "get": {
                        "summary": "The caller's incoming and outgoing requests",
                        "tags": ["Swaps"],
                        "responses": {"200": {"description": "Requests joined with books and profiles"}}
                    },
                    "post": {
                        "summary": "Request a book, optionally offering one of yours",
                        "tags": ["Swaps"],
                        "requestBody": {
                            "required": true,
                            "content": {"application/json": {"schema": {"$ref": "#/components/schemas/CreateSwapRequest"}}}
                        },
                        "responses": {
                            "201": {"description": "Created", "content": request.clone()},
                            "404": {"description": "Unknown book", "content": error.clone()},
                            "409": {"description": "A book is unavailable", "content": error.clone()},
                            "422": {"description": "Validation error", "content": error.clone()}
                        }
                    }
                },
                "/commands": {
                    "post": {
                        "summary": "Run a tagged swap command",
                        "tags": ["Swaps"],
                        "requestBody": {
                            "required": true,
                            "content": {"application/json": {"schema": {"$ref": "#/components/schemas/SwapCommand"}}}
                        },
                        "responses": {
                            "200": {"description": "Resulting swap request", "content": request.clone()},
                            "409": {"description": "Conflict or invalid state", "content": error.clone()}
                        }
                    }
                },
                "/stats": {
                    "get": {
                        "summary": "Swap statistics for the caller",
                        "tags": ["Swaps"],
                        "responses": {"200": {"description": "Statistics"}}
                    }
                },
                "/{id}": {
                    "get": {
                        "summary": "One swap request, visible to its parties",
                        "tags": ["Swaps"],
                        "parameters": id_param.clone(),
                        "responses": {
                            "200": {"description": "Swap request with joined views"},
                            "404": {"description": "Not found", "content": error.clone()}
                        }
                    }
                },
                "/{id}/counter-offer": transition("Owner proposes a different book", Some("CounterOffer")),
                "/{id}/accept": transition("Accept a pending request or a counter-offer", None),
                "/{id}/cancel": transition("Withdraw before acceptance", None),
                "/{id}/complete": transition("Confirm your side of the exchange", Some("Complete"))
            },
            "components": {
                "schemas": {
                    "SwapRequest": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "requester_id": {"type": "string"},
                            "owner_id": {"type": "string"},
                            "book_id": {"type": "string"},
                            "offered_book_id": {"type": "string", "nullable": true},
                            "counter_offered_book_id": {"type": "string", "nullable": true},
                            "status": {
                                "type": "string",
                                "enum": ["PENDING", "COUNTER_OFFER", "ACCEPTED", "COMPLETED", "CANCELLED"]
                            },
                            "message": {"type": "string", "nullable": true},
                            "counter_offer_message": {"type": "string", "nullable": true},
                            "requester_completed_at": {"type": "string", "format": "date-time", "nullable": true},
                            "owner_completed_at": {"type": "string", "format": "date-time", "nullable": true},
                            "requester_rating": {"type": "integer", "minimum": 1, "maximum": 5, "nullable": true},
                            "owner_rating": {"type": "integer", "minimum": 1, "maximum": 5, "nullable": true},
                            "version": {"type": "integer"},
                            "created_at": {"type": "string", "format": "date-time"},
                            "updated_at": {"type": "string", "format": "date-time"}
                        },
                        "required": ["id", "requester_id", "owner_id", "book_id", "status", "version", "created_at", "updated_at"]
                    },
                    "CreateSwapRequest": {
                        "type": "object",
                        "properties": {
                            "book_id": {"type": "string"},
                            "offered_book_id": {"type": "string"},
                            "message": {"type": "string", "maxLength": 1000}
                        },
                        "required": ["book_id"]
                    },
                    "CounterOffer": {
                        "type": "object",
                        "properties": {
                            "counter_offered_book_id": {"type": "string"},
                            "message": {"type": "string", "maxLength": 1000}
                        },
                        "required": ["counter_offered_book_id"]
                    },
                    "Complete": {
                        "type": "object",
                        "properties": {
                            "rating": {"type": "integer", "minimum": 1, "maximum": 5},
                            "feedback": {"type": "string", "maxLength": 2000}
                        }
                    },
                    "SwapCommand": {
                        "type": "object",
                        "properties": {
                            "type": {"type": "string", "enum": ["create", "counter_offer", "accept", "cancel", "complete"]},
                            "request_id": {"type": "string"}
                        },
                        "required": ["type"]
                    }
                }
            }
        }))
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![Migration {
            id: "001_init",
            up: repo::SCHEMA,
        }]
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "swaps module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "swaps module stopped");
        Ok(())
    }
}

/// Create a new instance of the swaps module
pub fn create_module(engine: SwapEngine) -> Arc<dyn Module> {
    Arc::new(SwapsModule::new(engine))
}
