pub mod models;
pub mod repo;
pub mod routes;
pub mod service;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use serde_json::json;
use shelfswap_kernel::{InitCtx, Migration, Module};

pub use service::BookRegistry;

/// Book listings and the availability flag the swap engine relies on.
pub struct BooksModule {
    registry: BookRegistry,
}

impl BooksModule {
    pub fn new(registry: BookRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Module for BooksModule {
    fn name(&self) -> &'static str {
        "books"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            "books module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.registry.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        let error = json!({"application/json": {"schema": {"$ref": "#/components/schemas/ErrorResponse"}}});
        let book = json!({"application/json": {"schema": {"$ref": "#/components/schemas/Book"}}});
        let books = json!({"application/json": {"schema": {
            "type": "array",
            "items": {"$ref": "#/components/schemas/Book"}
        }}});
        let id_param = json!([{"name": "id", "in": "path", "required": true, "schema": {"type": "string"}}]);

        Some(json!({
            "paths": {
                "/": {
                    "get": {
                        "summary": "Discover books on offer from other users",
                        "tags": ["Books"],
                        "responses": {"200": {"description": "Discoverable books", "content": books.clone()}}
                    },
                    "post": {
                        "summary": "List a new book",
                        "tags": ["Books"],
                        "requestBody": {
                            "required": true,
                            "content": {"application/json": {"schema": {"$ref": "#/components/schemas/NewBook"}}}
                        },
                        "responses": {
                            "201": {"description": "Created", "content": book.clone()},
                            "422": {"description": "Validation error", "content": error.clone()}
                        }
                    }
                },
                "/mine": {
                    "get": {
                        "summary": "Books the caller owns",
                        "tags": ["Books"],
                        "responses": {"200": {"description": "Owned books", "content": books.clone()}}
                    }
                },
                "/offerable": {
                    "get": {
                        "summary": "The caller's books that can go into an offer",
                        "tags": ["Books"],
                        "responses": {"200": {"description": "Offerable books", "content": books}}
                    }
                },
                "/{id}": {
                    "get": {
                        "summary": "Get a book",
                        "tags": ["Books"],
                        "parameters": id_param.clone(),
                        "responses": {
                            "200": {"description": "Book", "content": book.clone()},
                            "404": {"description": "Not found", "content": error.clone()}
                        }
                    },
                    "patch": {
                        "summary": "Edit a book's details",
                        "tags": ["Books"],
                        "parameters": id_param.clone(),
                        "requestBody": {
                            "content": {"application/json": {"schema": {"$ref": "#/components/schemas/BookPatch"}}}
                        },
                        "responses": {
                            "200": {"description": "Updated book", "content": book.clone()},
                            "403": {"description": "Not the owner", "content": error.clone()},
                            "404": {"description": "Not found", "content": error.clone()}
                        }
                    },
                    "delete": {
                        "summary": "Remove a listing",
                        "tags": ["Books"],
                        "parameters": id_param.clone(),
                        "responses": {
                            "204": {"description": "Deleted"},
                            "409": {"description": "Referenced by an open swap request", "content": error.clone()}
                        }
                    }
                },
                "/{id}/availability": {
                    "put": {
                        "summary": "Owner's manual availability toggle",
                        "tags": ["Books"],
                        "parameters": id_param,
                        "requestBody": {
                            "required": true,
                            "content": {"application/json": {"schema": {
                                "type": "object",
                                "properties": {"is_available": {"type": "boolean"}},
                                "required": ["is_available"]
                            }}}
                        },
                        "responses": {
                            "200": {"description": "Updated book", "content": book},
                            "403": {"description": "Not the owner", "content": error.clone()},
                            "409": {"description": "Held by an open swap request", "content": error}
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "BookCondition": {
                        "type": "string",
                        "enum": ["LIKE_NEW", "VERY_GOOD", "GOOD", "FAIR", "POOR"]
                    },
                    "Book": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "owner_id": {"type": "string"},
                            "title": {"type": "string"},
                            "authors": {"type": "array", "items": {"type": "string"}},
                            "condition": {"$ref": "#/components/schemas/BookCondition"},
                            "description": {"type": "string", "nullable": true},
                            "is_available": {"type": "boolean"},
                            "created_at": {"type": "string", "format": "date-time"},
                            "updated_at": {"type": "string", "format": "date-time"}
                        },
                        "required": ["id", "owner_id", "title", "authors", "condition", "is_available", "created_at", "updated_at"]
                    },
                    "NewBook": {
                        "type": "object",
                        "properties": {
                            "title": {"type": "string", "maxLength": 300},
                            "authors": {"type": "array", "items": {"type": "string"}, "minItems": 1},
                            "condition": {"$ref": "#/components/schemas/BookCondition"},
                            "description": {"type": "string", "maxLength": 5000}
                        },
                        "required": ["title", "authors", "condition"]
                    },
                    "BookPatch": {
                        "type": "object",
                        "properties": {
                            "title": {"type": "string"},
                            "authors": {"type": "array", "items": {"type": "string"}},
                            "condition": {"$ref": "#/components/schemas/BookCondition"},
                            "description": {"type": "string"}
                        }
                    }
                }
            }
        }))
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![Migration {
            id: "001_init",
            up: r#"
                CREATE TABLE books (
                    id           TEXT PRIMARY KEY,
                    owner_id     TEXT NOT NULL,
                    title        TEXT NOT NULL CHECK (title <> ''),
                    authors      TEXT NOT NULL,
                    condition    TEXT NOT NULL
                        CHECK (condition IN ('LIKE_NEW', 'VERY_GOOD', 'GOOD', 'FAIR', 'POOR')),
                    description  TEXT,
                    is_available INTEGER NOT NULL DEFAULT 1,
                    created_at   TEXT NOT NULL,
                    updated_at   TEXT NOT NULL
                );
                CREATE INDEX books_owner ON books (owner_id, is_available);
                CREATE INDEX books_available ON books (is_available, created_at);
                "#,
        }]
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "books module stopped");
        Ok(())
    }
}

/// Create a new instance of the books module
pub fn create_module(registry: BookRegistry) -> Arc<dyn Module> {
    Arc::new(BooksModule::new(registry))
}
