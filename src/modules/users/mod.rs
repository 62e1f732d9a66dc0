pub mod models;
pub mod repo;
pub mod routes;
pub mod service;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use serde_json::json;
use shelfswap_kernel::{InitCtx, Migration, Module};

pub use service::ProfileService;

/// Public profiles: usernames and display names shown next to swaps.
pub struct UsersModule {
    service: ProfileService,
}

impl UsersModule {
    pub fn new(service: ProfileService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Module for UsersModule {
    fn name(&self) -> &'static str {
        "users"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            "users module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.service.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(json!({
            "paths": {
                "/me": {
                    "get": {
                        "summary": "Current user's profile",
                        "tags": ["Users"],
                        "responses": {
                            "200": {
                                "description": "Profile",
                                "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Profile"}}}
                            },
                            "404": {
                                "description": "No profile saved yet",
                                "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ErrorResponse"}}}
                            }
                        }
                    },
                    "put": {
                        "summary": "Create or update the current user's profile",
                        "tags": ["Users"],
                        "requestBody": {
                            "required": true,
                            "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ProfileUpdate"}}}
                        },
                        "responses": {
                            "200": {
                                "description": "Saved profile",
                                "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Profile"}}}
                            },
                            "409": {
                                "description": "Username taken",
                                "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ErrorResponse"}}}
                            },
                            "422": {
                                "description": "Validation error",
                                "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ErrorResponse"}}}
                            }
                        }
                    }
                },
                "/{id}": {
                    "get": {
                        "summary": "Public summary of a user",
                        "tags": ["Users"],
                        "parameters": [{"name": "id", "in": "path", "required": true, "schema": {"type": "string"}}],
                        "responses": {
                            "200": {
                                "description": "Profile summary",
                                "content": {"application/json": {"schema": {"$ref": "#/components/schemas/ProfileSummary"}}}
                            }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Profile": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "username": {"type": "string"},
                            "display_name": {"type": "string", "nullable": true},
                            "created_at": {"type": "string", "format": "date-time"},
                            "updated_at": {"type": "string", "format": "date-time"}
                        },
                        "required": ["id", "username", "created_at", "updated_at"]
                    },
                    "ProfileUpdate": {
                        "type": "object",
                        "properties": {
                            "username": {"type": "string", "minLength": 3, "maxLength": 32},
                            "display_name": {"type": "string", "maxLength": 80}
                        },
                        "required": ["username"]
                    },
                    "ProfileSummary": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "username": {"type": "string", "nullable": true},
                            "display_name": {"type": "string"}
                        },
                        "required": ["id", "display_name"]
                    }
                }
            }
        }))
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![Migration {
            id: "001_init",
            up: r#"
                CREATE TABLE profiles (
                    id           TEXT PRIMARY KEY,
                    username     TEXT NOT NULL,
                    display_name TEXT,
                    created_at   TEXT NOT NULL,
                    updated_at   TEXT NOT NULL
                );
                CREATE UNIQUE INDEX profiles_username_unique ON profiles (username COLLATE NOCASE);
                "#,
        }]
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "users module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "users module stopped");
        Ok(())
    }
}

/// Create a new instance of the users module
pub fn create_module(service: ProfileService) -> Arc<dyn Module> {
    Arc::new(UsersModule::new(service))
}
