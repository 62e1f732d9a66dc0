pub mod dispatcher;
pub mod models;
pub mod repo;
pub mod routes;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use serde_json::json;
use shelfswap_kernel::{InitCtx, Migration, Module};

pub use dispatcher::{Dispatcher, NotificationSink, StoreSink};
pub use service::NotificationService;

/// User-facing notifications produced by swap transitions.
/// How long shutdown waits for detached deliveries.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

pub struct NotificationsModule {
    service: NotificationService,
    dispatcher: Dispatcher,
}

impl NotificationsModule {
    pub fn new(service: NotificationService, dispatcher: Dispatcher) -> Self {
        Self {
            service,
            dispatcher,
        }
    }
}

#[async_trait]
impl Module for NotificationsModule {
    fn name(&self) -> &'static str {
        "notifications"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            detached = ctx.settings.notifications.detached,
            "notifications module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.service.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        let error = json!({"application/json": {"schema": {"$ref": "#/components/schemas/ErrorResponse"}}});
        let id_param = json!([{"name": "id", "in": "path", "required": true, "schema": {"type": "string"}}]);
        Some(json!({
            "paths": {
                "/": {
                    "get": {
                        "summary": "List the caller's notifications, newest first",
                        "tags": ["Notifications"],
                        "parameters": [{"name": "unread_only", "in": "query", "schema": {"type": "boolean"}}],
                        "responses": {
                            "200": {
                                "description": "Notifications",
                                "content": {"application/json": {"schema": {
                                    "type": "array",
                                    "items": {"$ref": "#/components/schemas/Notification"}
                                }}}
                            }
                        }
                    }
                },
                "/unread-count": {
                    "get": {
                        "summary": "Number of unread notifications",
                        "tags": ["Notifications"],
                        "responses": {"200": {"description": "Unread count"}}
                    }
                },
                "/read-all": {
                    "post": {
                        "summary": "Mark every notification read",
                        "tags": ["Notifications"],
                        "responses": {"200": {"description": "Number of notifications updated"}}
                    }
                },
                "/{id}/read": {
                    "post": {
                        "summary": "Mark one notification read",
                        "tags": ["Notifications"],
                        "parameters": id_param.clone(),
                        "responses": {
                            "200": {
                                "description": "Updated notification",
                                "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Notification"}}}
                            },
                            "404": {"description": "Not found", "content": error.clone()}
                        }
                    }
                },
                "/{id}": {
                    "delete": {
                        "summary": "Delete one notification",
                        "tags": ["Notifications"],
                        "parameters": id_param,
                        "responses": {
                            "204": {"description": "Deleted"},
                            "404": {"description": "Not found", "content": error}
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Notification": {
                        "type": "object",
                        "properties": {
                            "id": {"type": "string"},
                            "recipient_id": {"type": "string"},
                            "kind": {
                                "type": "string",
                                "enum": ["created", "accepted", "countered", "cancelled", "partially_completed", "completed"]
                            },
                            "request_id": {"type": "string"},
                            "payload": {
                                "type": "object",
                                "properties": {
                                    "requested_book_title": {"type": "string", "nullable": true},
                                    "offered_book_title": {"type": "string", "nullable": true},
                                    "actor_display_name": {"type": "string"}
                                }
                            },
                            "is_read": {"type": "boolean"},
                            "created_at": {"type": "string", "format": "date-time"}
                        },
                        "required": ["id", "recipient_id", "kind", "request_id", "payload", "is_read", "created_at"]
                    }
                }
            }
        }))
    }

    fn migrations(&self) -> Vec<Migration> {
        vec![Migration {
            id: "001_init",
            up: r#"
                CREATE TABLE notifications (
                    id           TEXT PRIMARY KEY,
                    recipient_id TEXT NOT NULL,
                    kind         TEXT NOT NULL,
                    request_id   TEXT NOT NULL,
                    payload      TEXT NOT NULL,
                    is_read      INTEGER NOT NULL DEFAULT 0,
                    created_at   TEXT NOT NULL
                );
                CREATE INDEX notifications_recipient ON notifications (recipient_id, is_read, created_at);
                "#,
        }]
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "notifications module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let abandoned = self.dispatcher.drain(DRAIN_GRACE).await;
        tracing::info!(module = self.name(), abandoned, "notifications module stopped");
        Ok(())
    }
}

/// Create a new instance of the notifications module
pub fn create_module(service: NotificationService, dispatcher: Dispatcher) -> Arc<dyn Module> {
    Arc::new(NotificationsModule::new(service, dispatcher))
}
