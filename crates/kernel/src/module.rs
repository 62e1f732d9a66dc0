use async_trait::async_trait;
use axum::Router;

pub use shelfswap_db::Migration;

/// What a module may touch while it boots.
pub struct InitCtx<'a> {
    pub settings: &'a crate::settings::Settings,
    pub db: &'a shelfswap_db::Database,
}

/// A slice of the application: a schema, a router and a lifecycle.
///
/// The registry drives every hook; a module only describes itself.
#[async_trait]
pub trait Module: Sync + Send {
    /// Registry key and mount point (`/api/{name}`)
    fn name(&self) -> &'static str;

    /// Runs once the schema is migrated
    async fn init(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
    }

    /// OpenAPI fragment with `paths` relative to the mount point and
    /// optional `components.schemas`.
    fn openapi(&self) -> Option<serde_json::Value> {
        None
    }

    /// Ordered schema changes, recorded per module once applied
    fn migrations(&self) -> Vec<Migration> {
        vec![]
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs on shutdown, in reverse registration order
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
