//! Process bootstrap: database, services, module lifecycle and the server.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use shelfswap_db::Database;
use shelfswap_events::EventBus;
use shelfswap_kernel::settings::{DatabaseSettings, Settings};
use shelfswap_kernel::{InitCtx, ModuleRegistry};

use crate::modules::notifications::StoreSink;
use crate::modules::swaps::SwapEvent;
use crate::modules::{register_all, Services};

/// A migrated database with every module registered.
pub struct App {
    pub settings: Settings,
    pub db: Database,
    pub registry: ModuleRegistry,
    pub services: Services,
}

impl App {
    /// Open the database, wire the services and apply migrations.
    pub async fn bootstrap(settings: Settings) -> anyhow::Result<Self> {
        let db = open_database(&settings.database).await?;

        let events = EventBus::<SwapEvent>::new(settings.events.channel_capacity);
        let sink = Arc::new(StoreSink::new(db.clone()));
        let services = Services::new(&db, events, sink, settings.notifications.detached);

        let mut registry = ModuleRegistry::new();
        register_all(&mut registry, &services)?;
        let applied = registry.migrate(&db).await?;
        tracing::info!(
            modules = registry.module_count(),
            applied,
            db = %db.path(),
            "application bootstrapped"
        );

        Ok(Self {
            settings,
            db,
            registry,
            services,
        })
    }

    pub fn router(&self) -> axum::Router {
        shelfswap_http::build_router(&self.registry, &self.settings)
    }

    /// Run the module lifecycle around the HTTP server until ctrl-c.
    pub async fn serve(self) -> anyhow::Result<()> {
        let ctx = InitCtx {
            settings: &self.settings,
            db: &self.db,
        };
        self.registry.init_modules(&ctx).await?;
        self.registry.start_modules(&ctx).await?;

        let served = shelfswap_http::start_server(&self.registry, &self.settings, shutdown_signal()).await;

        self.registry.stop_modules().await?;
        served
    }
}

pub async fn open_database(settings: &DatabaseSettings) -> anyhow::Result<Database> {
    let db = if settings.is_in_memory() {
        Database::open_in_memory().await
    } else {
        Database::open(Path::new(&settings.path), settings.busy_timeout_ms).await
    };
    db.with_context(|| format!("failed to open database at {}", settings.path))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }
}
