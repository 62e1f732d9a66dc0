//! Fixtures shared by the in-crate tests.

use std::path::Path;
use std::sync::Arc;

use shelfswap_db::Database;
use shelfswap_events::EventBus;
use shelfswap_kernel::ModuleRegistry;

use crate::modules::books::models::{BookCondition, NewBook};
use crate::modules::books::BookRegistry;
use crate::modules::notifications::{NotificationService, NotificationSink, StoreSink};
use crate::modules::swaps::{SwapEngine, SwapEvent};
use crate::modules::users::ProfileService;
use crate::modules::{register_all, Services};

/// A migrated database with every service attached. Notifications are
/// delivered in line so tests can read them straight after a transition.
pub struct TestEnv {
    pub db: Database,
    pub books: BookRegistry,
    pub users: ProfileService,
    pub swaps: SwapEngine,
    pub notifications: NotificationService,
}

impl TestEnv {
    pub async fn new() -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let sink = Arc::new(StoreSink::new(db.clone()));
        Self::build(db, sink).await
    }

    /// Like [`TestEnv::new`] but delivering to `sink`.
    pub async fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        let db = Database::open_in_memory().await.unwrap();
        Self::build(db, sink).await
    }

    /// An environment on a database file. Two environments on the same
    /// file behave like two service instances.
    pub async fn on_file(path: &Path) -> Self {
        let db = Database::open(path, 5000).await.unwrap();
        let sink = Arc::new(StoreSink::new(db.clone()));
        Self::build(db, sink).await
    }

    async fn build(db: Database, sink: Arc<dyn NotificationSink>) -> Self {
        let services = Services::new(&db, EventBus::<SwapEvent>::new(64), sink, false);
        let mut registry = ModuleRegistry::new();
        register_all(&mut registry, &services).unwrap();
        registry.migrate(&db).await.unwrap();

        let Services {
            books,
            users,
            swaps,
            notifications,
            ..
        } = services;
        Self {
            db,
            books,
            users,
            swaps,
            notifications,
        }
    }
}

pub fn book_draft(title: &str) -> NewBook {
    NewBook {
        title: title.to_string(),
        authors: vec!["Anonymous".to_string()],
        condition: BookCondition::Good,
        description: None,
    }
}
