pub mod books;
pub mod notifications;
pub mod swaps;
pub mod users;

use std::sync::Arc;

use shelfswap_db::Database;
use shelfswap_events::EventBus;
use shelfswap_kernel::ModuleRegistry;

use books::BookRegistry;
use notifications::{Dispatcher, NotificationService, NotificationSink};
use swaps::{SwapEngine, SwapEvent};
use users::ProfileService;

/// Every domain service, wired to one database.
#[derive(Debug, Clone)]
pub struct Services {
    pub books: BookRegistry,
    pub users: ProfileService,
    pub swaps: SwapEngine,
    pub notifications: NotificationService,
    pub dispatcher: Dispatcher,
}

impl Services {
    pub fn new(
        db: &Database,
        events: EventBus<SwapEvent>,
        sink: Arc<dyn NotificationSink>,
        detached_notifications: bool,
    ) -> Self {
        let dispatcher = Dispatcher::new(sink, detached_notifications);
        Self {
            books: BookRegistry::new(db.clone()),
            users: ProfileService::new(db.clone()),
            swaps: SwapEngine::new(db.clone(), dispatcher.clone(), events),
            notifications: NotificationService::new(db.clone()),
            dispatcher,
        }
    }
}

/// Register all project modules. Order is migration and startup order.
pub fn register_all(registry: &mut ModuleRegistry, services: &Services) -> anyhow::Result<()> {
    registry.register(books::create_module(services.books.clone()))?;
    registry.register(users::create_module(services.users.clone()))?;
    registry.register(swaps::create_module(services.swaps.clone()))?;
    registry.register(notifications::create_module(
        services.notifications.clone(),
        services.dispatcher.clone(),
    ))?;
    Ok(())
}
