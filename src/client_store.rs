//! Read-side mirror of swap requests and books, fed by [`SwapEvent`]s.
//!
//! Availability is never taken from the cached book flag alone: a book
//! held by any mirrored live request reads as unavailable, using the same
//! held-book table as the engine.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::modules::books::models::Book;
use crate::modules::swaps::{SwapEvent, SwapRequest};

#[derive(Debug, Default)]
struct Mirror {
    requests: HashMap<String, SwapRequest>,
    books: HashMap<String, Book>,
}

/// Cheap to clone; clones share one mirror.
#[derive(Debug, Clone, Default)]
pub struct ClientStore {
    inner: Arc<RwLock<Mirror>>,
}

impl ClientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the mirror. Older versions of a request and
    /// older snapshots of a book than the ones held are ignored.
    pub fn apply(&self, event: &SwapEvent) {
        let mut mirror = self.inner.write();

        let incoming = &event.request;
        let newer = mirror
            .requests
            .get(&incoming.id)
            .map_or(true, |known| known.version < incoming.version);
        if newer {
            mirror.requests.insert(incoming.id.clone(), incoming.clone());
        } else {
            tracing::trace!(request_id = %incoming.id, "stale swap event ignored");
        }

        for book in &event.books {
            let newer = mirror
                .books
                .get(&book.id)
                .map_or(true, |known| known.updated_at <= book.updated_at);
            if newer {
                mirror.books.insert(book.id.clone(), book.clone());
            }
        }
    }

    pub fn request(&self, id: &str) -> Option<SwapRequest> {
        self.inner.read().requests.get(id).cloned()
    }

    pub fn book(&self, id: &str) -> Option<Book> {
        self.inner.read().books.get(id).cloned()
    }

    /// Mirrored live request holding `book_id`, if any.
    pub fn holder_of(&self, book_id: &str) -> Option<SwapRequest> {
        self.inner
            .read()
            .requests
            .values()
            .find(|r| r.held_book() == Some(book_id))
            .cloned()
    }

    /// Availability as the UI should render it. `None` for books the
    /// mirror has never seen and no request holds.
    pub fn is_available(&self, book_id: &str) -> Option<bool> {
        let mirror = self.inner.read();
        let held = mirror
            .requests
            .values()
            .any(|r| r.held_book() == Some(book_id));
        if held {
            return Some(false);
        }
        mirror.books.get(book_id).map(|b| b.is_available)
    }

    /// Requests the user is party to, newest first.
    pub fn requests_for(&self, user_id: &str) -> Vec<SwapRequest> {
        let mut requests: Vec<SwapRequest> = self
            .inner
            .read()
            .requests
            .values()
            .filter(|r| r.is_party(user_id))
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        requests
    }

    /// Keep the mirror in sync with `receiver` until the bus closes.
    pub fn spawn_mirror(&self, mut receiver: broadcast::Receiver<SwapEvent>) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => store.apply(&event),
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "client store lagged behind swap events");
                    }
                    Err(RecvError::Closed) => {
                        tracing::debug!("swap event bus closed, client store mirror stopping");
                        break;
                    }
                }
            }
        })
    }
}
