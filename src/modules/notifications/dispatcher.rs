//! Delivery of notification drafts after a swap transition commits.
//!
//! The engine emits drafts; a [`NotificationSink`] decides what they mean.
//! Delivery is best effort: a failing sink is logged and never reaches the
//! caller of the transition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shelfswap_db::Database;
use time::OffsetDateTime;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::models::NotificationDraft;
use super::repo;

/// Destination for notification drafts.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, draft: &NotificationDraft) -> anyhow::Result<()>;
}

/// Persists drafts as rows in the `notifications` table.
#[derive(Debug, Clone)]
pub struct StoreSink {
    db: Database,
}

impl StoreSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationSink for StoreSink {
    async fn deliver(&self, draft: &NotificationDraft) -> anyhow::Result<()> {
        let draft = draft.clone();
        self.db
            .call_sqlite(move |conn| {
                repo::insert(
                    conn,
                    &Uuid::now_v7().to_string(),
                    &draft,
                    OffsetDateTime::now_utc(),
                )
            })
            .await?;
        Ok(())
    }
}

/// Fans drafts out to a sink, either on a spawned task or in line.
///
/// Detached deliveries are tracked so shutdown can wait for them with
/// [`Dispatcher::drain`]. Clones share the same set of tasks.
#[derive(Clone)]
pub struct Dispatcher {
    sink: Arc<dyn NotificationSink>,
    detached: bool,
    in_flight: Arc<Mutex<JoinSet<()>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("detached", &self.detached)
            .field("in_flight", &self.in_flight.lock().len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, detached: bool) -> Self {
        Self {
            sink,
            detached,
            in_flight: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Deliver every draft. Never fails; errors are logged.
    pub async fn dispatch(&self, drafts: Vec<NotificationDraft>) {
        if drafts.is_empty() {
            return;
        }
        if self.detached {
            let sink = Arc::clone(&self.sink);
            let mut in_flight = self.in_flight.lock();
            // reap finished deliveries so the set only holds live ones
            while in_flight.try_join_next().is_some() {}
            in_flight.spawn(async move { deliver_all(sink.as_ref(), drafts).await });
        } else {
            deliver_all(self.sink.as_ref(), drafts).await;
        }
    }

    /// Wait up to `grace` for detached deliveries still running. Whatever is
    /// left after that is aborted; returns how many were.
    pub async fn drain(&self, grace: Duration) -> usize {
        let mut in_flight = std::mem::take(&mut *self.in_flight.lock());
        if in_flight.is_empty() {
            return 0;
        }
        let pending = in_flight.len();
        let finished = tokio::time::timeout(grace, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "notification delivery task failed");
                }
            }
        })
        .await;

        match finished {
            Ok(()) => {
                tracing::debug!(pending, "in-flight notifications delivered");
                0
            }
            Err(_) => {
                let abandoned = in_flight.len();
                in_flight.abort_all();
                tracing::warn!(
                    abandoned,
                    grace_ms = grace.as_millis() as u64,
                    "notifications still in flight at shutdown were dropped"
                );
                abandoned
            }
        }
    }
}

async fn deliver_all(sink: &dyn NotificationSink, drafts: Vec<NotificationDraft>) {
    for draft in drafts {
        match sink.deliver(&draft).await {
            Ok(()) => tracing::debug!(
                recipient = %draft.recipient_id,
                kind = %draft.kind,
                request_id = %draft.request_id,
                "notification delivered"
            ),
            Err(e) => tracing::warn!(
                recipient = %draft.recipient_id,
                kind = %draft.kind,
                request_id = %draft.request_id,
                error = %format!("{e:#}"),
                "notification delivery failed"
            ),
        }
    }
}

/// Keeps every draft in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    drafts: parking_lot::Mutex<Vec<NotificationDraft>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drafts(&self) -> Vec<NotificationDraft> {
        self.drafts.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, draft: &NotificationDraft) -> anyhow::Result<()> {
        self.drafts.lock().push(draft.clone());
        Ok(())
    }
}
