use crate::error::{StoreError, WatchError};
use crate::store::RecordStore;
use crate::types::{EventRecord, EventSummary};
use fl_events::{Delivery, LiveEvent, LiveFeed, LiveSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const PREVIEW_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub reconnect_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

pub struct StreamWatcher<S> {
    source: Arc<dyn LiveSource>,
    store: Arc<S>,
    config: WatcherConfig,
    count: AtomicU64,
}

impl<S: RecordStore> StreamWatcher<S> {
    pub fn new(source: Arc<dyn LiveSource>, store: Arc<S>, config: WatcherConfig) -> Self {
        Self {
            source,
            store,
            config,
            count: AtomicU64::new(0),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub async fn run(
        &self,
        duration: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<u64, WatchError> {
        self.consume(duration, None, cancel, |_| {}).await?;
        Ok(self.count())
    }

    pub async fn run_collecting(
        &self,
        duration: Option<Duration>,
        max_events: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventSummary>, WatchError> {
        let mut events = Vec::new();
        self.consume(duration, max_events, cancel, |summary| events.push(summary))
            .await?;
        Ok(events)
    }

    async fn consume<F>(
        &self,
        duration: Option<Duration>,
        max_events: Option<usize>,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<(), WatchError>
    where
        F: FnMut(EventSummary),
    {
        let deadline = duration.map(|duration| Instant::now() + duration);
        let mut feed = LiveFeed::new(self.source.clone(), self.config.reconnect_delay);
        let mut handled = 0_usize;
        info!("connecting to live feed");

        let outcome = loop {
            if max_events.is_some_and(|max| handled >= max) {
                break Ok(());
            }
            let delivery = tokio::select! {
                () = cancel.cancelled() => break Ok(()),
                () = wait_until(deadline) => break Ok(()),
                delivery = feed.next() => delivery,
            };
            match delivery {
                Ok(delivery) => {
                    if let Some(stored) = self.handle(&mut feed, &delivery).await {
                        handled += 1;
                        on_event(EventSummary::new(&delivery.event, stored));
                    }
                }
                Err(err) => break Err(WatchError::from(err)),
            }
        };

        info!(count = self.count(), handled, "watcher stopped");
        outcome
    }

    pub fn store_event(&self, event: &LiveEvent) -> Result<bool, StoreError> {
        let record = EventRecord::from_live(event);
        let inserted = self.store.insert(std::slice::from_ref(&record))?;
        if inserted == 0 {
            return Ok(false);
        }
        self.store
            .advance_bookmark(&record.resource_id, record.event_time)?;
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn handle(&self, feed: &mut LiveFeed, delivery: &Delivery) -> Option<bool> {
        match self.store_event(&delivery.event) {
            Ok(new) => {
                log_event(&delivery.event, new);
                feed.ack(&delivery.message_id).await;
                Some(new)
            }
            Err(err) => {
                error!(
                    resource_id = %delivery.event.resource_id,
                    message_id = %delivery.message_id,
                    error = %err,
                    "failed to store live event, leaving it unacknowledged"
                );
                None
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn log_event(event: &LiveEvent, new: bool) {
    let mut preview = event.canonical_data();
    if preview.chars().count() > PREVIEW_CHARS {
        preview = preview.chars().take(PREVIEW_CHARS - 3).collect::<String>() + "...";
    }
    info!(
        tag = if new { "NEW" } else { "DUP" },
        resource_id = %event.resource_id,
        event_type = %event.event_type,
        data = %preview,
        timestamp = event.timestamp,
        "live event"
    );
}
