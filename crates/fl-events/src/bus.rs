use crate::feed::LiveFeed;
use crate::source::LiveSource;
use crate::types::LiveEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

pub type SubscriberId = Ulid;

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub channel_depth: usize,
    pub reconnect_delay: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            channel_depth: 256,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Clone, Default)]
struct Registry {
    inner: Arc<Mutex<HashMap<SubscriberId, mpsc::Sender<String>>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<String>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fan_out(&self, payload: &str) -> FanOut {
        let mut report = FanOut::default();
        let mut subscribers = self.lock();
        let mut stale = Vec::new();
        for (id, sender) in subscribers.iter() {
            match sender.try_send(payload.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber = %id, "subscriber channel full, dropping subscriber");
                    stale.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber = %id, "subscriber went away");
                    stale.push(*id);
                }
            }
        }
        for id in stale {
            subscribers.remove(&id);
            report.dropped += 1;
        }
        report
    }
}

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct Broadcaster {
    config: BroadcasterConfig,
    registry: Registry,
    worker: Mutex<Option<Worker>>,
}

impl Broadcaster {
    pub fn new(config: BroadcasterConfig) -> Self {
        Self {
            config,
            registry: Registry::default(),
            worker: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.config.channel_depth.max(1));
        let id = Ulid::new();
        let mut subscribers = self.registry.lock();
        subscribers.insert(id, sender);
        debug!(subscriber = %id, total = subscribers.len(), "subscriber registered");
        Subscription { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.registry.lock();
        let removed = subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, remaining = subscribers.len(), "subscriber unregistered");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn publish(&self, event: &LiveEvent) -> FanOut {
        match serde_json::to_string(event) {
            Ok(payload) => self.registry.fan_out(&payload),
            Err(err) => {
                error!(error = %err, "failed to serialize live event");
                FanOut::default()
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    pub fn start(&self, source: Arc<dyn LiveSource>) -> bool {
        let mut worker = self.lock_worker();
        if worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
        {
            return false;
        }
        let cancel = CancellationToken::new();
        let registry = self.registry.clone();
        let feed = LiveFeed::new(source, self.config.reconnect_delay);
        let handle = tokio::spawn(run_feed(feed, registry, cancel.clone()));
        *worker = Some(Worker { handle, cancel });
        info!("broadcaster started");
        true
    }

    pub async fn stop(&self) {
        let worker = self.lock_worker().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            let _ = worker.handle.await;
        }
        self.registry.lock().clear();
        info!("broadcaster stopped");
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_feed(mut feed: LiveFeed, registry: Registry, cancel: CancellationToken) {
    loop {
        let delivery = tokio::select! {
            () = cancel.cancelled() => return,
            delivery = feed.next() => delivery,
        };
        match delivery {
            Ok(delivery) => {
                match serde_json::to_string(&delivery.event) {
                    Ok(payload) => {
                        registry.fan_out(&payload);
                    }
                    Err(err) => error!(error = %err, "failed to serialize live event"),
                }
                feed.ack(&delivery.message_id).await;
            }
            Err(err) => {
                error!(error = %err, "broadcaster feed stopped");
                return;
            }
        }
    }
}
