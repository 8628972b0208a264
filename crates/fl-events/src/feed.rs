use crate::error::FeedError;
use crate::source::{LiveSource, LiveSubscription};
use crate::types::LiveEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub event: LiveEvent,
}

/// Supervised reader over a [`LiveSource`].
///
/// Connection loss and transport errors reconnect after `reconnect_delay`;
/// undecodable messages are acknowledged and skipped. Only terminal errors
/// (authentication failure) are returned to the caller.
pub struct LiveFeed {
    source: Arc<dyn LiveSource>,
    subscription: Option<Box<dyn LiveSubscription>>,
    reconnect_delay: Duration,
    connects: u64,
}

impl LiveFeed {
    pub fn new(source: Arc<dyn LiveSource>, reconnect_delay: Duration) -> Self {
        Self {
            source,
            subscription: None,
            reconnect_delay,
            connects: 0,
        }
    }

    pub fn connects(&self) -> u64 {
        self.connects
    }

    pub async fn next(&mut self) -> Result<Delivery, FeedError> {
        loop {
            if self.subscription.is_none() {
                match self.source.subscribe_events().await {
                    Ok(subscription) => {
                        self.connects += 1;
                        info!(connects = self.connects, "live subscription open");
                        self.subscription = Some(subscription);
                    }
                    Err(err) if err.is_terminal() => {
                        error!(error = %err, "live subscription rejected, not retrying");
                        return Err(err);
                    }
                    Err(err) => {
                        warn!(
                            error = %err,
                            delay_ms = self.delay_ms(),
                            "live subscription failed, reconnecting"
                        );
                        tokio::time::sleep(self.reconnect_delay).await;
                        continue;
                    }
                }
            }

            let Some(subscription) = self.subscription.as_mut() else {
                continue;
            };
            let received = subscription.next_message().await;
            match received {
                Ok(Some(message)) => match LiveEvent::decode(&message) {
                    Ok(event) => {
                        return Ok(Delivery {
                            message_id: message.message_id,
                            event,
                        });
                    }
                    Err(err) => {
                        warn!(
                            message_id = %message.message_id,
                            error = %err,
                            "skipping undecodable live message"
                        );
                        self.ack(&message.message_id).await;
                    }
                },
                Ok(None) => {
                    info!(
                        delay_ms = self.delay_ms(),
                        "live subscription closed, reconnecting"
                    );
                    self.subscription = None;
                    tokio::time::sleep(self.reconnect_delay).await;
                }
                Err(err) if err.is_terminal() => {
                    error!(error = %err, "live subscription unauthorized, not retrying");
                    self.subscription = None;
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        delay_ms = self.delay_ms(),
                        "live subscription error, reconnecting"
                    );
                    self.subscription = None;
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    fn delay_ms(&self) -> u64 {
        u64::try_from(self.reconnect_delay.as_millis()).unwrap_or(u64::MAX)
    }

    pub async fn ack(&mut self, message_id: &str) {
        if message_id.is_empty() {
            return;
        }
        let Some(subscription) = self.subscription.as_mut() else {
            debug!(message_id, "no open subscription to acknowledge on");
            return;
        };
        if let Err(err) = subscription.ack(message_id).await {
            warn!(message_id, error = %err, "failed to acknowledge live message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Connection, ScriptedLiveSource, Step, payload};
    use crate::types::RawMessage;

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_close_and_transport_errors() {
        let source = Arc::new(ScriptedLiveSource::new(vec![
            Connection::Refused(FeedError::Transport {
                message: "dns".to_string(),
            }),
            Connection::Open(vec![Step::Message(RawMessage::new(
                "m-1",
                payload("dev1", 1, "online", "{}"),
            ))]),
            Connection::Open(vec![Step::Fail(FeedError::Transport {
                message: "reset".to_string(),
            })]),
            Connection::Open(vec![Step::Message(RawMessage::new(
                "m-2",
                payload("dev1", 2, "offline", "{}"),
            ))]),
        ]));
        let mut feed = LiveFeed::new(source.clone(), Duration::from_secs(1));

        let first = feed.next().await.unwrap();
        assert_eq!(first.message_id, "m-1");
        let second = feed.next().await.unwrap();
        assert_eq!(second.message_id, "m-2");
        assert_eq!(second.event.event_type, "offline");
        assert_eq!(feed.connects(), 3);
        assert_eq!(source.connect_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_is_terminal() {
        let source = Arc::new(ScriptedLiveSource::new(vec![Connection::Refused(
            FeedError::Unauthorized { status: 401 },
        )]));
        let mut feed = LiveFeed::new(source.clone(), Duration::from_secs(1));
        let err = feed.next().await.unwrap_err();
        assert_eq!(err, FeedError::Unauthorized { status: 401 });
        assert_eq!(source.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_messages_are_acked_and_skipped() {
        let source = Arc::new(ScriptedLiveSource::new(vec![Connection::Open(vec![
            Step::Message(RawMessage::new("bad", "not-json")),
            Step::Message(RawMessage::new("good", payload("dev2", 3, "online", "{}"))),
        ])]));
        let mut feed = LiveFeed::new(source.clone(), Duration::from_secs(1));
        let delivery = feed.next().await.unwrap();
        assert_eq!(delivery.message_id, "good");
        assert_eq!(source.acks(), vec!["bad".to_string()]);
        feed.ack(&delivery.message_id).await;
        assert_eq!(source.acks(), vec!["bad".to_string(), "good".to_string()]);
    }
}
