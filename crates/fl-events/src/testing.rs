use crate::error::FeedError;
use crate::source::{LiveSource, LiveSubscription};
use crate::types::RawMessage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub enum Connection {
    Refused(FeedError),
    Open(Vec<Step>),
}

pub enum Step {
    Message(RawMessage),
    Fail(FeedError),
}

/// Plays back one [`Connection`] per `subscribe_events` call. Once the
/// script is exhausted, new connections stay open and idle forever.
pub struct ScriptedLiveSource {
    connections: Mutex<VecDeque<Connection>>,
    acks: Arc<Mutex<Vec<String>>>,
    attempts: AtomicUsize,
}

impl ScriptedLiveSource {
    pub fn new(connections: Vec<Connection>) -> Self {
        Self {
            connections: Mutex::new(connections.into_iter().collect()),
            acks: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn acks(&self) -> Vec<String> {
        self.acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveSource for ScriptedLiveSource {
    async fn subscribe_events(&self) -> Result<Box<dyn LiveSubscription>, FeedError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(Connection::Refused(err)) => Err(err),
            Some(Connection::Open(steps)) => Ok(Box::new(ScriptedSubscription {
                steps: Some(steps.into_iter().collect()),
                acks: self.acks.clone(),
            })),
            None => Ok(Box::new(ScriptedSubscription {
                steps: None,
                acks: self.acks.clone(),
            })),
        }
    }
}

struct ScriptedSubscription {
    steps: Option<VecDeque<Step>>,
    acks: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl LiveSubscription for ScriptedSubscription {
    async fn next_message(&mut self) -> Result<Option<RawMessage>, FeedError> {
        let Some(steps) = self.steps.as_mut() else {
            return std::future::pending().await;
        };
        match steps.pop_front() {
            Some(Step::Message(message)) => Ok(Some(message)),
            Some(Step::Fail(err)) => Err(err),
            None => Ok(None),
        }
    }

    async fn ack(&mut self, message_id: &str) -> Result<(), FeedError> {
        self.acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message_id.to_string());
        Ok(())
    }
}

pub fn payload(resource_id: &str, ts: i64, event_type: &str, data_json: &str) -> String {
    format!(
        r#"{{"bizCode":"{event_type}","devId":"{resource_id}","productKey":"prod","data":{data_json},"ts":{ts}}}"#
    )
}
