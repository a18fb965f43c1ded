//! Progress notifications for batch signing.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::commons::api::{DocumentId, OperatorId};
use crate::constants::{PROGRESS_CHANNEL_CAPACITY, PROGRESS_TOPIC_PREFIX};


/// The topic on which an operator receives their progress events.
pub fn operator_topic(operator: &OperatorId) -> String {
    format!("{}{}", PROGRESS_TOPIC_PREFIX, operator)
}


//------------ ProgressEvent -------------------------------------------------

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// One batch item was handled. `current` counts from 1.
    SigningProgress {
        current: usize,
        total: usize,
        document_id: DocumentId,
        success: bool,
    },

    SigningComplete {
        total: usize,
        succeeded: usize,
        failed: usize,
    },
}


//------------ ProgressChannel -----------------------------------------------

/// Delivers progress events to whoever listens on a topic.
///
/// Delivery is best effort. Signing never fails because an event could not
/// be published.
pub trait ProgressChannel: Send + Sync {
    fn publish(&self, topic: &str, event: ProgressEvent) -> Result<(), PublishError>;
}


//------------ BroadcastProgressChannel --------------------------------------

/// An in-process channel using a tokio broadcast channel per topic.
#[derive(Debug, Default)]
pub struct BroadcastProgressChannel {
    topics: RwLock<HashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl BroadcastProgressChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<ProgressEvent> {
        if let Some(sender) = self.topics.read().unwrap().get(topic) {
            return sender.subscribe();
        }
        self.topics
            .write()
            .unwrap()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(PROGRESS_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl ProgressChannel for BroadcastProgressChannel {
    fn publish(&self, topic: &str, event: ProgressEvent) -> Result<(), PublishError> {
        let sent = match self.topics.read().unwrap().get(topic) {
            Some(sender) => sender.send(event).is_ok(),
            None => return Err(PublishError::NoSubscribers(topic.to_string())),
        };
        if sent {
            return Ok(());
        }

        // All receivers are gone, drop the topic until someone subscribes
        // again.
        let mut topics = self.topics.write().unwrap();
        if topics.get(topic).is_some_and(|sender| sender.receiver_count() == 0) {
            topics.remove(topic);
            trace!("Dropped progress topic '{}'", topic);
        }
        Err(PublishError::NoSubscribers(topic.to_string()))
    }
}


//------------ LogProgressChannel --------------------------------------------

/// Writes progress events to the log, for use without any listeners.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogProgressChannel;

impl ProgressChannel for LogProgressChannel {
    fn publish(&self, topic: &str, event: ProgressEvent) -> Result<(), PublishError> {
        debug!("[{}] {:?}", topic, event);
        Ok(())
    }
}


//------------ PublishError --------------------------------------------------

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PublishError {
    NoSubscribers(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PublishError::NoSubscribers(topic) => {
                write!(f, "nobody listens on topic '{}'", topic)
            }
        }
    }
}

impl std::error::Error for PublishError {}


//============ Tests =========================================================
