//! Job queues and dead letters
//!
//! Queues carry raw serialized payloads so a consumer can see, and dead-letter,
//! messages that do not parse. Delivery is at-least-once.

use super::OperationCategory;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// FIFO queue of serialized job payloads
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, payload: String) -> Result<()>;

    /// Next payload, if any, without waiting.
    async fn try_dequeue(&self) -> Result<Option<String>>;

    /// Next payload, waiting until one arrives.
    async fn dequeue(&self) -> Result<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process queue
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    messages: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, payload: String) -> Result<()> {
        self.messages.lock().push_back(payload);
        self.notify.notify_one();
        Ok(())
    }

    async fn try_dequeue(&self) -> Result<Option<String>> {
        Ok(self.messages.lock().pop_front())
    }

    async fn dequeue(&self) -> Result<String> {
        loop {
            let next = self.messages.lock().pop_front();
            if let Some(payload) = next {
                return Ok(payload);
            }
            self.notify.notified().await;
        }
    }

    fn len(&self) -> usize {
        self.messages.lock().len()
    }
}

/// A payload that could not be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub category: OperationCategory,
    pub payload: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Destination for payloads that cannot be processed
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryDeadLetters {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.letters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.letters.lock().is_empty()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetters {
    async fn dead_letter(&self, letter: DeadLetter) -> Result<()> {
        self.letters.lock().push(letter);
        Ok(())
    }
}
