//! Broker publishers.
//!
//! The dispatcher only sees the [`Publisher`] trait. Concrete brokers live in
//! `redis_publisher` and `http_publisher`. The two publishers here cover
//! dry runs and tests.

use crate::error::{DispatchError, DispatchResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Sends a serialized envelope to a named destination.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, destination: &str, envelope: &[u8]) -> DispatchResult<()>;
}

/// Writes every envelope to the log and always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, destination: &str, envelope: &[u8]) -> DispatchResult<()> {
        info!(
            destination,
            envelope = %String::from_utf8_lossy(envelope),
            "Published envelope"
        );
        Ok(())
    }
}

/// One envelope accepted by a [`RecordingPublisher`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub destination: String,
    pub body: Vec<u8>,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Scripted outcome of one publish call.
#[derive(Debug, Clone)]
pub enum PublishBehavior {
    Succeed,
    Fail(String),
    /// Succeed after sleeping.
    Delay(Duration),
    /// Never complete.
    Hang,
}

/// Publisher that records what it receives and fails on demand.
pub struct RecordingPublisher {
    published: Mutex<Vec<PublishedMessage>>,
    script: Mutex<VecDeque<PublishBehavior>>,
    default_behavior: Mutex<PublishBehavior>,
    attempts: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            default_behavior: Mutex::new(PublishBehavior::Succeed),
            attempts: AtomicUsize::new(0),
            gate: watch::Sender::new(true),
        }
    }
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior once the script is exhausted.
    pub fn set_default_behavior(&self, behavior: PublishBehavior) {
        *self.default_behavior.lock() = behavior;
    }

    /// Queue the behavior of the next unscripted call.
    pub fn push_behavior(&self, behavior: PublishBehavior) {
        self.script.lock().push_back(behavior);
    }

    /// Queue `times` consecutive failures.
    pub fn fail_times(&self, times: usize, reason: &str) {
        let mut script = self.script.lock();
        for _ in 0..times {
            script.push_back(PublishBehavior::Fail(reason.to_string()));
        }
    }

    /// Hold every publish call until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Number of publish calls, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }

    fn next_behavior(&self) -> PublishBehavior {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_behavior.lock().clone())
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, destination: &str, envelope: &[u8]) -> DispatchResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.map(|_| ());
        if opened.is_err() {
            return Err(DispatchError::Publish("publisher gate dropped".to_string()));
        }

        match self.next_behavior() {
            PublishBehavior::Succeed => {}
            PublishBehavior::Fail(reason) => return Err(DispatchError::Publish(reason)),
            PublishBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            PublishBehavior::Hang => std::future::pending::<()>().await,
        }

        self.published.lock().push(PublishedMessage {
            destination: destination.to_string(),
            body: envelope.to_vec(),
        });
        Ok(())
    }
}
