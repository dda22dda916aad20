use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use super::protocol::Envelope;
use crate::error::Result;

/// Topic-addressed publish/subscribe messaging between engines and workers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, exchange: &str, topic: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, exchange: &str, topic: &str)
        -> Result<mpsc::UnboundedReceiver<Vec<u8>>>;
}

type Subscribers = HashMap<(String, String), Vec<mpsc::UnboundedSender<Vec<u8>>>>;

/// In-process transport; every subscriber of a topic gets each message.
/// Messages published to a topic nobody listens on are dropped.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    topics: Arc<Mutex<Subscribers>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, exchange: &str, topic: &str) -> usize {
        self.topics
            .lock()
            .get(&(exchange.to_string(), topic.to_string()))
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, exchange: &str, topic: &str, payload: Vec<u8>) -> Result<()> {
        let mut topics = self.topics.lock();
        match topics.get_mut(&(exchange.to_string(), topic.to_string())) {
            Some(subscribers) => {
                subscribers.retain(|s| s.send(payload.clone()).is_ok());
            }
            None => debug!("No subscriber on '{}/{}', message dropped", exchange, topic),
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        exchange: &str,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .entry((exchange.to_string(), topic.to_string()))
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

/// Receives what a proxy consumes.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, envelope: Envelope);

    /// Called every wait period while the consume loop is idle or busy.
    async fn on_wait(&self) {}
}

/// One topic's view of the transport: publishes envelopes anywhere on the
/// exchange and consumes its own topic until stopped.
pub struct Proxy {
    exchange: String,
    topic: String,
    transport: Arc<dyn Transport>,
    shutdown: watch::Sender<bool>,
    started: watch::Sender<bool>,
}

impl Proxy {
    pub fn new(exchange: impl Into<String>, topic: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (started, _) = watch::channel(false);
        Self {
            exchange: exchange.into(),
            topic: topic.into(),
            transport,
            shutdown,
            started,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_running(&self) -> bool {
        *self.started.borrow()
    }

    pub async fn publish(&self, envelope: &Envelope, routing_key: &str) -> Result<()> {
        debug!(
            "Publishing {:?} {} to '{}'",
            envelope.kind, envelope.correlation_id, routing_key
        );
        self.transport
            .publish(&self.exchange, routing_key, envelope.encode()?)
            .await
    }

    /// Consumes this proxy's topic until `stop` is called, ticking
    /// `on_wait` every `wait_period`. Malformed messages are dropped.
    ///
    /// A `stop` issued before the loop starts makes this return at once.
    /// Each stop is consumed by one run, so a stopped proxy can be started
    /// again.
    pub async fn start<H: MessageHandler + ?Sized>(&self, handler: &H, wait_period: Duration) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            self.shutdown.send_replace(false);
            debug!("'{}/{}' was stopped before it started", self.exchange, self.topic);
            return Ok(());
        }
        let mut messages = self.transport.subscribe(&self.exchange, &self.topic).await?;
        let mut tick = tokio::time::interval(wait_period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        self.started.send_replace(true);
        debug!("Consuming '{}/{}'", self.exchange, self.topic);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                message = messages.recv() => match message {
                    Some(payload) => match Envelope::decode(&payload) {
                        Ok(envelope) => handler.on_message(envelope).await,
                        Err(e) => warn!("Dropping message on '{}': {}", self.topic, e),
                    },
                    None => break,
                },
                _ = tick.tick() => handler.on_wait().await,
            }
        }

        self.started.send_replace(false);
        self.shutdown.send_replace(false);
        debug!("Stopped consuming '{}/{}'", self.exchange, self.topic);
        Ok(())
    }

    /// Resolves once the consume loop is running.
    pub async fn wait(&self) {
        let mut started = self.started.subscribe();
        while !*started.borrow_and_update() {
            if started.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests;
