use async_trait::async_trait;
use log::{debug, error, warn};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use super::endpoint::EndpointRegistry;
use super::protocol::{
    Capabilities, Envelope, MessageKind, Notification, RemoteOutcome, Request, Response,
};
use super::proxy::{MessageHandler, Proxy, Transport};
use crate::engine::executor::join_failure;
use crate::engine::states::Action;
use crate::error::Result;
use crate::task::{Outcome, Progress};

/// How many accepted correlation ids a server remembers.
const SEEN_CAPACITY: usize = 4096;

/// Correlation ids already accepted, oldest first.
#[derive(Default)]
struct SeenRequests {
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
}

impl SeenRequests {
    /// Records `id`; false when it was already there.
    fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

/// Consumes requests addressed to one worker topic and runs them on a
/// bounded pool. Each correlation id is run at most once; redeliveries
/// are dropped without an ACK.
pub struct Server {
    proxy: Arc<Proxy>,
    endpoints: Arc<EndpointRegistry>,
    permits: Arc<Semaphore>,
    notify_period: Duration,
    seen: Mutex<SeenRequests>,
}

async fn reply(proxy: &Proxy, reply_to: &str, correlation_id: Uuid, response: &Response) {
    let envelope = match Envelope::response(correlation_id, response) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("Failed to encode reply for request {}: {}", correlation_id, e);
            return;
        }
    };
    if let Err(e) = proxy.publish(&envelope, reply_to).await {
        error!(
            "Failed to reply to '{}' for request {}: {}",
            reply_to, correlation_id, e
        );
    }
}

impl Server {
    pub fn new(
        exchange: &str,
        topic: &str,
        transport: Arc<dyn Transport>,
        endpoints: Arc<EndpointRegistry>,
        threads_count: usize,
        notify_period: Duration,
    ) -> Self {
        Self {
            proxy: Arc::new(Proxy::new(exchange, topic, transport)),
            endpoints,
            permits: Arc::new(Semaphore::new(threads_count.max(1))),
            notify_period,
            seen: Mutex::new(SeenRequests::default()),
        }
    }

    pub fn topic(&self) -> &str {
        self.proxy.topic()
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            topic: self.proxy.topic().to_string(),
            tasks: self.endpoints.keys(),
        }
    }

    /// Publishes this server's capabilities to `routing_key`.
    pub async fn advertise(&self, routing_key: &str) -> Result<()> {
        let envelope = Envelope::capabilities(&self.capabilities())?;
        self.proxy.publish(&envelope, routing_key).await
    }

    /// Serves requests until `stop` is called.
    pub async fn start(&self) -> Result<()> {
        self.proxy.start(self, self.notify_period).await
    }

    pub async fn wait(&self) {
        self.proxy.wait().await
    }

    pub fn stop(&self) {
        self.proxy.stop()
    }

    fn process_request(&self, envelope: Envelope) {
        let correlation_id = envelope.correlation_id;
        let reply_to = match envelope.reply_to.clone() {
            Some(reply_to) => reply_to,
            None => {
                warn!("Request {} has no reply topic, dropping it", correlation_id);
                return;
            }
        };
        let request: Request = match envelope.parse_body() {
            Ok(request) => request,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        if request.is_expired() {
            warn!(
                "Request {} for '{}' expired at {}, dropping it",
                correlation_id,
                request.key(),
                request.expires_at
            );
            return;
        }
        let endpoint = match self.endpoints.get(&request.key()) {
            Some(endpoint) => endpoint.clone(),
            None => {
                warn!(
                    "The '{}' task endpoint does not exist, unable to continue processing request {}",
                    request.key(),
                    correlation_id
                );
                return;
            }
        };

        if !self.seen.lock().insert(correlation_id) {
            warn!(
                "Request {} for '{}' was already accepted, dropping the redelivery",
                correlation_id,
                request.key()
            );
            return;
        }

        let proxy = self.proxy.clone();
        let permits = self.permits.clone();
        let notify_period = self.notify_period;
        tokio::spawn(async move {
            reply(&proxy, &reply_to, correlation_id, &Response::Ack).await;

            // Heartbeats run from the ACK on, including while queued for a permit.
            let mut heartbeat = tokio::time::interval(notify_period);
            heartbeat.tick().await;
            let acquire = permits.acquire_owned();
            tokio::pin!(acquire);
            let _permit = loop {
                tokio::select! {
                    permit = &mut acquire => break permit,
                    _ = heartbeat.tick() => {
                        reply(&proxy, &reply_to, correlation_id, &Response::Notify(Notification::default())).await;
                    }
                }
            };
            debug!(
                "Running {} of atom '{}' ({}) for request {}",
                request.action,
                request.atom_name,
                endpoint,
                correlation_id
            );

            let (tx, mut progress_events) = mpsc::unbounded_channel();
            let progress = Progress::new(request.atom_name.clone(), tx);
            let mut work = tokio::spawn(async move {
                match request.action {
                    Action::Execute => endpoint.execute(&request.arguments, &progress).await,
                    Action::Revert => {
                        let outcome: Outcome = request
                            .outcome
                            .clone()
                            .map(Outcome::from)
                            .unwrap_or(Ok(Value::Null));
                        endpoint
                            .revert(&request.arguments, &outcome, &progress)
                            .await
                    }
                }
            });

            let outcome = loop {
                tokio::select! {
                    joined = &mut work => break joined.unwrap_or_else(|e| Err(join_failure(e))),
                    Some(event) = progress_events.recv() => {
                        let notification = Notification {
                            progress: Some(event.progress),
                            details: event.details,
                        };
                        reply(&proxy, &reply_to, correlation_id, &Response::Notify(notification)).await;
                    }
                    _ = heartbeat.tick() => {
                        reply(&proxy, &reply_to, correlation_id, &Response::Notify(Notification::default())).await;
                    }
                }
            };
            while let Ok(event) = progress_events.try_recv() {
                let notification = Notification {
                    progress: Some(event.progress),
                    details: event.details,
                };
                reply(&proxy, &reply_to, correlation_id, &Response::Notify(notification)).await;
            }

            let result = Response::Result(RemoteOutcome::from(outcome));
            reply(&proxy, &reply_to, correlation_id, &result).await;
        });
    }
}

#[async_trait]
impl MessageHandler for Server {
    async fn on_message(&self, envelope: Envelope) {
        match envelope.kind {
            MessageKind::Request => self.process_request(envelope),
            MessageKind::Discover => match envelope.reply_to.as_deref() {
                Some(reply_to) => {
                    if let Err(e) = self.advertise(reply_to).await {
                        error!("Failed to answer discovery from '{}': {}", reply_to, e);
                    }
                }
                None => warn!("Discovery message without a reply topic, ignoring it"),
            },
            other => warn!(
                "Unexpected {:?} message {} on worker topic '{}'",
                other,
                envelope.correlation_id,
                self.proxy.topic()
            ),
        }
    }
}
