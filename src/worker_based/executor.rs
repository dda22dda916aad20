use async_trait::async_trait;
use futures::FutureExt;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::cache::WorkersCache;
use super::protocol::{
    Capabilities, Envelope, MessageKind, Request, RequestState, Response, CAPABILITIES_TOPIC,
};
use super::proxy::{MessageHandler, Proxy, Transport};
use crate::atom::Atom;
use crate::engine::executor::{AtomExecutor, AtomFuture, Completion};
use crate::engine::options::duration_ms;
use crate::engine::states::Action;
use crate::error::{FlowError, Result};
use crate::task::{Arguments, Outcome, Progress};
use crate::types::Failure;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerExecutorOptions {
    pub exchange: String,
    /// Topic replies are sent to; generated when empty
    pub topic: String,
    /// Worker topics asked for their capabilities on start
    pub topics: Vec<String>,
    #[serde(with = "duration_ms")]
    pub ack_timeout: Duration,
    /// Longest silence tolerated from a worker running an atom
    #[serde(with = "duration_ms")]
    pub execution_timeout: Duration,
    pub max_dispatch_attempts: usize,
    #[serde(with = "duration_ms")]
    pub wait_period: Duration,
    #[serde(with = "duration_ms")]
    pub capability_staleness: Duration,
}

impl Default for WorkerExecutorOptions {
    fn default() -> Self {
        Self {
            exchange: String::from("atomflow"),
            topic: String::new(),
            topics: Vec::new(),
            ack_timeout: Duration::from_secs(60),
            execution_timeout: Duration::from_secs(60),
            max_dispatch_attempts: 2,
            wait_period: Duration::from_secs(1),
            capability_staleness: Duration::from_secs(120),
        }
    }
}

impl WorkerExecutorOptions {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            ..Self::default()
        }
    }

    pub fn with_topic(mut self, value: impl Into<String>) -> Self {
        self.topic = value.into();
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_ack_timeout(mut self, value: Duration) -> Self {
        self.ack_timeout = value;
        self
    }

    pub fn with_execution_timeout(mut self, value: Duration) -> Self {
        self.execution_timeout = value;
        self
    }

    pub fn with_max_dispatch_attempts(mut self, value: usize) -> Self {
        self.max_dispatch_attempts = value;
        self
    }

    pub fn with_wait_period(mut self, value: Duration) -> Self {
        self.wait_period = value;
        self
    }

    pub fn with_capability_staleness(mut self, value: Duration) -> Self {
        self.capability_staleness = value;
        self
    }
}

/// One outstanding dispatch attempt.
struct PendingRequest {
    request: Request,
    state: RequestState,
    topic: String,
    tried: Vec<String>,
    attempts: usize,
    deadline: Instant,
    progress: Progress,
    reply: oneshot::Sender<Outcome>,
}

impl PendingRequest {
    fn resolve(self, outcome: Outcome) {
        // The engine may have given up on this atom already.
        let _ = self.reply.send(outcome);
    }
}

struct Inner {
    options: WorkerExecutorOptions,
    proxy: Proxy,
    capabilities: Proxy,
    workers: WorkersCache,
    requests: Mutex<HashMap<Uuid, PendingRequest>>,
    rotation: AtomicUsize,
}

impl Inner {
    fn pick_topic(&self, candidates: &[String]) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let turn = self.rotation.fetch_add(1, Ordering::Relaxed);
        Some(candidates[turn % candidates.len()].clone())
    }

    async fn send(&self, correlation_id: Uuid, mut pending: PendingRequest) {
        let envelope = match Envelope::request(correlation_id, self.proxy.topic(), &pending.request) {
            Ok(envelope) => envelope,
            Err(e) => return pending.resolve(Err(Failure::from_flow_error(&e))),
        };
        let topic = pending.topic.clone();
        // Registered before publishing so an early ACK finds it.
        pending.state.advance(RequestState::Sent, &correlation_id);
        self.requests.lock().insert(correlation_id, pending);

        let published = self.proxy.publish(&envelope, &topic).await;
        let mut requests = self.requests.lock();
        match published {
            Ok(()) => {
                if let Some(pending) = requests.get_mut(&correlation_id) {
                    if pending.state == RequestState::Sent {
                        pending.state.advance(RequestState::PendingAck, &correlation_id);
                    }
                }
            }
            Err(e) => {
                warn!("Failed to publish request {} to '{}': {}", correlation_id, topic, e);
                if let Some(pending) = requests.remove(&correlation_id) {
                    pending.resolve(Err(Failure::from_flow_error(&e)));
                }
            }
        }
    }

    fn on_response(&self, correlation_id: Uuid, response: Response) {
        let mut requests = self.requests.lock();
        let pending = match requests.get_mut(&correlation_id) {
            Some(pending) => pending,
            None => {
                debug!("Discarding reply for unknown request {}", correlation_id);
                return;
            }
        };
        match response {
            Response::Ack => {
                if pending.state.advance(RequestState::Acked, &correlation_id) {
                    pending.deadline = Instant::now() + self.options.execution_timeout;
                }
            }
            Response::Notify(notification) => {
                if pending.state.awaiting_ack() {
                    pending.state.advance(RequestState::Acked, &correlation_id);
                }
                pending.state.advance(RequestState::Notified, &correlation_id);
                pending.deadline = Instant::now() + self.options.execution_timeout;
                if let Some(progress) = notification.progress {
                    pending.progress.update(progress, notification.details);
                }
            }
            Response::Result(outcome) => {
                if let Some(mut pending) = requests.remove(&correlation_id) {
                    pending
                        .state
                        .advance(RequestState::ResultReceived, &correlation_id);
                    pending.resolve(outcome.into());
                }
            }
        }
    }

    /// Resends requests nobody acknowledged and fails those that ran out of
    /// attempts or whose worker went silent.
    async fn check_timeouts(&self) {
        let now = Instant::now();
        let expired: Vec<(Uuid, PendingRequest)> = {
            let mut requests = self.requests.lock();
            let ids: Vec<Uuid> = requests
                .iter()
                .filter(|(_, pending)| pending.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| requests.remove(&id).map(|pending| (id, pending)))
                .collect()
        };

        for (correlation_id, mut pending) in expired {
            let key = pending.request.key();
            if !pending.state.awaiting_ack() {
                warn!(
                    "Worker '{}' went silent while running atom '{}' (request {})",
                    pending.topic, pending.request.atom_name, correlation_id
                );
                pending.state.advance(RequestState::TimedOut, &correlation_id);
                let error = FlowError::LostWorker {
                    task: key.to_string(),
                    topic: pending.topic.clone(),
                };
                pending.resolve(Err(Failure::from_flow_error(&error)));
                continue;
            }

            let untried: Vec<String> = self
                .workers
                .topics_for(&key)
                .into_iter()
                .filter(|topic| !pending.tried.contains(topic))
                .collect();
            let next_topic = if pending.attempts < self.options.max_dispatch_attempts {
                self.pick_topic(&untried)
            } else {
                None
            };
            match next_topic {
                Some(topic) => {
                    pending
                        .state
                        .advance(RequestState::ExpiredBeforeAck, &correlation_id);
                    let resend_id = Uuid::new_v4();
                    warn!(
                        "Request {} for '{}' was not acknowledged by '{}', resending as {} to '{}'",
                        correlation_id, key, pending.topic, resend_id, topic
                    );
                    let resend = PendingRequest {
                        request: pending.request.renewed(self.options.ack_timeout),
                        state: RequestState::Created,
                        topic: topic.clone(),
                        tried: {
                            let mut tried = pending.tried;
                            tried.push(topic);
                            tried
                        },
                        attempts: pending.attempts + 1,
                        deadline: Instant::now() + self.options.ack_timeout,
                        progress: pending.progress,
                        reply: pending.reply,
                    };
                    self.send(resend_id, resend).await;
                }
                None => {
                    warn!(
                        "Request {} for '{}' timed out after {} attempt(s)",
                        correlation_id, key, pending.attempts
                    );
                    pending.state.advance(RequestState::TimedOut, &correlation_id);
                    let error = FlowError::RequestTimeout {
                        task: key.to_string(),
                        correlation_id: correlation_id.to_string(),
                    };
                    pending.resolve(Err(Failure::from_flow_error(&error)));
                }
            }
        }
    }

    fn on_capabilities(&self, envelope: &Envelope) {
        match envelope.parse_body::<Capabilities>() {
            Ok(capabilities) => self.workers.update(&capabilities.topic, capabilities.tasks),
            Err(e) => warn!("{}", e),
        }
    }
}

#[async_trait]
impl MessageHandler for Inner {
    async fn on_message(&self, envelope: Envelope) {
        match envelope.kind {
            MessageKind::Response => match envelope.parse_body::<Response>() {
                Ok(response) => self.on_response(envelope.correlation_id, response),
                Err(e) => warn!("{}", e),
            },
            MessageKind::Capabilities => self.on_capabilities(&envelope),
            other => warn!(
                "Unexpected {:?} message {} on reply topic '{}'",
                other,
                envelope.correlation_id,
                self.proxy.topic()
            ),
        }
    }

    async fn on_wait(&self) {
        self.check_timeouts().await;
    }
}

/// Consumes the shared capabilities topic.
struct CapabilitiesListener(Arc<Inner>);

#[async_trait]
impl MessageHandler for CapabilitiesListener {
    async fn on_message(&self, envelope: Envelope) {
        match envelope.kind {
            MessageKind::Capabilities => self.0.on_capabilities(&envelope),
            other => debug!("Ignoring {:?} message on the capabilities topic", other),
        }
    }

    async fn on_wait(&self) {
        self.0.workers.prune();
    }
}

/// Dispatches task atoms to remote workers over a `Transport`.
pub struct WorkerTaskExecutor {
    inner: Arc<Inner>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerTaskExecutor {
    pub fn new(transport: Arc<dyn Transport>, mut options: WorkerExecutorOptions) -> Self {
        if options.topic.is_empty() {
            options.topic = format!("executor-{}", Uuid::new_v4());
        }
        let proxy = Proxy::new(&options.exchange, &options.topic, transport.clone());
        let capabilities = Proxy::new(&options.exchange, CAPABILITIES_TOPIC, transport);
        Self {
            inner: Arc::new(Inner {
                workers: WorkersCache::new(options.capability_staleness),
                options,
                proxy,
                capabilities,
                requests: Mutex::new(HashMap::new()),
                rotation: AtomicUsize::new(0),
            }),
            consumers: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &WorkerExecutorOptions {
        &self.inner.options
    }

    /// Topic replies come back on.
    pub fn topic(&self) -> &str {
        self.inner.proxy.topic()
    }

    /// Worker topics currently able to run `atom`.
    pub fn capable_topics(&self, atom: &Atom) -> Vec<String> {
        self.inner.workers.topics_for(&atom.key())
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.requests.lock().len()
    }

    async fn submit(&self, atom: &Atom, request: Request, progress: Progress) -> AtomFuture {
        let name = atom.name().to_string();
        let action = request.action;
        let key = atom.key();
        let topic = match self.inner.pick_topic(&self.inner.workers.topics_for(&key)) {
            Some(topic) => topic,
            None => {
                let error = FlowError::NoCapableWorker {
                    task: key.name.clone(),
                    version: key.version.to_string(),
                };
                warn!("{}", error);
                return Completion::new(name, action, Err(Failure::from_flow_error(&error))).ready();
            }
        };

        let (reply, resolved) = oneshot::channel();
        let correlation_id = Uuid::new_v4();
        let pending = PendingRequest {
            request,
            state: RequestState::Created,
            topic: topic.clone(),
            tried: vec![topic],
            attempts: 1,
            deadline: Instant::now() + self.inner.options.ack_timeout,
            progress,
            reply,
        };
        self.inner.send(correlation_id, pending).await;

        async move {
            let outcome = resolved.await.unwrap_or_else(|_| {
                Err(Failure::new(
                    "Cancelled",
                    "the executor stopped before the request completed",
                ))
            });
            Completion::new(name, action, outcome)
        }
        .boxed()
    }

    async fn discover(&self) {
        let topics = &self.inner.options.topics;
        if topics.is_empty() {
            return;
        }
        for topic in topics {
            let envelope = Envelope::discover(self.inner.proxy.topic());
            if let Err(e) = self.inner.proxy.publish(&envelope, topic).await {
                warn!("Failed to ask '{}' for its capabilities: {}", topic, e);
            }
        }
        let deadline = Instant::now() + self.inner.options.ack_timeout;
        while Instant::now() < deadline {
            if topics.iter().all(|topic| self.inner.workers.contains(topic)) {
                return;
            }
            tokio::time::sleep(self.inner.options.wait_period.min(Duration::from_millis(50))).await;
        }
        let missing: Vec<&String> = topics
            .iter()
            .filter(|topic| !self.inner.workers.contains(topic))
            .collect();
        warn!("Workers {:?} did not answer discovery", missing);
    }
}

#[async_trait]
impl AtomExecutor for WorkerTaskExecutor {
    async fn start(&self) -> Result<()> {
        {
            let mut consumers = self.consumers.lock();
            if !consumers.is_empty() {
                return Ok(());
            }
            let wait_period = self.inner.options.wait_period;

            let inner = self.inner.clone();
            consumers.push(tokio::spawn(async move {
                if let Err(e) = inner.proxy.start(inner.as_ref(), wait_period).await {
                    warn!("Reply consumer stopped: {}", e);
                }
            }));
            let listener = CapabilitiesListener(self.inner.clone());
            consumers.push(tokio::spawn(async move {
                if let Err(e) = listener.0.capabilities.start(&listener, wait_period).await {
                    warn!("Capabilities consumer stopped: {}", e);
                }
            }));
        }

        self.inner.proxy.wait().await;
        self.inner.capabilities.wait().await;
        info!(
            "Worker executor listening on '{}/{}'",
            self.inner.options.exchange,
            self.inner.proxy.topic()
        );
        self.discover().await;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let consumers: Vec<JoinHandle<()>> = self.consumers.lock().drain(..).collect();
        // A stop with no consumer running would be held for the next start.
        if !consumers.is_empty() {
            self.inner.proxy.stop();
            self.inner.capabilities.stop();
        }
        for consumer in consumers {
            let _ = consumer.await;
        }
        let abandoned: Vec<PendingRequest> = self
            .inner
            .requests
            .lock()
            .drain()
            .map(|(_, pending)| pending)
            .collect();
        for pending in abandoned {
            pending.resolve(Err(Failure::new(
                "Cancelled",
                "the executor stopped before the request completed",
            )));
        }
        Ok(())
    }

    async fn execute_task(&self, atom: &Atom, args: Arguments, progress: Progress) -> AtomFuture {
        let request = Request::new(atom, Action::Execute, args, self.inner.options.ack_timeout);
        self.submit(atom, request, progress).await
    }

    async fn revert_task(
        &self,
        atom: &Atom,
        args: Arguments,
        outcome: Outcome,
        progress: Progress,
    ) -> AtomFuture {
        let request = Request::new(atom, Action::Revert, args, self.inner.options.ack_timeout)
            .with_outcome(outcome);
        self.submit(atom, request, progress).await
    }
}

#[cfg(test)]
mod tests;
