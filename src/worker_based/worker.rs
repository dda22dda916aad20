use log::{error, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::endpoint::EndpointRegistry;
use super::protocol::CAPABILITIES_TOPIC;
use super::proxy::Transport;
use super::server::Server;
use crate::engine::executor::default_workers;
use crate::engine::options::duration_ms;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerOptions {
    pub exchange: String,
    pub topic: String,
    pub threads_count: usize,
    /// How often a running atom's worker reports that it is alive
    #[serde(with = "duration_ms")]
    pub notify_period: Duration,
    #[serde(with = "duration_ms")]
    pub advertise_period: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            exchange: String::from("atomflow"),
            topic: String::from("worker"),
            threads_count: default_workers(),
            notify_period: Duration::from_secs(5),
            advertise_period: Duration::from_secs(30),
        }
    }
}

impl WorkerOptions {
    pub fn new(exchange: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            topic: topic.into(),
            ..Self::default()
        }
    }

    pub fn with_threads_count(mut self, value: usize) -> Self {
        self.threads_count = value;
        self
    }

    pub fn with_notify_period(mut self, value: Duration) -> Self {
        self.notify_period = value;
        self
    }

    pub fn with_advertise_period(mut self, value: Duration) -> Self {
        self.advertise_period = value;
        self
    }
}

/// A process-side host for endpoints, reachable through the transport.
pub struct Worker {
    options: WorkerOptions,
    endpoints: Arc<EndpointRegistry>,
    server: Arc<Server>,
    advertiser: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(options: WorkerOptions, endpoints: EndpointRegistry, transport: Arc<dyn Transport>) -> Self {
        let endpoints = Arc::new(endpoints);
        let server = Arc::new(Server::new(
            &options.exchange,
            &options.topic,
            transport,
            endpoints.clone(),
            options.threads_count,
            options.notify_period,
        ));
        Self {
            options,
            endpoints,
            server,
            advertiser: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.options.topic
    }

    /// Serves requests until `stop` is called.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting the '{}' topic worker in {} threads.",
            self.options.topic, self.options.threads_count
        );
        info!("Tasks list:");
        for endpoint in self.endpoints.iter() {
            info!("|-- {}", endpoint);
        }

        let server = self.server.clone();
        let period = self.options.advertise_period;
        let advertiser = tokio::spawn(async move {
            server.wait().await;
            let mut tick = tokio::time::interval(period);
            loop {
                tick.tick().await;
                if let Err(e) = server.advertise(CAPABILITIES_TOPIC).await {
                    error!("Failed to advertise '{}': {}", server.topic(), e);
                }
            }
        });
        if let Some(previous) = self.advertiser.lock().replace(advertiser) {
            previous.abort();
        }

        let result = self.server.start().await;
        if let Some(advertiser) = self.advertiser.lock().take() {
            advertiser.abort();
        }
        result
    }

    /// Resolves once the worker is consuming requests.
    pub async fn wait(&self) {
        self.server.wait().await
    }

    pub fn stop(&self) {
        info!("Stopping the '{}' topic worker.", self.options.topic);
        self.server.stop()
    }
}
