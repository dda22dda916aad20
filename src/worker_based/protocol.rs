use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::atom::{Atom, TaskKey, Version};
use crate::engine::states::Action;
use crate::error::{FlowError, Result};
use crate::task::{Arguments, Outcome};
use crate::types::Failure;

/// Topic every worker periodically advertises its endpoints on.
pub const CAPABILITIES_TOPIC: &str = "capabilities";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    Capabilities,
    /// Asks a worker to send its capabilities to `reply_to`.
    Discover,
}

/// What travels over the transport, JSON encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: MessageKind,
    pub correlation_id: Uuid,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub body: Value,
}

impl Envelope {
    fn new<T: Serialize>(
        kind: MessageKind,
        correlation_id: Uuid,
        reply_to: Option<String>,
        body: &T,
    ) -> Result<Self> {
        Ok(Self {
            kind,
            correlation_id,
            reply_to,
            body: serde_json::to_value(body)?,
        })
    }

    pub fn request(correlation_id: Uuid, reply_to: &str, request: &Request) -> Result<Self> {
        Self::new(
            MessageKind::Request,
            correlation_id,
            Some(reply_to.to_string()),
            request,
        )
    }

    pub fn response(correlation_id: Uuid, response: &Response) -> Result<Self> {
        Self::new(MessageKind::Response, correlation_id, None, response)
    }

    pub fn capabilities(capabilities: &Capabilities) -> Result<Self> {
        Self::new(
            MessageKind::Capabilities,
            Uuid::new_v4(),
            None,
            capabilities,
        )
    }

    pub fn discover(reply_to: &str) -> Self {
        Self {
            kind: MessageKind::Discover,
            correlation_id: Uuid::new_v4(),
            reply_to: Some(reply_to.to_string()),
            body: Value::Null,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| FlowError::Protocol(format!("malformed envelope: {}", e)))
    }

    /// Decodes the body as `T`.
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| {
            FlowError::Protocol(format!(
                "malformed {:?} body in message {}: {}",
                self.kind, self.correlation_id, e
            ))
        })
    }
}

/// Wire form of an atom outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteOutcome {
    Success(Value),
    Failure(Failure),
}

impl From<Outcome> for RemoteOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Ok(value) => RemoteOutcome::Success(value),
            Err(failure) => RemoteOutcome::Failure(failure),
        }
    }
}

impl From<RemoteOutcome> for Outcome {
    fn from(outcome: RemoteOutcome) -> Self {
        match outcome {
            RemoteOutcome::Success(value) => Ok(value),
            RemoteOutcome::Failure(failure) => Err(failure),
        }
    }
}

/// Asks a worker to execute or revert one atom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub task_name: String,
    pub version: Version,
    pub atom_name: String,
    pub action: Action,
    #[serde(default)]
    pub arguments: Arguments,
    /// The outcome being reverted; only set for reverts.
    #[serde(default)]
    pub outcome: Option<RemoteOutcome>,
    pub expires_at: DateTime<Utc>,
}

impl Request {
    pub fn new(atom: &Atom, action: Action, arguments: Arguments, timeout: Duration) -> Self {
        let timeout = ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::zero());
        Self {
            task_name: atom.task_name().to_string(),
            version: atom.version(),
            atom_name: atom.name().to_string(),
            action,
            arguments,
            outcome: None,
            expires_at: Utc::now() + timeout,
        }
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    /// The same request with a fresh expiry, for a resend.
    pub fn renewed(&self, timeout: Duration) -> Self {
        let timeout = ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::zero());
        Self {
            expires_at: Utc::now() + timeout,
            ..self.clone()
        }
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.task_name.clone(), self.version)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Progress relayed from a running atom; a heartbeat carries no progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub progress: Option<f32>,
    #[serde(default)]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Response {
    Ack,
    Notify(Notification),
    Result(RemoteOutcome),
}

/// A worker's statement of what it can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub topic: String,
    pub tasks: Vec<TaskKey>,
}

/// Lifecycle of one dispatch attempt, as seen by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Created,
    Sent,
    PendingAck,
    Acked,
    Notified,
    ResultReceived,
    TimedOut,
    ExpiredBeforeAck,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Created => "CREATED",
            RequestState::Sent => "SENT",
            RequestState::PendingAck => "PENDING_ACK",
            RequestState::Acked => "ACKED",
            RequestState::Notified => "NOTIFIED",
            RequestState::ResultReceived => "RESULT_RECEIVED",
            RequestState::TimedOut => "TIMED_OUT",
            RequestState::ExpiredBeforeAck => "EXPIRED_BEFORE_ACK",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::ResultReceived | RequestState::TimedOut | RequestState::ExpiredBeforeAck
        )
    }

    /// True while no worker has accepted the request.
    pub fn awaiting_ack(&self) -> bool {
        matches!(
            self,
            RequestState::Created | RequestState::Sent | RequestState::PendingAck
        )
    }

    pub fn can_transition_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        match (self, next) {
            (Created, Sent) => true,
            (Sent, PendingAck) => true,
            (Sent, Acked) | (PendingAck, Acked) => true,
            (Acked, Notified) | (Notified, Notified) => true,
            // A worker may answer without a notification in between.
            (Sent, ResultReceived)
            | (PendingAck, ResultReceived)
            | (Acked, ResultReceived)
            | (Notified, ResultReceived) => true,
            (Sent, ExpiredBeforeAck) | (PendingAck, ExpiredBeforeAck) => true,
            (Sent, TimedOut) | (PendingAck, TimedOut) => true,
            (Acked, TimedOut) | (Notified, TimedOut) => true,
            _ => false,
        }
    }

    /// Moves to `next` when the transition is allowed.
    pub fn advance(&mut self, next: RequestState, correlation_id: &Uuid) -> bool {
        if self.can_transition_to(next) {
            debug!("Request {} {} -> {}", correlation_id, self, next);
            *self = next;
            true
        } else {
            debug!(
                "Ignoring transition of request {} from {} to {}",
                correlation_id, self, next
            );
            false
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
