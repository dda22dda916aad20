use serde::{Deserialize, Serialize};
use std::any::Any;
use std::error::Error;
use std::fmt;

use crate::error::FlowError;

const GENERIC_ERROR: &str = "Error";

/// A captured error: its type names, message, rendered trace and causes.
///
/// Failures are plain values. They are persisted with the atom that raised
/// them, shipped across the worker transport and handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    exc_type_names: Vec<String>,
    message: String,
    #[serde(default)]
    traceback: Option<String>,
    #[serde(default)]
    causes: Vec<Failure>,
}

impl Failure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let kind = kind.into();
        let mut exc_type_names = vec![kind.clone()];
        if kind != GENERIC_ERROR {
            exc_type_names.push(GENERIC_ERROR.to_string());
        }
        Self {
            exc_type_names,
            message: message.into(),
            traceback: None,
            causes: Vec::new(),
        }
    }

    /// Captures an error raised by atom code, following its `source()` chain.
    pub fn from_error(err: &(dyn Error + 'static)) -> Self {
        let mut failure = Failure::new(kind_of(err), err.to_string());
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            failure
                .causes
                .push(Failure::new(kind_of(cause), cause.to_string()));
            source = cause.source();
        }
        if !chain.is_empty() {
            failure.traceback = Some(
                chain
                    .iter()
                    .map(|line| format!("Caused by: {}", line))
                    .collect::<Vec<_>>()
                    .join("\n"),
            );
        }
        failure
    }

    pub fn from_flow_error(err: &FlowError) -> Self {
        Failure::new(err.kind(), err.to_string())
    }

    /// Captures the payload of a panicking atom.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "atom panicked".to_string()
        };
        Failure::new("Panic", message)
    }

    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.causes.push(cause);
        self
    }

    pub fn exception_str(&self) -> &str {
        &self.message
    }

    pub fn exc_type_names(&self) -> &[String] {
        &self.exc_type_names
    }

    pub fn traceback(&self) -> Option<&str> {
        self.traceback.as_deref()
    }

    pub fn causes(&self) -> &[Failure] {
        &self.causes
    }

    /// Returns the first of `kinds` this failure is an instance of.
    pub fn check<'a>(&self, kinds: &[&'a str]) -> Option<&'a str> {
        kinds
            .iter()
            .copied()
            .find(|kind| self.exc_type_names.iter().any(|name| name == kind))
    }

    /// Same type names and message; traceback and causes are ignored.
    pub fn matches(&self, other: &Failure) -> bool {
        self.exc_type_names == other.exc_type_names && self.message == other.message
    }

    pub fn pformat(&self, traceback: bool) -> String {
        let mut buf = format!("Failure: {}: {}", self.exc_type_names[0], self.message);
        if traceback {
            match &self.traceback {
                Some(tb) => {
                    buf.push_str("\nTraceback (most recent call last):\n");
                    buf.push_str(tb);
                }
                None => buf.push_str("\nTraceback not available."),
            }
        }
        for cause in &self.causes {
            buf.push_str("\n  ");
            buf.push_str(&cause.pformat(false).replace('\n', "\n  "));
        }
        buf
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exc_type_names[0], self.message)
    }
}

fn kind_of(err: &(dyn Error + 'static)) -> &'static str {
    match err.downcast_ref::<FlowError>() {
        Some(flow_err) => flow_err.kind(),
        None => GENERIC_ERROR,
    }
}

/// One or more failures that ended a run.
#[derive(Debug, Clone, PartialEq)]
pub struct WrappedFailure {
    failures: Vec<Failure>,
}

impl WrappedFailure {
    pub fn new(failures: Vec<Failure>) -> Self {
        Self { failures }
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Failure> {
        self.failures.iter()
    }

    /// Returns the first failure that is an instance of any of `kinds`.
    pub fn check(&self, kinds: &[&str]) -> Option<&Failure> {
        self.failures.iter().find(|f| f.check(kinds).is_some())
    }
}

impl fmt::Display for WrappedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.failures.iter().map(|fail| fail.to_string()).collect();
        write!(f, "WrappedFailure: [{}]", parts.join(", "))
    }
}

#[cfg(test)]
mod tests;
