use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::FlowError;
use crate::task::{Arguments, Retry, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FlowError::InvalidState(format!("invalid version '{}'", s));
        let (major, minor) = match s.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (s, "0"),
        };
        Ok(Version {
            major: major.trim().parse().map_err(|_| invalid())?,
            minor: minor.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// Key under which workers advertise what they can run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskKey {
    pub name: String,
    pub version: Version,
}

impl TaskKey {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

#[derive(Clone)]
pub enum AtomKind {
    Task(Arc<dyn Task>),
    Retry(Arc<dyn Retry>),
}

/// A named unit of work together with its data dependencies.
///
/// `requires` and `optional` name the arguments the atom takes; `rebind`
/// maps an argument to a differently named symbol; `inject` supplies values
/// that need no provider. `provides` names the symbols its result fills.
#[derive(Clone)]
pub struct Atom {
    name: String,
    task_name: String,
    version: Version,
    requires: Vec<String>,
    optional: Vec<String>,
    provides: Vec<String>,
    rebind: HashMap<String, String>,
    inject: Arguments,
    kind: AtomKind,
}

impl Atom {
    fn with_kind(name: String, kind: AtomKind) -> Self {
        Self {
            task_name: name.clone(),
            name,
            version: Version::default(),
            requires: Vec::new(),
            optional: Vec::new(),
            provides: Vec::new(),
            rebind: HashMap::new(),
            inject: Arguments::new(),
            kind,
        }
    }

    pub fn task<T: Task + 'static>(name: impl Into<String>, task: T) -> Self {
        Self::with_kind(name.into(), AtomKind::Task(Arc::new(task)))
    }

    pub fn from_task(name: impl Into<String>, task: Arc<dyn Task>) -> Self {
        Self::with_kind(name.into(), AtomKind::Task(task))
    }

    pub fn retry<R: Retry + 'static>(name: impl Into<String>, retry: R) -> Self {
        Self::with_kind(name.into(), AtomKind::Retry(Arc::new(retry)))
    }

    pub fn with_requires(mut self, args: &[&str]) -> Self {
        self.requires.extend(args.iter().map(|a| a.to_string()));
        self
    }

    pub fn with_optional(mut self, args: &[&str]) -> Self {
        self.optional.extend(args.iter().map(|a| a.to_string()));
        self
    }

    pub fn with_provides(mut self, symbols: &[&str]) -> Self {
        self.provides.extend(symbols.iter().map(|s| s.to_string()));
        self
    }

    /// Reads argument `arg` from `symbol` instead of a symbol of the same name.
    pub fn with_rebind(mut self, arg: &str, symbol: &str) -> Self {
        self.rebind.insert(arg.to_string(), symbol.to_string());
        self
    }

    pub fn with_inject(mut self, arg: &str, value: Value) -> Self {
        self.inject.insert(arg.to_string(), value);
        self
    }

    pub fn with_version(mut self, major: u32, minor: u32) -> Self {
        self.version = Version::new(major, minor);
        self
    }

    /// Name under which workers know this atom's code.
    pub fn with_task_name(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = task_name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.task_name.clone(), self.version)
    }

    pub fn kind(&self) -> &AtomKind {
        &self.kind
    }

    pub fn is_retry(&self) -> bool {
        matches!(self.kind, AtomKind::Retry(_))
    }

    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    pub fn optional(&self) -> &[String] {
        &self.optional
    }

    pub fn provides(&self) -> &[String] {
        &self.provides
    }

    pub fn inject(&self) -> &Arguments {
        &self.inject
    }

    /// The symbol an argument is read from.
    pub fn symbol_for<'a>(&'a self, arg: &'a str) -> &'a str {
        self.rebind.get(arg).map(String::as_str).unwrap_or(arg)
    }

    /// `(argument, symbol)` pairs for every required and optional argument.
    pub fn rebind_map(&self) -> Vec<(String, String)> {
        self.requires
            .iter()
            .chain(self.optional.iter())
            .map(|arg| (arg.clone(), self.symbol_for(arg).to_string()))
            .collect()
    }

    /// Picks the value for `symbol` out of this atom's execution result.
    pub fn provided_value(&self, result: &Value, symbol: &str) -> Option<Value> {
        let position = self.provides.iter().position(|s| s == symbol)?;
        if self.provides.len() == 1 {
            return Some(result.clone());
        }
        match result {
            Value::Object(map) => map.get(symbol).cloned(),
            Value::Array(items) => items.get(position).cloned(),
            _ => None,
        }
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("name", &self.name)
            .field("task_name", &self.task_name)
            .field("version", &self.version)
            .field("retry", &self.is_retry())
            .field("requires", &self.requires)
            .field("provides", &self.provides)
            .finish()
    }
}
