//! Events and their wire frames.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result, TransportError};
use crate::value::Value;

/// Positional and keyword arguments for [`Sender::fire`](crate::Sender::fire).
///
/// ```
/// use mpdispatch::Args;
///
/// let args = Args::new().arg("Alice").kwarg("times", 3);
/// assert_eq!(args.positional().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Args {
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Appends a positional argument built from any serializable value.
    pub fn serialized_arg<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let value = Value::from_serialize(value).map_err(|e| rename(e, self.args.len()))?;
        self.args.push(value);
        Ok(self)
    }

    pub fn positional(&self) -> &[Value] {
        &self.args
    }

    pub fn keywords(&self) -> &BTreeMap<String, Value> {
        &self.kwargs
    }
}

fn rename(err: DispatchError, index: usize) -> DispatchError {
    match err {
        DispatchError::UnsupportedArgumentType { reason, .. } => {
            DispatchError::unsupported(format!("args[{index}]"), reason)
        }
        other => other,
    }
}

impl From<Vec<Value>> for Args {
    fn from(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: BTreeMap::new(),
        }
    }
}

/// A named occurrence with arguments. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    name: String,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl Event {
    /// Builds an event, checking that it can be carried across processes.
    pub fn new(name: impl Into<String>, args: Args) -> Result<Self> {
        let event = Self {
            name: name.into(),
            args: args.args,
            kwargs: args.kwargs,
        };
        event.validate()?;
        Ok(event)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &BTreeMap<String, Value> {
        &self.kwargs
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DispatchError::InvalidEventName);
        }
        for (i, arg) in self.args.iter().enumerate() {
            arg.validate(&format!("args[{i}]"))?;
        }
        for (k, v) in &self.kwargs {
            v.validate(&format!("kwargs.{k}"))?;
        }
        Ok(())
    }
}

/// A unit carried by the transport queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Frame {
    Event(Event),
    Close,
}

impl Frame {
    pub(crate) fn encode(&self) -> std::result::Result<Vec<u8>, TransportError> {
        serde_json::to_vec(self).map_err(TransportError::Encode)
    }

    pub(crate) fn decode(bytes: &[u8]) -> std::result::Result<Self, TransportError> {
        let frame: Frame =
            serde_json::from_slice(bytes).map_err(|e| TransportError::Decode(e.to_string()))?;
        if let Frame::Event(event) = &frame {
            event
                .validate()
                .map_err(|e| TransportError::Decode(e.to_string()))?;
        }
        Ok(frame)
    }
}
