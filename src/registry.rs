//! Listener registry and handler signature binding.
//!
//! Handlers are plain Rust closures, so there is no runtime reflection to
//! decide how an event's arguments map onto them. Instead each handler is
//! registered with a [`Signature`] describing the parameters it accepts, and
//! every dispatch binds the event's positional and keyword arguments against
//! it before the closure runs. Binding failures never reach the closure.

use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use serde::de::DeserializeOwned;

use crate::error::{HandlerInvocationError, InvocationErrorKind};
use crate::event::Event;
use crate::value::Value;

/// Callback invoked with the bound arguments of a matching event.
pub type Handler = Box<dyn FnMut(&BoundArgs<'_>) -> anyhow::Result<()> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Param {
    name: String,
    required: bool,
}

/// Parameters a handler accepts.
///
/// Positional arguments fill the declared parameters in order, keyword
/// arguments fill them by name. Surplus positionals or unknown keywords are
/// only accepted when the matching catch-all is enabled.
///
/// ```
/// use mpdispatch::Signature;
///
/// // Equivalent to `def handler(name, greeting=None, **extra)`.
/// let sig = Signature::new().required("name").optional("greeting").var_kwargs();
/// assert_eq!(sig.arity(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<Param>,
    var_args: bool,
    var_kwargs: bool,
}

impl Signature {
    /// A signature that accepts no arguments at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts any positional and keyword arguments.
    pub fn any() -> Self {
        Self::new().var_args().var_kwargs()
    }

    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            required: false,
        });
        self
    }

    pub fn var_args(mut self) -> Self {
        self.var_args = true;
        self
    }

    pub fn var_kwargs(mut self) -> Self {
        self.var_kwargs = true;
        self
    }

    /// Number of named parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Binds an event's arguments to this signature.
    pub fn bind<'a>(&self, event: &'a Event) -> Result<BoundArgs<'a>, InvocationErrorKind> {
        let args = event.args();
        let declared = self.params.len();
        if args.len() > declared && !self.var_args {
            return Err(InvocationErrorKind::TooManyPositional {
                expected: declared,
                given: args.len(),
            });
        }

        let split = args.len().min(declared);
        let mut slots: Vec<Option<&'a Value>> = vec![None; declared];
        for (slot, value) in slots.iter_mut().zip(&args[..split]) {
            *slot = Some(value);
        }

        let mut rest_kwargs = BTreeMap::new();
        for (key, value) in event.kwargs() {
            match self.params.iter().position(|p| p.name == *key) {
                Some(i) if slots[i].is_some() => {
                    return Err(InvocationErrorKind::MultipleValues(key.clone()));
                }
                Some(i) => slots[i] = Some(value),
                None if self.var_kwargs => {
                    rest_kwargs.insert(key.as_str(), value);
                }
                None => return Err(InvocationErrorKind::UnexpectedKeyword(key.clone())),
            }
        }

        if let Some(missing) = self
            .params
            .iter()
            .zip(&slots)
            .find(|(p, v)| p.required && v.is_none())
        {
            return Err(InvocationErrorKind::MissingArgument(missing.0.name.clone()));
        }

        Ok(BoundArgs {
            event,
            params: self
                .params
                .iter()
                .map(|p| p.name.clone())
                .zip(slots)
                .collect(),
            rest: &args[split..],
            rest_kwargs,
        })
    }
}

/// Arguments of one event, bound to a handler's [`Signature`].
#[derive(Debug)]
pub struct BoundArgs<'a> {
    event: &'a Event,
    params: Vec<(String, Option<&'a Value>)>,
    rest: &'a [Value],
    rest_kwargs: BTreeMap<&'a str, &'a Value>,
}

impl<'a> BoundArgs<'a> {
    /// Name of the event being dispatched.
    pub fn event(&self) -> &'a str {
        self.event.name()
    }

    /// Value bound to a declared parameter, or a keyword collected by the
    /// var-keyword catch-all. `None` for an omitted optional parameter.
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| *v)
            .or_else(|| self.rest_kwargs.get(name).copied())
    }

    /// Deserializes the argument bound to `name`.
    pub fn parse<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        self.get(name)
            .ok_or_else(|| anyhow!("argument {name:?} was not supplied"))?
            .parse()
    }

    /// The `i`-th positional argument as fired.
    pub fn arg(&self, i: usize) -> Option<&'a Value> {
        self.event.args().get(i)
    }

    /// A keyword argument as fired.
    pub fn kwarg(&self, name: &str) -> Option<&'a Value> {
        self.event.kwargs().get(name)
    }

    /// Positional arguments beyond the declared parameters.
    pub fn rest(&self) -> &'a [Value] {
        self.rest
    }

    /// Keyword arguments that matched no declared parameter.
    pub fn rest_kwargs(&self) -> &BTreeMap<&'a str, &'a Value> {
        &self.rest_kwargs
    }
}

struct Listener {
    signature: Signature,
    handler: Handler,
}

/// Event name to handlers, in registration order. Owned by one receiver.
#[derive(Default)]
pub struct Registry {
    listeners: HashMap<String, Vec<Listener>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler for `event`. Registering the same closure twice makes
    /// it run twice per event.
    pub fn connect(&mut self, event: impl Into<String>, signature: Signature, handler: Handler) {
        self.listeners
            .entry(event.into())
            .or_default()
            .push(Listener { signature, handler });
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }

    /// Invokes every handler registered for the event, in order.
    ///
    /// Events nobody listens to are dropped and count as zero handlers. The
    /// first handler that cannot be bound or returns an error stops dispatch
    /// of this event; the registry is left as it was.
    pub fn dispatch(&mut self, event: &Event) -> Result<usize, HandlerInvocationError> {
        let Some(listeners) = self.listeners.get_mut(event.name()) else {
            tracing::trace!(event = event.name(), "no listeners, dropping event");
            return Ok(0);
        };

        for (i, listener) in listeners.iter_mut().enumerate() {
            let fail = |kind| HandlerInvocationError {
                event: event.name().to_owned(),
                handler: i,
                kind,
            };
            let bound = listener.signature.bind(event).map_err(fail)?;
            (listener.handler)(&bound).map_err(|e| fail(InvocationErrorKind::Failed(e)))?;
        }
        Ok(listeners.len())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: BTreeMap<_, _> = self
            .listeners
            .iter()
            .map(|(k, v)| (k.as_str(), v.len()))
            .collect();
        f.debug_struct("Registry").field("listeners", &counts).finish()
    }
}
