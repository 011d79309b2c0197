//! Handler routing: destination patterns → message handlers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use beacon_protocol::Message;
use regex::{Regex, RegexSet};

use crate::error::{DeviceSdkError, Result};

/// Implement this trait to receive inbound messages.
///
/// Handlers run synchronously on the client's read loop: a slow handler
/// delays delivery of every later message, so hand long work off to a task
/// or channel.  The message is only borrowed for the duration of the call.
///
/// Any `Fn(&Message)` closure is a handler:
///
/// ```rust,no_run
/// # use beacon_device_sdk::HandlerRegistration;
/// let reg = HandlerRegistration::new("^event:device-status/", |msg: &beacon_device_sdk::Message| {
///     println!("status event for {}", msg.destination);
/// });
/// ```
pub trait MessageHandler: Send + Sync + 'static {
    fn handle_message(&self, msg: &Message);
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) + Send + Sync + 'static,
{
    fn handle_message(&self, msg: &Message) {
        self(msg)
    }
}

/// A destination pattern (regular expression) and the handler it feeds.
#[derive(Clone)]
pub struct HandlerRegistration {
    pub pattern: String,
    pub handler: Arc<dyn MessageHandler>,
}

impl HandlerRegistration {
    pub fn new<H: MessageHandler>(pattern: impl Into<String>, handler: H) -> Self {
        Self {
            pattern: pattern.into(),
            handler: Arc::new(handler),
        }
    }

    /// Register a pre-wrapped handler, e.g. one shared by several patterns.
    pub fn from_arc(pattern: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            pattern: pattern.into(),
            handler,
        }
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Compiled routing table.
///
/// Patterns are compiled once into a [`RegexSet`] whose indices run
/// parallel to `handlers`.  Every matching handler is invoked, in
/// registration order; there is no first-match-wins.
pub struct HandlerRouter {
    matchers: RegexSet,
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl HandlerRouter {
    pub fn compile(registrations: &[HandlerRegistration]) -> Result<Self> {
        // Validate one by one so the error names the offending pattern.
        for reg in registrations {
            Regex::new(&reg.pattern).map_err(|source| DeviceSdkError::InvalidPattern {
                pattern: reg.pattern.clone(),
                source,
            })?;
        }

        let matchers = RegexSet::new(registrations.iter().map(|r| r.pattern.as_str())).map_err(
            |source| DeviceSdkError::InvalidPattern {
                pattern: registrations
                    .iter()
                    .map(|r| r.pattern.as_str())
                    .collect::<Vec<_>>()
                    .join(" | "),
                source,
            },
        )?;

        Ok(Self {
            matchers,
            handlers: registrations.iter().map(|r| r.handler.clone()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Indices of the registrations matching `destination`, ascending.
    pub fn matching(&self, destination: &str) -> Vec<usize> {
        self.matchers.matches(destination).into_iter().collect()
    }

    /// Deliver `msg` to every matching handler.  Returns how many ran.
    ///
    /// A panicking handler is logged and skipped; the remaining handlers
    /// still receive the message.
    pub fn dispatch(&self, msg: &Message) -> usize {
        let mut delivered = 0;
        for idx in self.matchers.matches(&msg.destination).into_iter() {
            let handler = &self.handlers[idx];
            match catch_unwind(AssertUnwindSafe(|| handler.handle_message(msg))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::error!(
                        dest = %msg.destination,
                        pattern = %self.matchers.patterns()[idx],
                        "message handler panicked"
                    );
                }
            }
        }
        if delivered == 0 {
            tracing::trace!(dest = %msg.destination, "no handler matched");
        }
        delivered
    }
}
