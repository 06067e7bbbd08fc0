//! Event routing: at most one subscriber per event name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::Job;
use crate::protocol::Event;

/// Callback for a server notification. Invoked once per matching event.
pub type OnEvent = Arc<dyn Fn(Event) + Send + Sync + 'static>;

/// Event name to callback map with replace-on-register semantics.
///
/// Events with no subscriber at delivery time are dropped; nothing is
/// buffered for late subscribers.
#[derive(Default)]
pub struct Subscriptions {
    callbacks: HashMap<String, OnEvent>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`. Returns true if it replaced an
    /// earlier subscriber.
    pub fn subscribe(&mut self, event: impl Into<String>, callback: OnEvent) -> bool {
        self.callbacks.insert(event.into(), callback).is_some()
    }

    pub fn is_subscribed(&self, event: &str) -> bool {
        self.callbacks.contains_key(event)
    }

    /// Build the job delivering `event` to its subscriber, if there is one.
    pub fn route(&self, event: Event) -> Option<Job> {
        let callback = Arc::clone(self.callbacks.get(&event.event)?);
        Some(Box::new(move || callback(event)))
    }
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.callbacks.keys()).finish()
    }
}
