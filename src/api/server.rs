//! `server` domain: lifecycle and global subscriptions.

use std::sync::Arc;

use serde_json::json;

use super::no_params;
use crate::correlator::Reply;
use crate::error::ClientError;
use crate::protocol::{Event, RequestId};
use crate::server::AnalysisServer;

#[derive(Clone)]
pub struct ServerDomain {
    server: Arc<AnalysisServer>,
}

impl ServerDomain {
    pub(crate) fn new(server: Arc<AnalysisServer>) -> Self {
        Self { server }
    }

    /// Ask for the server's version. The result carries `version`.
    pub fn get_version(&self, reply: Reply) -> Result<RequestId, ClientError> {
        self.server.request("server.getVersion", no_params(), reply)
    }

    /// Ask the server to shut down cleanly.
    ///
    /// Requests still unanswered when the server handles this are never
    /// answered. The process itself is reaped by `stop()`.
    pub fn shutdown(&self, reply: Reply) -> Result<RequestId, ClientError> {
        self.server.request("server.shutdown", no_params(), reply)
    }

    /// Replace the set of subscribed server services (e.g. `"STATUS"`).
    pub fn set_subscriptions(
        &self,
        subscriptions: &[&str],
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "server.setSubscriptions",
            Some(json!({ "subscriptions": subscriptions })),
            reply,
        )
    }

    /// Sent once, before any request is processed.
    pub fn on_connected(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("server.connected", callback);
    }

    pub fn on_error(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("server.error", callback);
    }

    pub fn on_status(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("server.status", callback);
    }
}
