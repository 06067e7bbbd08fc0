//! `execution` domain: launch contexts and URI mapping.

use std::sync::Arc;

use serde_json::json;

use crate::correlator::Reply;
use crate::error::ClientError;
use crate::protocol::{Event, RequestId};
use crate::server::AnalysisServer;

#[derive(Clone)]
pub struct ExecutionDomain {
    server: Arc<AnalysisServer>,
}

impl ExecutionDomain {
    pub(crate) fn new(server: Arc<AnalysisServer>) -> Self {
        Self { server }
    }

    /// Create an execution context rooted at `context_root`. The result
    /// carries the context `id`.
    pub fn create_context(&self, context_root: &str, reply: Reply) -> Result<RequestId, ClientError> {
        self.server.request(
            "execution.createContext",
            Some(json!({ "contextRoot": context_root })),
            reply,
        )
    }

    pub fn delete_context(&self, id: &str, reply: Reply) -> Result<RequestId, ClientError> {
        self.server
            .request("execution.deleteContext", Some(json!({ "id": id })), reply)
    }

    /// Map a file to a URI or a URI to a file within context `id`.
    ///
    /// Exactly one of `file` and `uri` should be given; the server rejects
    /// the request otherwise.
    pub fn map_uri(
        &self,
        id: &str,
        file: Option<&str>,
        uri: Option<&str>,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        let mut params = json!({ "id": id });
        if let Some(file) = file {
            params["file"] = json!(file);
        }
        if let Some(uri) = uri {
            params["uri"] = json!(uri);
        }
        self.server.request("execution.mapUri", Some(params), reply)
    }

    pub fn set_subscriptions(
        &self,
        subscriptions: &[&str],
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "execution.setSubscriptions",
            Some(json!({ "subscriptions": subscriptions })),
            reply,
        )
    }

    pub fn on_launch_data(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("execution.launchData", callback);
    }
}
