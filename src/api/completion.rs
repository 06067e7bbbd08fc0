use std::sync::Arc;

use serde_json::json;

use crate::correlator::Reply;
use crate::error::ClientError;
use crate::protocol::{Event, RequestId};
use crate::server::AnalysisServer;

/// Facade for `completion.*`.
#[derive(Clone)]
pub struct CompletionDomain {
    server: Arc<AnalysisServer>,
}

impl CompletionDomain {
    pub(crate) fn new(server: Arc<AnalysisServer>) -> Self {
        Self { server }
    }

    /// Start a completion at `offset`.
    ///
    /// The result only carries a completion `id`; suggestions arrive later
    /// as `completion.results` events tagged with that id.
    pub fn get_suggestions(
        &self,
        file: &str,
        offset: usize,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "completion.getSuggestions",
            Some(json!({ "file": file, "offset": offset })),
            reply,
        )
    }

    pub fn on_results(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("completion.results", callback);
    }
}
