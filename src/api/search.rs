//! `search` domain. Every request returns a search `id` and the matches
//! arrive as `search.results` events.

use std::sync::Arc;

use serde_json::json;

use crate::correlator::Reply;
use crate::error::ClientError;
use crate::protocol::{Event, RequestId};
use crate::server::AnalysisServer;

#[derive(Clone)]
pub struct SearchDomain {
    server: Arc<AnalysisServer>,
}

impl SearchDomain {
    pub(crate) fn new(server: Arc<AnalysisServer>) -> Self {
        Self { server }
    }

    pub fn find_element_references(
        &self,
        file: &str,
        offset: usize,
        include_potential: bool,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "search.findElementReferences",
            Some(json!({
                "file": file,
                "offset": offset,
                "includePotential": include_potential,
            })),
            reply,
        )
    }

    pub fn find_member_declarations(&self, name: &str, reply: Reply) -> Result<RequestId, ClientError> {
        self.server.request(
            "search.findMemberDeclarations",
            Some(json!({ "name": name })),
            reply,
        )
    }

    pub fn find_member_references(&self, name: &str, reply: Reply) -> Result<RequestId, ClientError> {
        self.server.request(
            "search.findMemberReferences",
            Some(json!({ "name": name })),
            reply,
        )
    }

    /// `pattern` is a regular expression matched against top-level names.
    pub fn find_top_level_declarations(
        &self,
        pattern: &str,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "search.findTopLevelDeclarations",
            Some(json!({ "pattern": pattern })),
            reply,
        )
    }

    /// Unlike the other searches this answers directly with `hierarchyItems`.
    pub fn get_type_hierarchy(
        &self,
        file: &str,
        offset: usize,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "search.getTypeHierarchy",
            Some(json!({ "file": file, "offset": offset })),
            reply,
        )
    }

    pub fn on_results(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("search.results", callback);
    }
}
