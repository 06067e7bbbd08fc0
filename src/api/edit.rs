//! `edit` domain: formatting, assists, fixes and refactorings.
//!
//! Nothing here modifies files. Results describe edits for the client to
//! apply.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::correlator::Reply;
use crate::error::ClientError;
use crate::protocol::RequestId;
use crate::server::AnalysisServer;

#[derive(Clone)]
pub struct EditDomain {
    server: Arc<AnalysisServer>,
}

impl EditDomain {
    pub(crate) fn new(server: Arc<AnalysisServer>) -> Self {
        Self { server }
    }

    /// Format `file`, tracking where the selection ends up.
    pub fn format(
        &self,
        file: &str,
        selection_offset: usize,
        selection_length: usize,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "edit.format",
            Some(json!({
                "file": file,
                "selectionOffset": selection_offset,
                "selectionLength": selection_length,
            })),
            reply,
        )
    }

    pub fn get_assists(
        &self,
        file: &str,
        offset: usize,
        length: usize,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "edit.getAssists",
            Some(json!({ "file": file, "offset": offset, "length": length })),
            reply,
        )
    }

    pub fn get_available_refactorings(
        &self,
        file: &str,
        offset: usize,
        length: usize,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "edit.getAvailableRefactorings",
            Some(json!({ "file": file, "offset": offset, "length": length })),
            reply,
        )
    }

    pub fn get_fixes(&self, file: &str, offset: usize, reply: Reply) -> Result<RequestId, ClientError> {
        self.server.request(
            "edit.getFixes",
            Some(json!({ "file": file, "offset": offset })),
            reply,
        )
    }

    /// Compute the changes for a refactoring of `kind` (e.g. `RENAME`).
    ///
    /// With `validate_only` the server only checks feasibility. `options`
    /// holds the kind-specific options object and is omitted when `None`.
    #[allow(clippy::too_many_arguments)]
    pub fn get_refactoring(
        &self,
        kind: &str,
        file: &str,
        offset: usize,
        length: usize,
        validate_only: bool,
        options: Option<Value>,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        let mut params = json!({
            "kind": kind,
            "file": file,
            "offset": offset,
            "length": length,
            "validateOnly": validate_only,
        });
        if let Some(options) = options {
            params["options"] = options;
        }
        self.server.request("edit.getRefactoring", Some(params), reply)
    }

    pub fn sort_members(&self, file: &str, reply: Reply) -> Result<RequestId, ClientError> {
        self.server
            .request("edit.sortMembers", Some(json!({ "file": file })), reply)
    }
}
