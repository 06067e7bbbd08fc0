//! `analysis` domain: analysis roots, file overlays and per-file results.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use super::no_params;
use crate::correlator::Reply;
use crate::error::ClientError;
use crate::protocol::{Event, RequestId};
use crate::server::AnalysisServer;

/// Facade for `analysis.*` requests and notifications.
///
/// File arguments are absolute paths as the server expects them; offsets and
/// lengths are in UTF-16 code units of the file content.
#[derive(Clone)]
pub struct AnalysisDomain {
    server: Arc<AnalysisServer>,
}

impl AnalysisDomain {
    pub(crate) fn new(server: Arc<AnalysisServer>) -> Self {
        Self { server }
    }

    /// Errors for `file`. The result carries `errors`.
    pub fn get_errors(&self, file: &str, reply: Reply) -> Result<RequestId, ClientError> {
        self.server
            .request("analysis.getErrors", Some(json!({ "file": file })), reply)
    }

    /// Hover information at `offset`. The result carries `hovers`.
    pub fn get_hover(
        &self,
        file: &str,
        offset: usize,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "analysis.getHover",
            Some(json!({ "file": file, "offset": offset })),
            reply,
        )
    }

    /// Library paths and package maps. The result carries `libraries` and
    /// `packageMap`.
    pub fn get_library_dependencies(&self, reply: Reply) -> Result<RequestId, ClientError> {
        self.server
            .request("analysis.getLibraryDependencies", no_params(), reply)
    }

    pub fn get_navigation(
        &self,
        file: &str,
        offset: usize,
        length: usize,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "analysis.getNavigation",
            Some(json!({ "file": file, "offset": offset, "length": length })),
            reply,
        )
    }

    /// Discard and recompute results for `roots`, or for every root when
    /// `roots` is `None`.
    pub fn reanalyze(&self, roots: Option<&[&str]>, reply: Reply) -> Result<RequestId, ClientError> {
        let params = match roots {
            Some(roots) => json!({ "roots": roots }),
            None => json!({}),
        };
        self.server.request("analysis.reanalyze", Some(params), reply)
    }

    /// Replace the analysis roots.
    ///
    /// `package_roots` maps source directories to package directories; `None`
    /// leaves package resolution to `pubspec.yaml`.
    pub fn set_analysis_roots(
        &self,
        included: &[&str],
        excluded: &[&str],
        package_roots: Option<&BTreeMap<String, String>>,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        let mut params = json!({ "included": included, "excluded": excluded });
        if let Some(package_roots) = package_roots {
            params["packageRoots"] = json!(package_roots);
        }
        self.server
            .request("analysis.setAnalysisRoots", Some(params), reply)
    }

    pub fn set_priority_files(&self, files: &[&str], reply: Reply) -> Result<RequestId, ClientError> {
        self.server.request(
            "analysis.setPriorityFiles",
            Some(json!({ "files": files })),
            reply,
        )
    }

    /// Replace per-service file subscriptions, e.g. `{"OUTLINE": [file]}`.
    pub fn set_subscriptions(
        &self,
        subscriptions: &BTreeMap<String, Vec<String>>,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "analysis.setSubscriptions",
            Some(json!({ "subscriptions": subscriptions })),
            reply,
        )
    }

    /// Overlay file contents. Each value is an add, change or remove overlay
    /// object, e.g. `{"type": "add", "content": "..."}`.
    pub fn update_content(
        &self,
        files: &BTreeMap<String, Value>,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        self.server.request(
            "analysis.updateContent",
            Some(json!({ "files": files })),
            reply,
        )
    }

    pub fn update_options(&self, options: Value, reply: Reply) -> Result<RequestId, ClientError> {
        self.server.request(
            "analysis.updateOptions",
            Some(json!({ "options": options })),
            reply,
        )
    }

    pub fn on_errors(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("analysis.errors", callback);
    }

    /// Previously reported results for the listed files are stale.
    pub fn on_flush_results(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("analysis.flushResults", callback);
    }

    pub fn on_folding(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("analysis.folding", callback);
    }

    pub fn on_highlights(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("analysis.highlights", callback);
    }

    pub fn on_invalidate(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("analysis.invalidate", callback);
    }

    pub fn on_navigation(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("analysis.navigation", callback);
    }

    pub fn on_occurrences(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("analysis.occurrences", callback);
    }

    pub fn on_outline(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("analysis.outline", callback);
    }

    pub fn on_overrides(&self, callback: impl Fn(Event) + Send + Sync + 'static) {
        self.server.notification("analysis.overrides", callback);
    }
}
