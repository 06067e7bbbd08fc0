//! Request correlation: id allocation and the pending-request table.
//!
//! Every outbound request gets a fresh [`RequestId`] and leaves a
//! [`PendingRequest`] behind. When the response with that id is read, the
//! entry is taken out of the table (exactly once) and resolved into at most
//! one consumer callback.

use std::collections::HashMap;

use crate::dispatch::Job;
use crate::protocol::{Failure, Outcome, RequestId, Success};

/// Callback for a successful response.
pub type OnSuccess = Box<dyn FnOnce(Success) + Send + 'static>;

/// Errback for a remote rejection.
pub type OnError = Box<dyn FnOnce(Failure) + Send + 'static>;

/// The optional callback/errback pair attached to one request.
///
/// ```ignore
/// let reply = Reply::new()
///     .on_success(|ok| println!("version {:?}", ok.get_str("version")))
///     .on_error(|err| eprintln!("{} failed: {}", err.method, err.error));
/// ```
#[derive(Default)]
pub struct Reply {
    on_success: Option<OnSuccess>,
    on_error: Option<OnError>,
}

impl Reply {
    /// A reply with neither callback; the response is consumed silently.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, callback: impl FnOnce(Success) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, errback: impl FnOnce(Failure) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(errback));
        self
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reply")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A request that has been written but not yet answered.
#[derive(Debug)]
pub struct PendingRequest {
    pub method: String,
    reply: Reply,
}

impl PendingRequest {
    pub fn new(method: impl Into<String>, reply: Reply) -> Self {
        Self {
            method: method.into(),
            reply,
        }
    }

    /// Turn a response outcome into the job to dispatch, if any.
    ///
    /// An error goes to the errback, a result to the callback. When the
    /// matching handler is absent the outcome is dropped.
    pub fn resolve(self, outcome: Outcome) -> Option<Job> {
        let PendingRequest { method, reply } = self;
        match outcome {
            Outcome::Error(error) => {
                let errback = reply.on_error?;
                Some(Box::new(move || errback(Failure { method, error })))
            }
            Outcome::Result(result) => {
                let callback = reply.on_success?;
                Some(Box::new(move || callback(Success { method, result })))
            }
        }
    }
}

/// Strictly increasing id source. Ids start at `"0"`.
#[derive(Debug, Default)]
pub struct RequestIds {
    next: u64,
}

impl RequestIds {
    pub fn next_id(&mut self) -> RequestId {
        let id = RequestId::from_counter(self.next);
        self.next += 1;
        id
    }
}

/// Table of pending requests keyed by id.
#[derive(Debug, Default)]
pub struct PendingRequests {
    requests: HashMap<String, PendingRequest>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending request. Returns false if `id` was already pending,
    /// in which case the table is left unchanged.
    pub fn register(&mut self, id: &RequestId, pending: PendingRequest) -> bool {
        if self.requests.contains_key(id.as_str()) {
            return false;
        }
        self.requests.insert(id.as_str().to_string(), pending);
        true
    }

    /// Remove and return the entry for `id`.
    pub fn take(&mut self, id: &str) -> Option<PendingRequest> {
        self.requests.remove(id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RemoteError;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, PartialEq)]
    enum Seen {
        Ok(String, Map<String, serde_json::Value>),
        Err(String, String),
    }

    fn recording_reply(log: &Arc<Mutex<Vec<Seen>>>) -> Reply {
        let ok_log = Arc::clone(log);
        let err_log = Arc::clone(log);
        Reply::new()
            .on_success(move |s| ok_log.lock().unwrap().push(Seen::Ok(s.method, s.result)))
            .on_error(move |f| err_log.lock().unwrap().push(Seen::Err(f.method, f.error.code)))
    }

    fn remote_error(code: &str) -> RemoteError {
        RemoteError {
            code: code.to_string(),
            message: "rejected".to_string(),
            stack_trace: None,
        }
    }

    #[test]
    fn test_ids_are_strictly_increasing() {
        let mut ids = RequestIds::default();
        let issued: Vec<u64> = (0..100)
            .map(|_| ids.next_id().as_str().parse().unwrap())
            .collect();
        assert_eq!(issued[0], 0);
        assert!(issued.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_register_and_take_once() {
        let mut pending = PendingRequests::new();
        let id = RequestId::from("0");
        assert!(pending.register(&id, PendingRequest::new("server.getVersion", Reply::new())));
        assert_eq!(pending.len(), 1);

        let entry = pending.take("0").unwrap();
        assert_eq!(entry.method, "server.getVersion");
        assert!(pending.is_empty());
        assert!(pending.take("0").is_none());
    }

    #[test]
    fn test_register_rejects_duplicate_id() {
        let mut pending = PendingRequests::new();
        let id = RequestId::from("4");
        assert!(pending.register(&id, PendingRequest::new("first", Reply::new())));
        assert!(!pending.register(&id, PendingRequest::new("second", Reply::new())));
        assert_eq!(pending.take("4").unwrap().method, "first");
    }

    #[test]
    fn test_resolve_result_runs_callback_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let entry = PendingRequest::new("server.getVersion", recording_reply(&log));

        let mut result = Map::new();
        result.insert("version".to_string(), json!("1.6.0"));
        let job = entry.resolve(Outcome::Result(result.clone())).unwrap();
        job();

        assert_eq!(
            *log.lock().unwrap(),
            vec![Seen::Ok("server.getVersion".to_string(), result)]
        );
    }

    #[test]
    fn test_resolve_error_runs_errback_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let entry = PendingRequest::new("server.setSubscriptions", recording_reply(&log));

        let job = entry
            .resolve(Outcome::Error(remote_error("INVALID_PARAMETER")))
            .unwrap();
        job();

        assert_eq!(
            *log.lock().unwrap(),
            vec![Seen::Err(
                "server.setSubscriptions".to_string(),
                "INVALID_PARAMETER".to_string()
            )]
        );
    }

    #[test]
    fn test_resolve_without_matching_handler_is_noop() {
        let no_handlers = PendingRequest::new("server.shutdown", Reply::new());
        assert!(no_handlers.resolve(Outcome::Result(Map::new())).is_none());

        let success_only = PendingRequest::new("server.shutdown", Reply::new().on_success(|_| {}));
        assert!(success_only
            .resolve(Outcome::Error(remote_error("SERVER_ERROR")))
            .is_none());

        let error_only = PendingRequest::new("server.shutdown", Reply::new().on_error(|_| {}));
        assert!(error_only.resolve(Outcome::Result(Map::new())).is_none());
    }
}
