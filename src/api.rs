//! Typed facades over the analysis server protocol.
//!
//! [`DartAnalysisServer`] owns one [`AnalysisServer`] engine and exposes it
//! through one facade per protocol domain. Every request method builds the
//! camelCase `params` object for its method and forwards to
//! [`AnalysisServer::request`]; every `on_*` method registers the single
//! subscriber for one event.
//!
//! ```ignore
//! let das = DartAnalysisServer::new(ServerConfig::from_env(), event_loop.handle());
//! das.server.on_connected(|event| println!("connected: {:?}", event.get_str("version")));
//! das.start()?;
//! das.analysis.set_analysis_roots(&["/work/app"], &[], None, Reply::new())?;
//! ```

mod analysis;
mod completion;
mod edit;
mod execution;
mod search;
mod server;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::ClientError;
use crate::process::Termination;
use crate::server::AnalysisServer;
use crate::version::{self, ApiVersion};

pub use analysis::AnalysisDomain;
pub use completion::CompletionDomain;
pub use edit::EditDomain;
pub use execution::ExecutionDomain;
pub use search::SearchDomain;
pub use server::ServerDomain;

/// Protocol version these facades were written against.
pub const API_VERSION: ApiVersion = ApiVersion::new(1, 6, 2);

/// Params object for methods that take no arguments.
pub(crate) fn no_params() -> Option<Value> {
    Some(Value::Object(Map::new()))
}

/// Analysis server client with one facade per protocol domain.
pub struct DartAnalysisServer {
    engine: Arc<AnalysisServer>,
    pub server: ServerDomain,
    pub analysis: AnalysisDomain,
    pub completion: CompletionDomain,
    pub search: SearchDomain,
    pub edit: EditDomain,
    pub execution: ExecutionDomain,
}

impl DartAnalysisServer {
    pub fn new(config: ServerConfig, dispatcher: impl Dispatcher + 'static) -> Self {
        Self::from_engine(Arc::new(AnalysisServer::new(config, dispatcher)))
    }

    /// Wrap an existing engine.
    pub fn from_engine(engine: Arc<AnalysisServer>) -> Self {
        Self {
            server: ServerDomain::new(Arc::clone(&engine)),
            analysis: AnalysisDomain::new(Arc::clone(&engine)),
            completion: CompletionDomain::new(Arc::clone(&engine)),
            search: SearchDomain::new(Arc::clone(&engine)),
            edit: EditDomain::new(Arc::clone(&engine)),
            execution: ExecutionDomain::new(Arc::clone(&engine)),
            engine,
        }
    }

    /// The underlying engine, for raw requests and diagnostics.
    pub fn engine(&self) -> &Arc<AnalysisServer> {
        &self.engine
    }

    pub fn start(&self) -> Result<(), ClientError> {
        self.engine.start()
    }

    pub fn stop(&self, timeout: Duration) -> Termination {
        self.engine.stop(timeout)
    }

    pub fn api_version(&self) -> ApiVersion {
        API_VERSION
    }

    /// Whether a server reporting `remote` speaks a protocol these facades
    /// can use.
    pub fn check_version(&self, remote: &str) -> bool {
        version::check_version(&API_VERSION, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::Reply;
    use crate::dispatch::EventLoop;

    fn offline() -> (DartAnalysisServer, EventLoop) {
        let event_loop = EventLoop::new();
        let das = DartAnalysisServer::new(
            ServerConfig::new("/bin/sh", "/nonexistent/script.sh"),
            event_loop.handle(),
        );
        (das, event_loop)
    }

    #[test]
    fn test_check_version_against_api_version() {
        let (das, _loop) = offline();
        assert_eq!(das.api_version().to_string(), "1.6.2");
        assert!(das.check_version("1.6.5"));
        assert!(das.check_version("1.7.0"));
        assert!(!das.check_version("1.5.9"));
        assert!(!das.check_version("2.0.0"));
    }

    #[test]
    fn test_facades_share_one_engine() {
        let (das, _loop) = offline();
        let err = das.server.get_version(Reply::new()).unwrap_err();
        assert!(matches!(err, ClientError::NotStarted));
        let err = das.analysis.get_errors("/a.dart", Reply::new()).unwrap_err();
        assert!(matches!(err, ClientError::NotStarted));
        assert_eq!(das.engine().pending_count(), 0);
    }

    #[test]
    fn test_on_methods_register_subscribers() {
        let (das, _loop) = offline();
        das.server.on_connected(|_| {});
        das.analysis.on_flush_results(|_| {});
        das.execution.on_launch_data(|_| {});

        let subs = das.engine.shared().lock_subscriptions();
        assert!(subs.is_subscribed("server.connected"));
        assert!(subs.is_subscribed("analysis.flushResults"));
        assert!(subs.is_subscribed("execution.launchData"));
        assert!(!subs.is_subscribed("completion.results"));
    }
}
