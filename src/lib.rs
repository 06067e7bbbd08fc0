//! Client runtime for the Dart analysis server.
//!
//! The crate launches the analysis server as a child process and speaks its
//! line-delimited JSON protocol over stdin/stdout:
//!
//! - `server` - the engine: process lifecycle, request/response correlation
//!   and event routing
//! - `dispatch` - contexts that run consumer callbacks (a blocking
//!   [`EventLoop`] and a tokio-driven [`DispatchQueue`])
//! - `api` - typed per-domain facades ([`DartAnalysisServer`])
//! - `protocol` - wire envelopes and the values callbacks receive
//!
//! # Example
//!
//! ```ignore
//! use das_client::{DartAnalysisServer, EventLoop, Reply, ServerConfig};
//!
//! let mut event_loop = EventLoop::new();
//! let das = DartAnalysisServer::new(ServerConfig::from_env(), event_loop.handle());
//! let stopper = event_loop.handle();
//! das.start()?;
//! das.server.get_version(Reply::new().on_success(move |ok| {
//!     println!("server {}", ok.get_str("version").unwrap_or("?"));
//!     stopper.stop();
//! }))?;
//! event_loop.run()?;
//! das.stop(std::time::Duration::from_secs(2));
//! ```

pub mod api;
pub mod config;
pub mod correlator;
pub mod dispatch;
pub mod error;
pub mod process;
pub mod protocol;
pub mod reader;
pub mod router;
pub mod server;
pub mod version;

pub use api::{DartAnalysisServer, API_VERSION};
pub use config::ServerConfig;
pub use correlator::Reply;
pub use dispatch::{DispatchQueue, Dispatcher, EventLoop, Job, LoopHandle, TokioDispatcher};
pub use error::{CallbackPanicked, ClientError, ProtocolError, VersionError};
pub use process::Termination;
pub use protocol::{Event, Failure, RemoteError, RequestId, Success};
pub use server::AnalysisServer;
pub use version::{check_version, ApiVersion};
