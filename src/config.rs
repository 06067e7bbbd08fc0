//! Launch configuration for the analysis server process.
//!
//! The server is started as `[interpreter, script]`, normally the Dart VM
//! and the analysis server snapshot shipped with the SDK.
//!
//! SDK lookup order for [`ServerConfig::from_env`]:
//! 1. `DART_SDK_PATH` environment variable
//! 2. `/opt/google/dartsdk`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Environment variable naming the Dart SDK root.
pub const DART_SDK_ENV: &str = "DART_SDK_PATH";

/// SDK root used when the environment does not name one.
pub const DEFAULT_SDK_ROOT: &str = "/opt/google/dartsdk";

/// Snapshot location relative to the SDK root.
const SNAPSHOT_PATH: &str = "bin/snapshots/analysis_server.dart.snapshot";

/// Default grace period for `stop()` before the process is killed.
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// How to launch the analysis server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Interpreter executable (the Dart VM).
    pub interpreter: PathBuf,
    /// Script passed as the interpreter's only argument.
    pub script: PathBuf,
    /// Grace period used by `stop()` when no explicit timeout is given.
    #[serde(with = "millis", default = "default_stop_timeout")]
    pub stop_timeout: Duration,
}

fn default_stop_timeout() -> Duration {
    DEFAULT_STOP_TIMEOUT
}

impl ServerConfig {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Standard layout inside a Dart SDK.
    pub fn from_sdk(sdk_root: impl AsRef<Path>) -> Self {
        let root = sdk_root.as_ref();
        Self::new(root.join("bin").join("dart"), root.join(SNAPSHOT_PATH))
    }

    /// Resolve the SDK from the environment, falling back to the default root.
    pub fn from_env() -> Self {
        match std::env::var(DART_SDK_ENV) {
            Ok(root) if !root.trim().is_empty() => {
                info!("Using Dart SDK from {}: {}", DART_SDK_ENV, root);
                Self::from_sdk(root.trim())
            }
            _ => {
                info!("Using default Dart SDK location: {}", DEFAULT_SDK_ROOT);
                Self::from_sdk(DEFAULT_SDK_ROOT)
            }
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// The argument vector used to launch the process.
    pub fn argv(&self) -> [&Path; 2] {
        [self.interpreter.as_path(), self.script.as_path()]
    }

    /// Human-readable command line, for logs and errors.
    pub fn command_line(&self) -> String {
        format!("{} {}", self.interpreter.display(), self.script.display())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
