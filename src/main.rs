//! das-client - connect to a Dart analysis server and report its version.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use das_client::{
    DartAnalysisServer, ProtocolError, RemoteError, Reply, ServerConfig, TokioDispatcher,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connect to a Dart analysis server and report its protocol version
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Dart SDK root (defaults to $DART_SDK_PATH, then /opt/google/dartsdk)
    #[arg(long)]
    sdk: Option<PathBuf>,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        match &self.sdk {
            Some(root) => ServerConfig::from_sdk(root),
            None => ServerConfig::from_env(),
        }
    }
}

/// Deliver `value` through the sender in `slot` unless it was already used.
fn send_once<T>(slot: &Mutex<Option<oneshot::Sender<T>>>, value: T) {
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(sender) = sender {
        let _ = sender.send(value);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "das_client=info".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    info!("Starting das-client v{}", env!("CARGO_PKG_VERSION"));
    let config = cli.server_config();

    let (dispatcher, queue) = TokioDispatcher::channel();
    let queue_task = tokio::spawn(queue.run());
    let das = DartAnalysisServer::new(config, dispatcher);

    let result = run(&das).await;

    let engine = Arc::clone(das.engine());
    let termination = tokio::task::spawn_blocking(move || engine.shutdown())
        .await
        .context("Stop task failed")?;
    info!("Server terminated: {:?}", termination);

    if queue_task.is_finished() {
        if let Ok(Err(panicked)) = queue_task.await {
            warn!("Callback failed: {}", panicked);
        }
    } else {
        queue_task.abort();
    }

    result
}

/// Waits for callbacks while watching for the server going away.
struct Session<'a> {
    das: &'a DartAnalysisServer,
    fatal: mpsc::UnboundedReceiver<ProtocolError>,
}

impl Session<'_> {
    /// Resolve with the value sent through `rx`, or fail as soon as the
    /// server exits, breaks the protocol, or `limit` elapses.
    async fn wait<T>(&mut self, rx: oneshot::Receiver<T>, what: &str, limit: Duration) -> Result<T> {
        tokio::select! {
            value = rx => value.with_context(|| format!("{} was never delivered", what)),
            Some(err) = self.fatal.recv() => bail!("Protocol error while waiting for {}: {}", what, err),
            () = wait_for_exit(self.das) => bail!("Analysis server exited while waiting for {}", what),
            () = tokio::time::sleep(limit) => bail!("Timed out waiting for {}", what),
        }
    }
}

async fn wait_for_exit(das: &DartAnalysisServer) {
    let mut ticks = tokio::time::interval(EXIT_POLL_INTERVAL);
    loop {
        ticks.tick().await;
        if das.engine().has_exited() {
            return;
        }
    }
}

async fn run(das: &DartAnalysisServer) -> Result<()> {
    let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
    das.engine().on_protocol_error(move |err| {
        if err.is_fatal() {
            let _ = fatal_tx.send(err);
        }
    });
    let mut session = Session { das, fatal: fatal_rx };

    // Events may fire more than once; only the first one is forwarded.
    let (connected_tx, connected_rx) = oneshot::channel::<Option<String>>();
    let connected_tx = Mutex::new(Some(connected_tx));
    das.server.on_connected(move |event| {
        send_once(&connected_tx, event.get_str("version").map(String::from))
    });

    das.start().context("Failed to start analysis server")?;

    let announced = session
        .wait(connected_rx, "server.connected", CONNECT_TIMEOUT)
        .await?;
    info!("Connected (announced version {:?})", announced);

    let (version_tx, version_rx) = oneshot::channel::<Result<String, RemoteError>>();
    let version_tx = Arc::new(Mutex::new(Some(version_tx)));
    let on_error_tx = Arc::clone(&version_tx);
    das.server.get_version(
        Reply::new()
            .on_success(move |ok| {
                send_once(
                    &version_tx,
                    Ok(ok.get_str("version").unwrap_or_default().to_string()),
                )
            })
            .on_error(move |failure| send_once(&on_error_tx, Err(failure.error))),
    )?;

    let version = session
        .wait(version_rx, "server.getVersion", REPLY_TIMEOUT)
        .await?
        .map_err(|e| anyhow!("server.getVersion failed: {}", e))?;

    let compatible = das.check_version(&version);
    println!("Analysis server version: {}", version);
    println!(
        "Client API version: {} ({})",
        das.api_version(),
        if compatible { "compatible" } else { "incompatible" }
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    das.server.shutdown(Reply::new().on_success(move |_| {
        let _ = shutdown_tx.send(());
    }))?;
    // The server exits right after answering, so losing the race is fine.
    if let Err(e) = session.wait(shutdown_rx, "server.shutdown", REPLY_TIMEOUT).await {
        warn!("{}, stopping anyway", e);
    }

    Ok(())
}
