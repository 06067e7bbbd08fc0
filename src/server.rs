//! The protocol engine: one analysis server process and its traffic.
//!
//! [`AnalysisServer`] ties the components together:
//!
//! ```text
//! request() ──► correlator ──► stdin            (caller thread)
//! stdout ──► reader ──► correlator | router     (reader thread)
//!                   └──► Dispatcher ──► callback (consumer context)
//! ```
//!
//! # Concurrency
//!
//! `request()` and `notification()` may be called from any thread. Id
//! allocation, pending registration and the pipe write happen under one
//! lock, so lines never interleave and ids never repeat. That lock is
//! separate from the lifecycle state, so `stop()` stays bounded even while a
//! write is stuck on a full pipe. The reader thread
//! only touches the pending and subscription tables, each behind its own
//! mutex, and never holds one while dispatching.
//!
//! # Stopping
//!
//! There is no cancellation primitive in the protocol. Requests still
//! pending when [`AnalysisServer::stop`] runs are abandoned: their callbacks
//! are dropped without being called, and nothing dispatched afterwards
//! (responses, events, diagnostics) reaches the consumer.

use std::io::{self, BufWriter, Write};
use std::process::ChildStdin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::correlator::{PendingRequest, PendingRequests, Reply, RequestIds};
use crate::dispatch::{Dispatcher, Job};
use crate::error::{ClientError, ProtocolError};
use crate::process::{ServerProcess, Termination};
use crate::protocol::{Event, OutboundRequest, RequestId};
use crate::reader::{spawn_reader, ReaderHandle};
use crate::router::{OnEvent, Subscriptions};

/// Diagnostic callback for protocol violations.
pub type OnProtocolError = Arc<dyn Fn(ProtocolError) + Send + Sync + 'static>;

/// Quick checks for the reader thread to finish during `stop()`.
const READER_JOIN_CHECKS: u32 = 10;
const READER_JOIN_INTERVAL: Duration = Duration::from_millis(10);

/// Retry interval while `stop()` waits for the input pipe to be free.
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// State Shared With the Reader Thread
// =============================================================================

/// Tables and the dispatcher, shared between callers and the reader thread.
pub(crate) struct Shared {
    pending: Mutex<PendingRequests>,
    subscriptions: Mutex<Subscriptions>,
    diagnostics: Mutex<Option<OnProtocolError>>,
    dispatcher: Arc<dyn Dispatcher>,
    closed: Arc<AtomicBool>,
}

impl Shared {
    pub(crate) fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            pending: Mutex::new(PendingRequests::new()),
            subscriptions: Mutex::new(Subscriptions::new()),
            diagnostics: Mutex::new(None),
            dispatcher,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn lock_pending(&self) -> MutexGuard<'_, PendingRequests> {
        lock(&self.pending)
    }

    pub(crate) fn lock_subscriptions(&self) -> MutexGuard<'_, Subscriptions> {
        lock(&self.subscriptions)
    }

    pub(crate) fn set_diagnostics(&self, callback: OnProtocolError) {
        *lock(&self.diagnostics) = Some(callback);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop delivering anything to the consumer, including jobs already queued.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Hand a job to the dispatcher. The job becomes a no-op if the engine
    /// is closed by the time the dispatch context runs it.
    pub(crate) fn dispatch(&self, job: Job) {
        let closed = Arc::clone(&self.closed);
        self.dispatcher.dispatch(Box::new(move || {
            if !closed.load(Ordering::SeqCst) {
                job();
            }
        }));
    }

    /// Log a protocol error and forward it to the diagnostic hook, if any.
    pub(crate) fn report(&self, err: ProtocolError) {
        if err.is_fatal() {
            error!("Analysis server protocol error: {}", err);
        } else {
            warn!("Analysis server protocol error: {}", err);
        }

        let hook = lock(&self.diagnostics).clone();
        if let Some(hook) = hook {
            self.dispatch(Box::new(move || hook(err)));
        }
    }
}

// =============================================================================
// Process State
// =============================================================================

struct Running {
    process: ServerProcess,
    reader: ReaderHandle,
}

enum ProcessState {
    NotStarted,
    Running(Running),
    Stopped,
}

/// Write side of the pipe plus the id counter, locked separately from the
/// lifecycle state so a blocked write never holds up `stop()`.
struct Outbound {
    stdin: BufWriter<ChildStdin>,
    ids: RequestIds,
}

impl Outbound {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stdin.write_all(line.as_bytes())?;
        self.stdin.flush()
    }

    /// Close the pipe. Unflushed bytes are discarded rather than written,
    /// so this never blocks on a full pipe.
    fn close(self) {
        let (stdin, _unflushed) = self.stdin.into_parts();
        drop(stdin);
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Client-side engine for one analysis server process.
///
/// # Example
///
/// ```ignore
/// use das_client::{AnalysisServer, EventLoop, Reply, ServerConfig};
///
/// let mut event_loop = EventLoop::new();
/// let server = AnalysisServer::new(ServerConfig::from_env(), event_loop.handle());
/// server.notification("server.connected", |event| println!("{:?}", event.params));
/// server.start()?;
/// server.request(
///     "server.getVersion",
///     None,
///     Reply::new().on_success(|ok| println!("{:?}", ok.get_str("version"))),
/// )?;
/// event_loop.run()?;
/// ```
pub struct AnalysisServer {
    config: ServerConfig,
    shared: Arc<Shared>,
    // Lock order: `state` before `outbound`. `request()` never holds
    // `outbound` while waiting for `state`.
    state: Mutex<ProcessState>,
    outbound: Mutex<Option<Outbound>>,
}

impl AnalysisServer {
    /// Build an engine that delivers callbacks through `dispatcher`.
    pub fn new(config: ServerConfig, dispatcher: impl Dispatcher + 'static) -> Self {
        Self::with_dispatcher(config, Arc::new(dispatcher))
    }

    pub fn with_dispatcher(config: ServerConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::new(dispatcher)),
            state: Mutex::new(ProcessState::NotStarted),
            outbound: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Launch the server process and the reader thread.
    ///
    /// # Errors
    ///
    /// - `ClientError::Launch` if the executable cannot be spawned.
    /// - `ClientError::AlreadyStarted` on a second call, including after
    ///   `stop()`; an instance drives at most one process.
    pub fn start(&self) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        if !matches!(*state, ProcessState::NotStarted) {
            return Err(ClientError::AlreadyStarted);
        }

        let (process, stdin, stdout) = ServerProcess::spawn(&self.config)?;
        // On failure `process` is dropped here, which kills the child.
        let reader = spawn_reader(stdout, Arc::clone(&self.shared))?;

        info!("Analysis server running (pid {})", process.id());
        *lock(&self.outbound) = Some(Outbound {
            stdin: BufWriter::new(stdin),
            ids: RequestIds::default(),
        });
        *state = ProcessState::Running(Running { process, reader });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.state), ProcessState::Running(_))
    }

    /// Whether the server process is gone: it exited on its own, or
    /// `stop()` was called. Still false before `start()`.
    pub fn has_exited(&self) -> bool {
        match &mut *lock(&self.state) {
            ProcessState::NotStarted => false,
            ProcessState::Running(running) => running.process.has_exited(),
            ProcessState::Stopped => true,
        }
    }

    /// Send `method` with optional `params`; `reply` receives the outcome.
    ///
    /// Returns as soon as the line is flushed. The returned id is the one
    /// written on the wire. A server that stops reading its input can block
    /// this call until `stop()` kills it.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotStarted` before `start()`.
    /// - `ClientError::Stopped` after `stop()`.
    /// - `ClientError::DuplicateRequestId` if the allocated id is already
    ///   pending; nothing is written.
    /// - `ClientError::Io` if the pipe write fails; the request is not left
    ///   pending in that case.
    pub fn request(
        &self,
        method: &str,
        params: Option<Value>,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        loop {
            {
                let mut outbound = lock(&self.outbound);
                if self.shared.is_closed() {
                    if let Some(outbound) = outbound.take() {
                        outbound.close();
                    }
                    return Err(ClientError::Stopped);
                }
                if let Some(outbound) = outbound.as_mut() {
                    return self.send(outbound, method, params.as_ref(), reply);
                }
            }

            match *lock(&self.state) {
                ProcessState::NotStarted => return Err(ClientError::NotStarted),
                ProcessState::Stopped => return Err(ClientError::Stopped),
                // `start()` finished between the two checks.
                ProcessState::Running(_) => continue,
            }
        }
    }

    fn send(
        &self,
        outbound: &mut Outbound,
        method: &str,
        params: Option<&Value>,
        reply: Reply,
    ) -> Result<RequestId, ClientError> {
        let id = outbound.ids.next_id();
        let line = OutboundRequest::new(&id, method, params).to_line()?;

        let registered = self
            .shared
            .lock_pending()
            .register(&id, PendingRequest::new(method, reply));
        if !registered {
            error!("Request id {} is already pending, not sending {}", id, method);
            return Err(ClientError::DuplicateRequestId { id: id.to_string() });
        }

        if let Err(e) = outbound.write_line(&line) {
            self.shared.lock_pending().take(id.as_str());
            warn!("Failed to send {} ({}): {}", id, method, e);
            return Err(ClientError::Io(e));
        }

        debug!("-> request {} ({})", id, method);
        Ok(id)
    }

    /// Register `callback` as the single subscriber for `event`.
    ///
    /// Replaces any earlier subscriber for the same event. May be called
    /// before or after `start()`.
    pub fn notification(&self, event: &str, callback: impl Fn(Event) + Send + Sync + 'static) {
        let callback: OnEvent = Arc::new(callback);
        if self.shared.lock_subscriptions().subscribe(event, callback) {
            debug!("Replaced subscriber for {}", event);
        } else {
            debug!("Subscribed to {}", event);
        }
    }

    /// Register the diagnostic callback for protocol violations.
    ///
    /// Orphan responses, malformed lines and read failures are delivered
    /// here (through the dispatcher) in addition to being logged.
    pub fn on_protocol_error(&self, callback: impl Fn(ProtocolError) + Send + Sync + 'static) {
        self.shared.set_diagnostics(Arc::new(callback));
    }

    /// Number of requests sent but not yet answered.
    pub fn pending_count(&self) -> usize {
        self.shared.lock_pending().len()
    }

    /// Close the server's input, wait up to `timeout` for it to exit, then
    /// kill it.
    ///
    /// Returns within `timeout` plus at most 100 ms spent waiting for the
    /// reader thread. If a `request()` is blocked writing to a server that
    /// stopped reading, the input cannot be closed; the server is then
    /// killed at the deadline and that request fails with
    /// `ClientError::Io`.
    ///
    /// Safe to call before `start()` or more than once; both return
    /// `Termination::NotRunning`.
    pub fn stop(&self, timeout: Duration) -> Termination {
        let deadline = Instant::now() + timeout;
        let running = {
            let mut state = lock(&self.state);
            match std::mem::replace(&mut *state, ProcessState::Stopped) {
                ProcessState::Running(running) => running,
                ProcessState::NotStarted => {
                    *state = ProcessState::NotStarted;
                    return Termination::NotRunning;
                }
                ProcessState::Stopped => return Termination::NotRunning,
            }
        };

        self.shared.close();
        let abandoned = {
            let mut pending = self.shared.lock_pending();
            let count = pending.len();
            *pending = PendingRequests::new();
            count
        };
        if abandoned > 0 {
            info!("Abandoning {} unanswered requests", abandoned);
        }

        if !self.close_input(deadline) {
            warn!("Analysis server input is blocked by a pending write, killing at deadline");
        }

        let Running { process, reader } = running;
        let termination = process.terminate(deadline.saturating_duration_since(Instant::now()));
        join_reader(reader);
        info!("Analysis server stopped: {:?}", termination);
        termination
    }

    /// Close stdin unless a writer holds it past `deadline`.
    fn close_input(&self, deadline: Instant) -> bool {
        loop {
            let guard = match self.outbound.try_lock() {
                Ok(guard) => Some(guard),
                Err(TryLockError::Poisoned(poison)) => Some(poison.into_inner()),
                Err(TryLockError::WouldBlock) => None,
            };
            if let Some(mut outbound) = guard {
                if let Some(outbound) = outbound.take() {
                    outbound.close();
                }
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(CLOSE_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// [`stop`](Self::stop) with the configured grace period.
    pub fn shutdown(&self) -> Termination {
        self.stop(self.config.stop_timeout)
    }
}

/// Join the reader if it finishes promptly; otherwise leave it detached.
fn join_reader(reader: ReaderHandle) {
    for _ in 0..READER_JOIN_CHECKS {
        if reader.is_finished() {
            match reader.join() {
                Ok(Ok(())) => debug!("Reader thread finished"),
                Ok(Err(e)) => debug!("Reader thread ended with {}", e),
                Err(_) => warn!("Reader thread panicked"),
            }
            return;
        }
        thread::sleep(READER_JOIN_INTERVAL);
    }
    debug!("Reader thread still running after stop, detaching");
}

impl Drop for AnalysisServer {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop(self.config.stop_timeout);
        }
    }
}
