//! Dispatch contexts for consumer callbacks.
//!
//! The engine never runs consumer code on its own threads. Every callback
//! (response, error, event, diagnostic) is wrapped in a [`Job`] and handed
//! to an injected [`Dispatcher`], which is responsible for running it on the
//! consumer's single designated context.
//!
//! Two contexts ship with the crate:
//!
//! - [`EventLoop`]: a blocking, queue-based loop for synchronous programs
//!   and tests. Clone its [`LoopHandle`] into the engine.
//! - [`TokioDispatcher`]: a channel into a [`DispatchQueue`] that a tokio
//!   task drains.
//!
//! Any `Fn(Job) + Send + Sync` closure is also a dispatcher, so consumers
//! can forward into their own scheduler.
//!
//! Jobs submitted from one thread run in submission order. A panicking job
//! is caught, logged, and surfaced from the context's run method as
//! [`CallbackPanicked`]; it never reaches the engine's reader thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::error::CallbackPanicked;

/// A unit of consumer work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Capability to schedule work on the consumer's execution context.
pub trait Dispatcher: Send + Sync {
    /// Queue `job`. Must not run it inline on the calling thread.
    fn dispatch(&self, job: Job);
}

impl<F> Dispatcher for F
where
    F: Fn(Job) + Send + Sync,
{
    fn dispatch(&self, job: Job) {
        self(job)
    }
}

/// Run a job, converting a panic into [`CallbackPanicked`].
fn run_job(job: Job) -> Result<(), CallbackPanicked> {
    panic::catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        error!("Callback panicked on dispatch context: {}", message);
        CallbackPanicked { message }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic in callback".to_string()
    }
}

// =============================================================================
// Blocking Event Loop
// =============================================================================

/// How long the loop sleeps on an empty queue before re-checking timers.
const IDLE_WAIT: Duration = Duration::from_millis(100);

enum LoopMessage {
    Run(Job),
    Later { due: Instant, job: Job },
    Stop,
}

/// Cloneable, thread-safe handle for submitting work to an [`EventLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    tx: Sender<LoopMessage>,
}

impl LoopHandle {
    /// Queue `job` to run as soon as the loop gets to it.
    pub fn call_soon(&self, job: impl FnOnce() + Send + 'static) {
        self.send(LoopMessage::Run(Box::new(job)));
    }

    /// Queue `job` to run once `delay` has elapsed.
    pub fn call_later(&self, delay: Duration, job: impl FnOnce() + Send + 'static) {
        self.send(LoopMessage::Later {
            due: Instant::now() + delay,
            job: Box::new(job),
        });
    }

    /// Ask the loop to return from `run()` after the jobs queued so far.
    pub fn stop(&self) {
        self.send(LoopMessage::Stop);
    }

    fn send(&self, message: LoopMessage) {
        if self.tx.send(message).is_err() {
            debug!("Event loop dropped; discarding job");
        }
    }
}

impl Dispatcher for LoopHandle {
    fn dispatch(&self, job: Job) {
        self.send(LoopMessage::Run(job));
    }
}

/// A single-threaded loop that runs queued jobs on the thread calling `run`.
pub struct EventLoop {
    rx: Receiver<LoopMessage>,
    handle: LoopHandle,
    timers: Vec<(Instant, Job)>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            rx,
            handle: LoopHandle { tx },
            timers: Vec::new(),
        }
    }

    /// A handle that submits work to this loop.
    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Run jobs until [`LoopHandle::stop`] is called or a job panics.
    pub fn run(&mut self) -> Result<(), CallbackPanicked> {
        self.run_until(None)
    }

    /// Like [`run`](Self::run) but also returns once `limit` has elapsed.
    pub fn run_for(&mut self, limit: Duration) -> Result<(), CallbackPanicked> {
        self.run_until(Some(Instant::now() + limit))
    }

    /// Run every job (and due timer) queued right now, without blocking.
    ///
    /// Returns the number of jobs executed. A queued stop request ends the
    /// drain early.
    pub fn run_pending(&mut self) -> Result<usize, CallbackPanicked> {
        let mut executed = self.fire_due_timers()?;
        loop {
            match self.rx.try_recv() {
                Ok(LoopMessage::Run(job)) => {
                    run_job(job)?;
                    executed += 1;
                }
                Ok(LoopMessage::Later { due, job }) => self.timers.push((due, job)),
                Ok(LoopMessage::Stop) => break,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        executed += self.fire_due_timers()?;
        Ok(executed)
    }

    fn run_until(&mut self, deadline: Option<Instant>) -> Result<(), CallbackPanicked> {
        loop {
            self.fire_due_timers()?;

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return Ok(());
            }

            let mut wait = self
                .next_timer()
                .map(|due| due.saturating_duration_since(now))
                .unwrap_or(IDLE_WAIT);
            if let Some(d) = deadline {
                wait = wait.min(d.saturating_duration_since(now));
            }

            match self.rx.recv_timeout(wait) {
                Ok(LoopMessage::Run(job)) => run_job(job)?,
                Ok(LoopMessage::Later { due, job }) => self.timers.push((due, job)),
                Ok(LoopMessage::Stop) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    fn next_timer(&self) -> Option<Instant> {
        self.timers.iter().map(|(due, _)| *due).min()
    }

    fn fire_due_timers(&mut self) -> Result<usize, CallbackPanicked> {
        let now = Instant::now();
        let mut due = Vec::new();
        let mut i = 0;
        while i < self.timers.len() {
            if self.timers[i].0 <= now {
                due.push(self.timers.remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|(at, _)| *at);

        let count = due.len();
        for (_, job) in due {
            run_job(job)?;
        }
        Ok(count)
    }
}

// =============================================================================
// Tokio Dispatch Queue
// =============================================================================

/// Dispatcher that feeds a [`DispatchQueue`] drained by a tokio task.
#[derive(Clone)]
pub struct TokioDispatcher {
    tx: tokio::sync::mpsc::UnboundedSender<Job>,
}

/// Receiving side of a [`TokioDispatcher`].
pub struct DispatchQueue {
    rx: tokio::sync::mpsc::UnboundedReceiver<Job>,
}

impl TokioDispatcher {
    pub fn channel() -> (TokioDispatcher, DispatchQueue) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (TokioDispatcher { tx }, DispatchQueue { rx })
    }
}

impl Dispatcher for TokioDispatcher {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            debug!("Dispatch queue closed; discarding job");
        }
    }
}

impl DispatchQueue {
    /// Run jobs until every dispatcher is dropped or a job panics.
    pub async fn run(mut self) -> Result<(), CallbackPanicked> {
        while let Some(job) = self.rx.recv().await {
            run_job(job)?;
        }
        Ok(())
    }

    /// Wait for and run a single job. `None` once all dispatchers are gone.
    pub async fn run_next(&mut self) -> Option<Result<(), CallbackPanicked>> {
        let job = self.rx.recv().await?;
        Some(run_job(job))
    }

    /// Run whatever is queued right now without waiting.
    pub fn run_pending(&mut self) -> Result<usize, CallbackPanicked> {
        let mut executed = 0;
        while let Ok(job) = self.rx.try_recv() {
            run_job(job)?;
            executed += 1;
        }
        Ok(executed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn test_jobs_run_on_loop_thread_in_order() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let worker = {
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for i in 0..5 {
                    let seen = Arc::clone(&seen);
                    handle.dispatch(Box::new(move || {
                        seen.lock().unwrap().push((i, thread::current().id()));
                    }));
                }
                handle.stop();
            })
        };
        worker.join().unwrap();

        event_loop.run().unwrap();

        let loop_thread = thread::current().id();
        let seen = seen.lock().unwrap();
        let order: Vec<i32> = seen.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(seen.iter().all(|(_, id)| *id == loop_thread));
    }

    #[test]
    fn test_dispatch_does_not_run_inline() {
        let event_loop = EventLoop::new();
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        event_loop
            .handle()
            .dispatch(Box::new(move || *flag.lock().unwrap() = true));
        assert!(!*ran.lock().unwrap());
    }

    #[test]
    fn test_run_pending_drains_queue() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            handle.call_soon(move || *count.lock().unwrap() += 1);
        }
        assert_eq!(event_loop.run_pending().unwrap(), 3);
        assert_eq!(*count.lock().unwrap(), 3);
        assert_eq!(event_loop.run_pending().unwrap(), 0);
    }

    #[test]
    fn test_call_later_fires_after_delay() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let started = Instant::now();
        let stopper = handle.clone();
        handle.call_later(Duration::from_millis(50), move || stopper.stop());

        event_loop.run_for(Duration::from_secs(5)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_run_for_returns_at_deadline() {
        let mut event_loop = EventLoop::new();
        let started = Instant::now();
        event_loop.run_for(Duration::from_millis(30)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_panicking_job_is_surfaced() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();
        handle.call_soon(|| panic!("runtime error"));

        let err = event_loop.run().unwrap_err();
        assert_eq!(err.message, "runtime error");
    }

    #[test]
    fn test_closure_dispatcher() {
        let collected: Arc<Mutex<Vec<Job>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&collected);
        let dispatcher = move |job: Job| sink.lock().unwrap().push(job);

        let hit = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&hit);
        dispatcher.dispatch(Box::new(move || *flag.lock().unwrap() = true));

        let jobs: Vec<Job> = collected.lock().unwrap().drain(..).collect();
        for job in jobs {
            job();
        }
        assert!(*hit.lock().unwrap());
    }

    #[tokio::test]
    async fn test_tokio_queue_runs_jobs_from_other_threads() {
        let (dispatcher, mut queue) = TokioDispatcher::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sender = {
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for i in 0..3 {
                    let seen = Arc::clone(&seen);
                    dispatcher.dispatch(Box::new(move || seen.lock().unwrap().push(i)));
                }
            })
        };
        sender.join().unwrap();

        for _ in 0..3 {
            queue.run_next().await.unwrap().unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);

        // Dispatcher was moved into the thread and dropped with it.
        assert!(queue.run_next().await.is_none());
    }

    #[tokio::test]
    async fn test_tokio_queue_surfaces_panic() {
        let (dispatcher, queue) = TokioDispatcher::channel();
        dispatcher.dispatch(Box::new(|| panic!("boom")));
        drop(dispatcher);

        let err = queue.run().await.unwrap_err();
        assert_eq!(err.message, "boom");
    }
}
