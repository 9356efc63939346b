#![forbid(unsafe_code)]

//! Remote item fetching: retry, timeout, and an optional background worker.
//!
//! The engine never talks to the network itself. Hosts implement
//! [`ItemSource`] (a plain synchronous trait), and [`FetchClient`] wraps it
//! with the policy the render loop needs:
//!
//! - at least one retry for retryable failures, with linear backoff on the
//!   worker (inline retries run back to back so the caller never sleeps);
//! - a per-request deadline, after which the pending result is
//!   [`FetchError::Timeout`];
//! - cooperative cancellation: a job whose session went stale stops
//!   retrying and reports [`FetchError::Cancelled`].
//!
//! In [`FetchMode::Background`] jobs run on a `trickle-fetch` worker thread.
//! Commands reach the worker over an mpsc channel; the worker drains them
//! into per-priority queues and always runs the highest-priority job next,
//! so first-batch expansions overtake continuation traffic.
//!
//! Every request returns a [`Pending`] that the render loop polls on each
//! tick; in [`FetchMode::Inline`] the result is ready immediately.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use trickle_core::item::{CategoryGroup, FetchPayload, RenderItem};

use crate::session::CancellationToken;

/// Scheduling hint for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FetchPriority {
    High,
    Normal,
    Low,
}

impl FetchPriority {
    const fn slot(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// Retry and timeout policy.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Extra attempts after the first failure.
    pub retries: u32,
    /// Backoff before retry `n` is `backoff * n`.
    pub backoff: Duration,
    /// Deadline for one request, retries included.
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retries: 1,
            backoff: Duration::from_millis(25),
            timeout: Duration::from_secs(8),
        }
    }
}

/// Where fetch jobs execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchMode {
    /// On the calling thread, during the tick that requests them.
    Inline,
    /// On a dedicated worker thread.
    #[default]
    Background,
}

/// Failure of a remote fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// No reply before the deadline.
    Timeout,
    /// The host reports no connectivity.
    Offline,
    /// Non-success status from the remote.
    Status(u16),
    /// The payload could not be decoded.
    Decode(String),
    /// Any other source failure.
    Failed(String),
    /// The worker went away before replying.
    Disconnected,
    /// The owning session went stale.
    Cancelled,
}

impl FetchError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Failed(_) => true,
            Self::Status(code) => *code >= 500 || *code == 429,
            Self::Offline | Self::Decode(_) | Self::Disconnected | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "fetch timed out"),
            Self::Offline => write!(f, "offline"),
            Self::Status(code) => write!(f, "remote returned status {code}"),
            Self::Decode(msg) => write!(f, "failed to decode payload: {msg}"),
            Self::Failed(msg) => write!(f, "fetch failed: {msg}"),
            Self::Disconnected => write!(f, "fetch worker disconnected"),
            Self::Cancelled => write!(f, "fetch cancelled"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Host-provided data source.
pub trait ItemSource: Send + Sync {
    /// Fetch the collection behind a lazy reference.
    fn fetch(&self, reference: &str, priority: FetchPriority) -> FetchResult<FetchPayload>;

    /// Look up the children of a category group.
    fn fetch_category(&self, category_id: &str) -> FetchResult<CategoryGroup>;
}

/// A fetch result that may not have arrived yet.
#[derive(Debug)]
pub struct Pending<T> {
    state: PendingState<T>,
}

#[derive(Debug)]
enum PendingState<T> {
    Ready(Option<FetchResult<T>>),
    Waiting {
        rx: Receiver<FetchResult<T>>,
        deadline: Instant,
    },
    Taken,
}

impl<T> Pending<T> {
    /// An already-settled result.
    #[must_use]
    pub fn ready(result: FetchResult<T>) -> Self {
        Self {
            state: PendingState::Ready(Some(result)),
        }
    }

    fn waiting(rx: Receiver<FetchResult<T>>, deadline: Instant) -> Self {
        Self {
            state: PendingState::Waiting { rx, deadline },
        }
    }

    /// Take the result if it is available. Returns `Some` exactly once.
    pub fn poll(&mut self, now: Instant) -> Option<FetchResult<T>> {
        let outcome = match &mut self.state {
            PendingState::Ready(result) => result.take(),
            PendingState::Waiting { rx, deadline } => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) if now < *deadline => return None,
                Err(TryRecvError::Empty) => Some(Err(FetchError::Timeout)),
                Err(TryRecvError::Disconnected) => Some(Err(FetchError::Disconnected)),
            },
            PendingState::Taken => None,
        };
        self.state = PendingState::Taken;
        outcome
    }

    /// Whether the result was already taken.
    #[must_use]
    pub fn is_taken(&self) -> bool {
        matches!(self.state, PendingState::Taken)
    }
}

type Job = Box<dyn FnOnce() + Send>;

enum FetchCommand {
    Run(FetchPriority, Job),
    Shutdown,
}

/// Worker thread executing fetch jobs by priority.
struct FetchWorker {
    sender: Sender<FetchCommand>,
    handle: Option<JoinHandle<()>>,
}

impl FetchWorker {
    fn start() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<FetchCommand>();
        let handle = thread::Builder::new()
            .name("trickle-fetch".into())
            .spawn(move || fetch_worker_loop(rx))?;
        Ok(Self {
            sender: tx,
            handle: Some(handle),
        })
    }

    fn submit(&self, priority: FetchPriority, job: Job) -> bool {
        self.sender.send(FetchCommand::Run(priority, job)).is_ok()
    }

    fn shutdown(&mut self) {
        let _ = self.sender.send(FetchCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FetchWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn fetch_worker_loop(rx: Receiver<FetchCommand>) {
    let mut queues: [VecDeque<Job>; 3] = [VecDeque::new(), VecDeque::new(), VecDeque::new()];

    loop {
        if queues.iter().all(VecDeque::is_empty) {
            match rx.recv() {
                Ok(FetchCommand::Run(priority, job)) => queues[priority.slot()].push_back(job),
                Ok(FetchCommand::Shutdown) | Err(_) => return,
            }
        }

        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                FetchCommand::Run(priority, job) => queues[priority.slot()].push_back(job),
                FetchCommand::Shutdown => return,
            }
        }

        if let Some(job) = queues.iter_mut().find_map(VecDeque::pop_front) {
            job();
        }
    }
}

/// Retry loop shared by both modes.
fn with_retry<T>(
    options: &FetchOptions,
    token: &CancellationToken,
    label: &str,
    mut op: impl FnMut() -> FetchResult<T>,
) -> FetchResult<T> {
    let mut attempt: u32 = 0;
    loop {
        if token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < options.retries => {
                attempt += 1;
                tracing::debug!(reference = label, attempt, error = %err, "retrying fetch");
                if !options.backoff.is_zero() {
                    thread::sleep(options.backoff * attempt);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// [`ItemSource`] plus retry, timeout, and execution policy.
pub struct FetchClient {
    source: Arc<dyn ItemSource>,
    options: FetchOptions,
    worker: Option<FetchWorker>,
}

impl fmt::Debug for FetchClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchClient")
            .field("options", &self.options)
            .field("mode", &self.mode())
            .finish()
    }
}

impl FetchClient {
    /// Create a client. If the worker thread cannot be spawned the client
    /// degrades to inline execution.
    #[must_use]
    pub fn new(source: Arc<dyn ItemSource>, options: FetchOptions, mode: FetchMode) -> Self {
        let worker = match mode {
            FetchMode::Inline => None,
            FetchMode::Background => match FetchWorker::start() {
                Ok(worker) => Some(worker),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to spawn fetch worker; fetching inline");
                    None
                }
            },
        };
        Self {
            source,
            options,
            worker,
        }
    }

    /// Effective execution mode.
    #[must_use]
    pub fn mode(&self) -> FetchMode {
        if self.worker.is_some() {
            FetchMode::Background
        } else {
            FetchMode::Inline
        }
    }

    #[must_use]
    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Fetch the items behind a lazy reference.
    pub fn fetch_items(
        &self,
        reference: &str,
        priority: FetchPriority,
        token: &CancellationToken,
        now: Instant,
    ) -> Pending<Vec<RenderItem>> {
        let source = Arc::clone(&self.source);
        let options = self.job_options();
        let token = token.clone();
        let reference = reference.to_string();
        self.dispatch(priority, now, move || {
            with_retry(&options, &token, &reference, || {
                source
                    .fetch(&reference, priority)
                    .map(FetchPayload::into_items)
            })
        })
    }

    /// Look up a category group's children.
    pub fn fetch_category(
        &self,
        category_id: &str,
        token: &CancellationToken,
        now: Instant,
    ) -> Pending<CategoryGroup> {
        let source = Arc::clone(&self.source);
        let options = self.job_options();
        let token = token.clone();
        let category_id = category_id.to_string();
        self.dispatch(FetchPriority::Normal, now, move || {
            with_retry(&options, &token, &category_id, || {
                source.fetch_category(&category_id)
            })
        })
    }

    /// Options a job runs with. Inline jobs run on the render thread, so
    /// they drop the backoff.
    fn job_options(&self) -> FetchOptions {
        let mut options = self.options.clone();
        if self.worker.is_none() {
            options.backoff = Duration::ZERO;
        }
        options
    }

    fn dispatch<T, F>(&self, priority: FetchPriority, now: Instant, job: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> FetchResult<T> + Send + 'static,
    {
        let Some(worker) = &self.worker else {
            return Pending::ready(job());
        };
        let (tx, rx) = mpsc::channel();
        let submitted = worker.submit(
            priority,
            Box::new(move || {
                let _ = tx.send(job());
            }),
        );
        if !submitted {
            return Pending::ready(Err(FetchError::Disconnected));
        }
        Pending::waiting(rx, now + self.options.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionController;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        failures: AtomicUsize,
        calls: AtomicUsize,
        error: FetchError,
    }

    impl Flaky {
        fn new(failures: usize, error: FetchError) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
                error,
            }
        }
    }

    impl ItemSource for Flaky {
        fn fetch(&self, _reference: &str, _priority: FetchPriority) -> FetchResult<FetchPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            Ok(FetchPayload::Items(vec![RenderItem::button("ok")]))
        }

        fn fetch_category(&self, category_id: &str) -> FetchResult<CategoryGroup> {
            Ok(CategoryGroup {
                header: Some(category_id.to_uppercase()),
                data: vec![RenderItem::card("child")],
            })
        }
    }

    fn options() -> FetchOptions {
        FetchOptions {
            retries: 1,
            backoff: Duration::ZERO,
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn inline_is_ready_immediately() {
        let sessions = SessionController::new();
        let token = sessions.start_session();
        let client = FetchClient::new(Arc::new(Flaky::new(0, FetchError::Timeout)), options(), FetchMode::Inline);
        let now = Instant::now();
        let mut pending = client.fetch_items("a.json", FetchPriority::High, &token, now);
        assert_eq!(pending.poll(now).unwrap().unwrap().len(), 1);
        assert!(pending.poll(now).is_none());
        assert!(pending.is_taken());
    }

    #[test]
    fn retries_once() {
        let sessions = SessionController::new();
        let token = sessions.start_session();
        let source = Arc::new(Flaky::new(1, FetchError::Failed("boom".into())));
        let client = FetchClient::new(source.clone(), options(), FetchMode::Inline);
        let now = Instant::now();
        let result = client.fetch_items("a.json", FetchPriority::Normal, &token, now).poll(now);
        assert!(result.unwrap().is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn inline_retries_do_not_sleep() {
        let sessions = SessionController::new();
        let token = sessions.start_session();
        let source = Arc::new(Flaky::new(1, FetchError::Timeout));
        let slow_backoff = FetchOptions {
            backoff: Duration::from_secs(30),
            ..options()
        };
        let client = FetchClient::new(source.clone(), slow_backoff, FetchMode::Inline);
        let started = Instant::now();
        let result = client.fetch_items("a.json", FetchPriority::Normal, &token, started).poll(started);
        assert!(result.unwrap().is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(client.options().backoff, Duration::from_secs(30));
    }

    #[test]
    fn gives_up_after_retries() {
        let sessions = SessionController::new();
        let token = sessions.start_session();
        let source = Arc::new(Flaky::new(5, FetchError::Status(503)));
        let client = FetchClient::new(source.clone(), options(), FetchMode::Inline);
        let now = Instant::now();
        let result = client.fetch_items("a.json", FetchPriority::Normal, &token, now).poll(now);
        assert_eq!(result, Some(Err(FetchError::Status(503))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn non_retryable_fails_fast() {
        let sessions = SessionController::new();
        let token = sessions.start_session();
        let source = Arc::new(Flaky::new(5, FetchError::Offline));
        let client = FetchClient::new(source.clone(), options(), FetchMode::Inline);
        let now = Instant::now();
        let result = client.fetch_items("a.json", FetchPriority::Normal, &token, now).poll(now);
        assert_eq!(result, Some(Err(FetchError::Offline)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_token_cancels() {
        let sessions = SessionController::new();
        let token = sessions.start_session();
        sessions.invalidate();
        let source = Arc::new(Flaky::new(0, FetchError::Timeout));
        let client = FetchClient::new(source.clone(), options(), FetchMode::Inline);
        let now = Instant::now();
        let result = client.fetch_items("a.json", FetchPriority::Normal, &token, now).poll(now);
        assert_eq!(result, Some(Err(FetchError::Cancelled)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn background_delivers_result() {
        let sessions = SessionController::new();
        let token = sessions.start_session();
        let client = FetchClient::new(
            Arc::new(Flaky::new(0, FetchError::Timeout)),
            options(),
            FetchMode::Background,
        );
        assert_eq!(client.mode(), FetchMode::Background);
        let mut pending = client.fetch_category("tools", &token, Instant::now());
        let started = Instant::now();
        let group = loop {
            if let Some(result) = pending.poll(Instant::now()) {
                break result.unwrap();
            }
            assert!(started.elapsed() < Duration::from_secs(2));
            thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(group.header.as_deref(), Some("TOOLS"));
    }

    #[test]
    fn waiting_past_deadline_times_out() {
        let (tx, rx) = mpsc::channel::<FetchResult<u8>>();
        let now = Instant::now();
        let mut pending = Pending::waiting(rx, now + Duration::from_millis(5));
        assert!(pending.poll(now).is_none());
        assert_eq!(
            pending.poll(now + Duration::from_millis(6)),
            Some(Err(FetchError::Timeout))
        );
        drop(tx);
    }

    #[test]
    fn high_priority_runs_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let worker = FetchWorker::start().unwrap();

        // Park the worker so the next submissions queue up behind it.
        worker.submit(
            FetchPriority::Normal,
            Box::new(move || {
                let _ = gate_rx.recv();
            }),
        );
        for (priority, tag) in [
            (FetchPriority::Low, "low"),
            (FetchPriority::Normal, "normal"),
            (FetchPriority::High, "high"),
        ] {
            let order = Arc::clone(&order);
            worker.submit(priority, Box::new(move || order.lock().unwrap().push(tag)));
        }
        thread::sleep(Duration::from_millis(20));
        gate_tx.send(()).unwrap();

        let started = Instant::now();
        while order.lock().unwrap().len() < 3 {
            assert!(started.elapsed() < Duration::from_secs(2));
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);
    }

    #[test]
    fn retryable_classification() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::Status(502).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(!FetchError::Decode("x".into()).is_retryable());
        assert_eq!(FetchError::Status(404).to_string(), "remote returned status 404");
    }
}
