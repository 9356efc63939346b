#![forbid(unsafe_code)]

//! Usage-based priority scoring.
//!
//! Items that are viewed and clicked often should surface earlier. Each
//! item identity accumulates view and click counts, and its score is
//!
//! ```text
//! score = ln(1 + views) + 3 · ln(1 + clicks)
//! ```
//!
//! Scoring sits behind the [`ScoreStrategy`] trait with two
//! implementations:
//!
//! - [`InlineScorer`]: counters and scoring on the calling thread.
//! - [`WorkerScorer`]: counters live on a dedicated thread; queries are
//!   answered over a channel. A local mirror of the counters provides the
//!   fallback table when the worker does not reply before the timeout.
//!
//! [`PriorityScorer`] owns the choice: lists shorter than the worker
//! threshold are not reordered at all; longer lists query the worker,
//! which is spawned on first use and seeded with the inline counts.
//!
//! Queries are non-blocking ([`ScoreQuery::poll`]) so the engine can keep
//! ticking while the worker computes.

use std::collections::HashMap;
use std::mem;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use trickle_core::item::ItemKey;

/// Kind of usage signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageEvent {
    View,
    Click,
}

/// Score for the given counts.
#[inline]
#[must_use]
pub fn usage_score(views: u64, clicks: u64) -> f64 {
    (views as f64).ln_1p() + 3.0 * (clicks as f64).ln_1p()
}

/// Per-identity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub views: u64,
    pub clicks: u64,
}

impl UsageCounts {
    fn bump(&mut self, event: UsageEvent) {
        match event {
            UsageEvent::View => self.views = self.views.saturating_add(1),
            UsageEvent::Click => self.clicks = self.clicks.saturating_add(1),
        }
    }

    #[must_use]
    pub fn score(&self) -> f64 {
        usage_score(self.views, self.clicks)
    }
}

/// Identity → score.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreTable {
    scores: HashMap<ItemKey, f64>,
}

impl ScoreTable {
    /// Score of `key`; unknown keys score zero.
    #[must_use]
    pub fn get(&self, key: &ItemKey) -> f64 {
        self.scores.get(key).copied().unwrap_or(0.0)
    }

    pub fn insert(&mut self, key: ItemKey, score: f64) {
        self.scores.insert(key, score.max(0.0));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Whether any score is non-zero.
    #[must_use]
    pub fn has_nonzero(&self) -> bool {
        self.scores.values().any(|&s| s > 0.0)
    }
}

/// Scoring configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScorerConfig {
    /// Item count at which reordering (and the worker) kicks in.
    pub worker_threshold: usize,
    /// How long a query waits for the worker before falling back.
    pub reply_timeout: Duration,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            worker_threshold: 30,
            reply_timeout: Duration::from_millis(80),
        }
    }
}

/// An in-progress score query.
#[derive(Debug)]
pub enum ScoreQuery {
    /// Answer available immediately.
    Ready(ScoreTable),
    /// Waiting for a worker reply.
    Waiting {
        reply: Receiver<ScoreTable>,
        deadline: Instant,
        fallback: ScoreTable,
    },
}

impl ScoreQuery {
    /// Non-blocking check. Returns the table once the reply arrived or the
    /// deadline passed (fallback table).
    pub fn poll(&mut self, now: Instant) -> Option<ScoreTable> {
        match self {
            Self::Ready(table) => Some(mem::take(table)),
            Self::Waiting {
                reply,
                deadline,
                fallback,
            } => match reply.try_recv() {
                Ok(table) => Some(table),
                Err(TryRecvError::Empty) if now < *deadline => None,
                Err(TryRecvError::Empty) => {
                    tracing::debug!("score query timed out; using local counters");
                    Some(mem::take(fallback))
                }
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!("scorer worker went away; using local counters");
                    Some(mem::take(fallback))
                }
            },
        }
    }

    /// Block until the reply or the deadline.
    #[must_use]
    pub fn wait(self) -> ScoreTable {
        match self {
            Self::Ready(table) => table,
            Self::Waiting {
                reply,
                deadline,
                fallback,
            } => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match reply.recv_timeout(remaining) {
                    Ok(table) => table,
                    Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => fallback,
                }
            }
        }
    }
}

/// Scoring strategy.
pub trait ScoreStrategy: Send {
    /// Count one usage event.
    fn record_event(&mut self, event: UsageEvent, key: &ItemKey);

    /// Start a score query for `keys`.
    fn query(&mut self, keys: &[ItemKey], now: Instant) -> ScoreQuery;

    /// Blocking query honoring the same timeout contract.
    fn score_all(&mut self, keys: &[ItemKey]) -> ScoreTable {
        self.query(keys, Instant::now()).wait()
    }

    /// Name for logs.
    fn name(&self) -> &'static str;
}

/// Synchronous scorer.
#[derive(Debug, Clone, Default)]
pub struct InlineScorer {
    counts: HashMap<ItemKey, UsageCounts>,
}

impl InlineScorer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn counts(&self, key: &ItemKey) -> UsageCounts {
        self.counts.get(key).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn score(&self, key: &ItemKey) -> f64 {
        self.counts(key).score()
    }

    /// Scores for `keys` (only keys with any usage are stored).
    #[must_use]
    pub fn table(&self, keys: &[ItemKey]) -> ScoreTable {
        let mut table = ScoreTable::default();
        for key in keys {
            if let Some(counts) = self.counts.get(key) {
                table.insert(key.clone(), counts.score());
            }
        }
        table
    }

    fn bump(&mut self, event: UsageEvent, key: &ItemKey) {
        self.counts.entry(key.clone()).or_default().bump(event);
    }
}

impl ScoreStrategy for InlineScorer {
    fn record_event(&mut self, event: UsageEvent, key: &ItemKey) {
        self.bump(event, key);
    }

    fn query(&mut self, keys: &[ItemKey], _now: Instant) -> ScoreQuery {
        ScoreQuery::Ready(self.table(keys))
    }

    fn name(&self) -> &'static str {
        "inline"
    }
}

enum WorkerCommand {
    Record(UsageEvent, ItemKey),
    Score {
        keys: Vec<ItemKey>,
        reply: Sender<ScoreTable>,
    },
    Shutdown,
}

/// Scorer whose counters live on a dedicated thread.
pub struct WorkerScorer {
    sender: Sender<WorkerCommand>,
    handle: Option<JoinHandle<()>>,
    mirror: InlineScorer,
    timeout: Duration,
}

impl std::fmt::Debug for WorkerScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerScorer")
            .field("timeout", &self.timeout)
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl WorkerScorer {
    /// Spawn the worker, seeded with existing counts.
    pub fn spawn(seed: InlineScorer, timeout: Duration) -> std::io::Result<Self> {
        Self::spawn_with_delay(seed, timeout, Duration::ZERO)
    }

    fn spawn_with_delay(
        seed: InlineScorer,
        timeout: Duration,
        reply_delay: Duration,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<WorkerCommand>();
        let worker_counts = seed.clone();
        let handle = thread::Builder::new()
            .name("trickle-scorer".into())
            .spawn(move || worker_loop(rx, worker_counts, reply_delay))?;
        tracing::debug!(?timeout, "scorer worker started");
        Ok(Self {
            sender: tx,
            handle: Some(handle),
            mirror: seed,
            timeout,
        })
    }

    /// Local mirror used for fallback answers.
    #[must_use]
    pub fn mirror(&self) -> &InlineScorer {
        &self.mirror
    }

    fn shutdown(&mut self) {
        let _ = self.sender.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl ScoreStrategy for WorkerScorer {
    fn record_event(&mut self, event: UsageEvent, key: &ItemKey) {
        self.mirror.bump(event, key);
        let _ = self.sender.send(WorkerCommand::Record(event, key.clone()));
    }

    fn query(&mut self, keys: &[ItemKey], now: Instant) -> ScoreQuery {
        let fallback = self.mirror.table(keys);
        let (reply, rx) = mpsc::channel();
        let sent = self.sender.send(WorkerCommand::Score {
            keys: keys.to_vec(),
            reply,
        });
        if sent.is_err() {
            return ScoreQuery::Ready(fallback);
        }
        ScoreQuery::Waiting {
            reply: rx,
            deadline: now + self.timeout,
            fallback,
        }
    }

    fn name(&self) -> &'static str {
        "worker"
    }
}

impl Drop for WorkerScorer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: Receiver<WorkerCommand>, mut counts: InlineScorer, reply_delay: Duration) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            WorkerCommand::Record(event, key) => counts.bump(event, &key),
            WorkerCommand::Score { keys, reply } => {
                if !reply_delay.is_zero() {
                    thread::sleep(reply_delay);
                }
                let _ = reply.send(counts.table(&keys));
            }
            WorkerCommand::Shutdown => break,
        }
    }
}

/// Threshold-gated scorer owned by the renderer context.
#[derive(Debug)]
pub struct PriorityScorer {
    config: ScorerConfig,
    inline: InlineScorer,
    worker: Option<WorkerScorer>,
}

impl PriorityScorer {
    #[must_use]
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            config,
            inline: InlineScorer::new(),
            worker: None,
        }
    }

    pub fn record_event(&mut self, event: UsageEvent, key: &ItemKey) {
        match self.worker.as_mut() {
            Some(worker) => worker.record_event(event, key),
            None => self.inline.record_event(event, key),
        }
    }

    /// Query scores for a list, or `None` when the list is too short to be
    /// worth reordering.
    pub fn query(&mut self, keys: &[ItemKey], now: Instant) -> Option<ScoreQuery> {
        if keys.len() < self.config.worker_threshold {
            return None;
        }
        if self.worker.is_none() {
            match WorkerScorer::spawn(self.inline.clone(), self.config.reply_timeout) {
                Ok(worker) => self.worker = Some(worker),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to spawn scorer worker; scoring inline");
                    return Some(self.inline.query(keys, now));
                }
            }
        }
        self.worker.as_mut().map(|worker| worker.query(keys, now))
    }

    /// Which strategy currently answers queries.
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        match &self.worker {
            Some(worker) => worker.name(),
            None => self.inline.name(),
        }
    }

    /// Current local score of `key`.
    #[must_use]
    pub fn local_score(&self, key: &ItemKey) -> f64 {
        match &self.worker {
            Some(worker) => worker.mirror().score(key),
            None => self.inline.score(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> ItemKey {
        ItemKey::Id(id.into())
    }

    #[test]
    fn score_formula() {
        assert_eq!(usage_score(0, 0), 0.0);
        let s = usage_score(3, 1);
        assert!((s - (4f64.ln() + 3.0 * 2f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn clicks_outweigh_views() {
        assert!(usage_score(0, 1) > usage_score(3, 0));
    }

    #[test]
    fn inline_table_only_has_used_keys() {
        let mut scorer = InlineScorer::new();
        scorer.record_event(UsageEvent::Click, &key("a"));
        let table = scorer.score_all(&[key("a"), key("b")]);
        assert_eq!(table.len(), 1);
        assert!(table.get(&key("a")) > 0.0);
        assert_eq!(table.get(&key("b")), 0.0);
        assert!(table.has_nonzero());
    }

    #[test]
    fn worker_answers_queries() {
        let mut worker = WorkerScorer::spawn(InlineScorer::new(), Duration::from_secs(2)).unwrap();
        worker.record_event(UsageEvent::View, &key("a"));
        worker.record_event(UsageEvent::Click, &key("a"));
        let table = worker.score_all(&[key("a")]);
        assert!((table.get(&key("a")) - usage_score(1, 1)).abs() < 1e-12);
    }

    #[test]
    fn worker_is_seeded() {
        let mut seed = InlineScorer::new();
        seed.record_event(UsageEvent::Click, &key("x"));
        let mut worker = WorkerScorer::spawn(seed, Duration::from_secs(2)).unwrap();
        assert!(worker.score_all(&[key("x")]).get(&key("x")) > 0.0);
    }

    #[test]
    fn slow_worker_falls_back_to_mirror() {
        let mut worker = WorkerScorer::spawn_with_delay(
            InlineScorer::new(),
            Duration::from_millis(10),
            Duration::from_millis(300),
        )
        .unwrap();
        worker.record_event(UsageEvent::Click, &key("a"));

        let started = Instant::now();
        let table = worker.score_all(&[key("a")]);
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!((table.get(&key("a")) - usage_score(0, 1)).abs() < 1e-12);
    }

    #[test]
    fn poll_returns_fallback_after_deadline() {
        let mut worker = WorkerScorer::spawn_with_delay(
            InlineScorer::new(),
            Duration::from_millis(5),
            Duration::from_millis(200),
        )
        .unwrap();
        let now = Instant::now();
        let mut query = worker.query(&[key("a")], now);
        assert!(query.poll(now).is_none());
        let table = query.poll(now + Duration::from_millis(6));
        assert_eq!(table, Some(ScoreTable::default()));
    }

    #[test]
    fn priority_scorer_skips_short_lists() {
        let mut scorer = PriorityScorer::new(ScorerConfig::default());
        let keys: Vec<_> = (0..29).map(ItemKey::Position).collect();
        assert!(scorer.query(&keys, Instant::now()).is_none());
        assert_eq!(scorer.strategy_name(), "inline");
    }

    #[test]
    fn priority_scorer_spawns_worker_at_threshold() {
        let mut scorer = PriorityScorer::new(ScorerConfig {
            reply_timeout: Duration::from_secs(2),
            ..ScorerConfig::default()
        });
        scorer.record_event(UsageEvent::Click, &ItemKey::Position(7));
        let keys: Vec<_> = (0..30).map(ItemKey::Position).collect();
        let query = scorer.query(&keys, Instant::now()).unwrap();
        assert_eq!(scorer.strategy_name(), "worker");
        let table = query.wait();
        assert!(table.get(&ItemKey::Position(7)) > 0.0);
        assert!(scorer.local_score(&ItemKey::Position(7)) > 0.0);
    }
}
