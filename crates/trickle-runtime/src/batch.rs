#![forbid(unsafe_code)]

//! Batch renderer: turns a slice of the working list into attached elements.
//!
//! A batch covers `[start, end)` of the working list, where the size comes
//! from the frame controller and is clamped to its hard ceiling. For each
//! index the renderer either skips it (already rendered, or a slot whose
//! expansion failed), expands it (lazy reference), or builds one element
//! from a pooled handle. Built elements collect in a fragment that is
//! appended to the surface once, at opacity 0; the next frame reveals them.
//!
//! # Suspension
//!
//! A lazy reference starts a fetch and the batch suspends on it. The cursor
//! (position, adjusted end, fragment, start time) survives until a later
//! [`BatchRenderer::resume`] finds the fetch settled. Fetched items are
//! merged into the working list at that resumption point: the slot is
//! replaced by its children, `end` moves by the length delta, and rendered
//! indices after the slot shift with it. The same index is then processed
//! again, now holding the first child.
//!
//! Category groups do not suspend the batch. The group element is appended
//! as a placeholder and filled when its lookup settles
//! ([`BatchRenderer::poll_groups`]).
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | session stale at a resumption point | batch is dropped, nothing touches the surface |
//! | lazy fetch fails or times out | slot marked failed and skipped |
//! | expansion nested deeper than the limit | treated as a failed fetch |
//! | malformed item | skipped, counted as a build error |
//! | category lookup fails | that group is detached and released |
//!
//! # Invariants
//!
//! - Each lazy slot is expanded at most once.
//! - Rendered indices stay below the working-list length.
//! - After every batch, attached handles ≤ live cap.
//! - A handle leaves the live window by detach first, then release.

use std::time::{Duration, Instant};

use trickle_core::element::{Element, VISIBLE_OPACITY};
use trickle_core::item::{CategoryGroup, ItemKey, ItemShape, RenderItem};

use crate::fetch::{FetchClient, FetchPriority, Pending};
use crate::frame_controller::FrameController;
use crate::pool::{ElementPool, HandleId, ReleaseOutcome};
use crate::scorer::ScoreTable;
use crate::services::{DetachReason, ViewSurface};
use crate::session::{CancellationToken, Epoch, RenderSession};

/// One slot of the working list.
#[derive(Debug, Clone)]
pub struct WorkingItem {
    pub item: RenderItem,
    /// Scoring identity, fixed when the slot is created.
    pub key: ItemKey,
    /// Lazy expansions above this slot.
    pub depth: u32,
    /// Expansion failed or the item is malformed; never rendered.
    pub skipped: bool,
}

impl WorkingItem {
    fn new(item: RenderItem, position: usize, depth: u32) -> Self {
        let key = item.key(position);
        Self::with_key(item, key, depth)
    }

    fn with_key(item: RenderItem, key: ItemKey, depth: u32) -> Self {
        Self {
            item,
            key,
            depth,
            skipped: false,
        }
    }
}

/// Lifetime counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batches: u64,
    pub appended: u64,
    pub evicted: u64,
    pub expansions: u64,
    pub fetch_failures: u64,
    pub build_errors: u64,
    pub group_failures: u64,
}

/// Summary of a finished batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub session: Epoch,
    pub start: usize,
    /// Index after the last processed slot.
    pub end: usize,
    pub appended: usize,
    pub evicted: usize,
    /// Wall-clock time from start to append, suspensions included.
    pub duration: Duration,
}

/// Result of driving the current batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchProgress {
    /// No batch in progress.
    Idle,
    /// Waiting on a lazy fetch.
    Suspended,
    Finished(BatchReport),
    /// The session went stale mid-batch.
    Cancelled,
}

struct LazyWait {
    index: usize,
    pending: Pending<Vec<RenderItem>>,
}

struct BatchCursor {
    start: usize,
    index: usize,
    end: usize,
    fragment: Vec<HandleId>,
    started_at: Instant,
    priority: FetchPriority,
    waiting: Option<LazyWait>,
}

struct GroupWait {
    handle: HandleId,
    category: String,
    pending: Pending<CategoryGroup>,
}

/// Limits applied by the batch renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub live_cap: usize,
    pub low_memory: bool,
    pub max_expansion_depth: u32,
}

/// Owns the working list, the pool, and the in-progress batch.
pub struct BatchRenderer {
    pool: ElementPool,
    frames: FrameController,
    fetch: FetchClient,
    limits: BatchLimits,
    session: Option<RenderSession>,
    list: Vec<WorkingItem>,
    next_start: usize,
    cursor: Option<BatchCursor>,
    pending_reveal: Vec<HandleId>,
    groups: Vec<GroupWait>,
    stats: BatchStats,
}

impl std::fmt::Debug for BatchRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRenderer")
            .field("session", &self.session.as_ref().map(RenderSession::epoch))
            .field("len", &self.list.len())
            .field("next_start", &self.next_start)
            .field("in_batch", &self.cursor.is_some())
            .field("pending_groups", &self.groups.len())
            .finish()
    }
}

impl BatchRenderer {
    #[must_use]
    pub fn new(
        pool: ElementPool,
        frames: FrameController,
        fetch: FetchClient,
        limits: BatchLimits,
    ) -> Self {
        Self {
            pool,
            frames,
            fetch,
            limits,
            session: None,
            list: Vec::new(),
            next_start: 0,
            cursor: None,
            pending_reveal: Vec::new(),
            groups: Vec::new(),
            stats: BatchStats::default(),
        }
    }

    /// Install a new session and working list. The previous session must
    /// have been torn down.
    pub fn begin(&mut self, session: RenderSession, items: Vec<RenderItem>) {
        self.list = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| WorkingItem::new(item, i, 0))
            .collect();
        self.next_start = 0;
        self.cursor = None;
        self.pending_reveal.clear();
        self.groups.clear();
        tracing::debug!(epoch = session.epoch(), len = self.list.len(), "render session started");
        crate::debug_trace!("session {} started with {} items", session.epoch(), self.list.len());
        self.session = Some(session);
    }

    /// Scoring identities of the working list, in order.
    #[must_use]
    pub fn keys(&self) -> Vec<ItemKey> {
        self.list.iter().map(|w| w.key.clone()).collect()
    }

    /// Stable-sort unrendered slots by descending score. Does nothing when
    /// every score is zero or a batch already started.
    pub fn apply_scores(&mut self, scores: &ScoreTable) -> bool {
        if !scores.has_nonzero() || self.next_start > 0 || self.cursor.is_some() {
            return false;
        }
        self.list
            .sort_by(|a, b| scores.get(&b.key).total_cmp(&scores.get(&a.key)));
        tracing::debug!(len = self.list.len(), "working list reordered by usage");
        true
    }

    /// Start a batch at the current position. Returns `false` if a batch is
    /// already in progress or nothing is left.
    pub fn start_batch(&mut self, priority: FetchPriority, now: Instant) -> bool {
        let size = self.frames.batch_size(self.limits.low_memory);
        self.start_batch_sized(size, priority, now)
    }

    /// Start a batch of an explicit size (clamped to the hard ceiling).
    pub fn start_batch_sized(&mut self, size: usize, priority: FetchPriority, _now: Instant) -> bool {
        let size = size.clamp(1, self.frames.ceiling());
        self.open_batch(size, priority)
    }

    /// Start one batch covering everything not yet rendered. Not clamped;
    /// the live cap is still enforced when the batch finishes.
    pub fn start_remaining(&mut self, priority: FetchPriority, _now: Instant) -> bool {
        let size = self.list.len().saturating_sub(self.next_start).max(1);
        self.open_batch(size, priority)
    }

    fn open_batch(&mut self, size: usize, priority: FetchPriority) -> bool {
        if self.cursor.is_some() || self.is_exhausted() {
            return false;
        }
        if self.session.as_ref().is_none_or(RenderSession::is_stale) {
            return false;
        }
        let start = self.next_start;
        let end = (start + size).min(self.list.len());
        self.cursor = Some(BatchCursor {
            start,
            index: start,
            end,
            fragment: Vec::with_capacity(size),
            started_at: Instant::now(),
            priority,
            waiting: None,
        });
        crate::debug_trace!("batch start={} end={} size={}", start, end, size);
        true
    }

    /// Drive the current batch as far as it can go without blocking.
    pub fn resume(&mut self, surface: &mut dyn ViewSurface, now: Instant) -> BatchProgress {
        let Some(mut cursor) = self.cursor.take() else {
            return BatchProgress::Idle;
        };
        let Some(session) = self.session.as_ref() else {
            return BatchProgress::Cancelled;
        };
        let token = session.token().clone();

        while cursor.index < cursor.end.min(self.list.len()) {
            if token.is_cancelled() {
                self.drop_fragment(&mut cursor, now);
                return BatchProgress::Cancelled;
            }

            if let Some(mut wait) = cursor.waiting.take() {
                match wait.pending.poll(now) {
                    None => {
                        cursor.waiting = Some(wait);
                        self.cursor = Some(cursor);
                        return BatchProgress::Suspended;
                    }
                    Some(Ok(items)) => self.merge_expansion(&mut cursor, wait.index, items),
                    Some(Err(err)) => {
                        self.stats.fetch_failures += 1;
                        tracing::warn!(index = wait.index, error = %err, "lazy expansion failed; skipping slot");
                        self.list[wait.index].skipped = true;
                        cursor.index += 1;
                    }
                }
                continue;
            }

            let index = cursor.index;
            if self.list[index].skipped || self.is_rendered(index) {
                cursor.index += 1;
                continue;
            }
            self.process_slot(&mut cursor, index, &token, now);
        }

        if token.is_cancelled() {
            self.drop_fragment(&mut cursor, now);
            return BatchProgress::Cancelled;
        }
        BatchProgress::Finished(self.finish_batch(cursor, surface, now))
    }

    fn is_rendered(&self, index: usize) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_rendered(index))
    }

    fn process_slot(
        &mut self,
        cursor: &mut BatchCursor,
        index: usize,
        token: &CancellationToken,
        now: Instant,
    ) {
        let slot = &self.list[index];
        let shape = match slot.item.shape() {
            Ok(shape) => shape,
            Err(err) => {
                self.stats.build_errors += 1;
                tracing::warn!(index, error = %err, "skipping malformed item");
                self.list[index].skipped = true;
                cursor.index += 1;
                return;
            }
        };

        match shape {
            ItemShape::LazyRef(reference) => {
                if slot.depth >= self.limits.max_expansion_depth {
                    self.stats.fetch_failures += 1;
                    tracing::warn!(index, reference, depth = slot.depth, "lazy expansion too deep; skipping slot");
                    self.list[index].skipped = true;
                    cursor.index += 1;
                    return;
                }
                let pending = self.fetch.fetch_items(reference, cursor.priority, token, now);
                cursor.waiting = Some(LazyWait { index, pending });
            }
            ItemShape::Leaf(kind) => {
                let handle = self.pool.acquire(now);
                if let Some(element) = self.pool.get_mut(handle) {
                    element.fill_leaf(kind, slot.key.clone(), &slot.item);
                }
                self.accept(cursor, index, handle);
            }
            ItemShape::InlineGroup(kind, children) => {
                let handle = self.pool.acquire(now);
                if let Some(element) = self.pool.get_mut(handle) {
                    let dropped =
                        element.fill_group(kind, slot.key.clone(), slot.item.title.as_deref(), children);
                    if dropped > 0 {
                        tracing::debug!(index, dropped, "group children that are not leaves were dropped");
                    }
                }
                self.accept(cursor, index, handle);
            }
            ItemShape::CategoryGroup(kind, category) => {
                let handle = self.pool.acquire(now);
                if let Some(element) = self.pool.get_mut(handle) {
                    element.fill_category_placeholder(kind, slot.key.clone(), slot.item.title.as_deref());
                }
                let pending = self.fetch.fetch_category(category, token, now);
                self.groups.push(GroupWait {
                    handle,
                    category: category.to_string(),
                    pending,
                });
                self.accept(cursor, index, handle);
            }
        }
    }

    fn accept(&mut self, cursor: &mut BatchCursor, index: usize, handle: HandleId) {
        cursor.fragment.push(handle);
        if let Some(session) = self.session.as_mut() {
            session.mark_rendered(index);
        }
        cursor.index += 1;
    }

    /// Replace the slot at `index` with its fetched children.
    fn merge_expansion(&mut self, cursor: &mut BatchCursor, index: usize, items: Vec<RenderItem>) {
        let parent = &self.list[index];
        let depth = parent.depth + 1;
        let parent_key = parent.key.clone();
        let added = items.len();
        let delta = added as isize - 1;
        let children: Vec<WorkingItem> = items
            .into_iter()
            .enumerate()
            .map(|(offset, item)| {
                let key = item.child_key(&parent_key, offset);
                WorkingItem::with_key(item, key, depth)
            })
            .collect();
        self.list.splice(index..=index, children);
        self.stats.expansions += 1;

        cursor.end = cursor.end.saturating_add_signed(delta).max(index);
        if let Some(session) = self.session.as_mut() {
            session.shift_rendered_after(index, delta);
            session.clamp_rendered(self.list.len());
        }
        tracing::debug!(index, added, len = self.list.len(), "lazy slot expanded");
    }

    fn finish_batch(
        &mut self,
        cursor: BatchCursor,
        surface: &mut dyn ViewSurface,
        now: Instant,
    ) -> BatchReport {
        let appended = cursor.fragment.len();
        if appended > 0 {
            let fragment: Vec<(HandleId, &Element)> = cursor
                .fragment
                .iter()
                .filter_map(|&id| self.pool.get(id).map(|el| (id, el)))
                .collect();
            surface.append(&fragment);
        }
        if let Some(session) = self.session.as_mut() {
            for &id in &cursor.fragment {
                session.push_live(id);
            }
        }
        self.pending_reveal.extend_from_slice(&cursor.fragment);
        self.next_start = cursor.index.max(self.next_start);

        let evicted = self.enforce_live_cap(surface, now);
        let duration = cursor.started_at.elapsed();
        self.frames.record(duration);
        self.stats.batches += 1;
        self.stats.appended += appended as u64;

        let session = self.session.as_ref().map_or(0, RenderSession::epoch);
        tracing::debug!(
            epoch = session,
            start = cursor.start,
            end = cursor.index,
            appended,
            evicted,
            duration_us = duration.as_micros() as u64,
            "batch complete"
        );
        crate::debug_trace!("batch done: epoch={} appended={} evicted={}", session, appended, evicted);

        BatchReport {
            session,
            start: cursor.start,
            end: cursor.index,
            appended,
            evicted,
            duration,
        }
    }

    fn drop_fragment(&mut self, cursor: &mut BatchCursor, now: Instant) {
        for id in cursor.fragment.drain(..) {
            self.groups.retain(|g| g.handle != id);
            self.pool.release(id, now);
        }
        tracing::debug!(start = cursor.start, "stale batch dropped");
    }

    fn enforce_live_cap(&mut self, surface: &mut dyn ViewSurface, now: Instant) -> usize {
        let cap = self.limits.live_cap.max(1);
        let mut evicted = 0;
        while let Some(session) = self.session.as_mut() {
            if session.live().len() <= cap {
                break;
            }
            let Some(id) = session.pop_oldest() else {
                break;
            };
            surface.detach(id, DetachReason::Evicted);
            self.forget(id);
            self.pool.release(id, now);
            evicted += 1;
        }
        self.stats.evicted += evicted as u64;
        evicted
    }

    fn forget(&mut self, id: HandleId) {
        self.pending_reveal.retain(|&h| h != id);
        self.groups.retain(|g| g.handle != id);
    }

    /// Reveal handles appended on an earlier frame. Returns the scoring
    /// identities of the revealed elements.
    pub fn reveal_pending(&mut self, surface: &mut dyn ViewSurface) -> Vec<ItemKey> {
        let mut revealed = Vec::with_capacity(self.pending_reveal.len());
        for id in self.pending_reveal.drain(..) {
            if let Some(element) = self.pool.get_mut(id) {
                element.opacity = VISIBLE_OPACITY;
                surface.set_opacity(id, VISIBLE_OPACITY);
                if let Some(key) = element.key.clone() {
                    revealed.push(key);
                }
            }
        }
        revealed
    }

    /// Fill category groups whose lookups settled. Returns how many settled.
    pub fn poll_groups(&mut self, surface: &mut dyn ViewSurface, now: Instant) -> usize {
        if self.groups.is_empty() {
            return 0;
        }
        if self.session.as_ref().is_none_or(RenderSession::is_stale) {
            self.groups.clear();
            return 0;
        }

        let mut settled = 0;
        let mut index = 0;
        while index < self.groups.len() {
            let Some(result) = self.groups[index].pending.poll(now) else {
                index += 1;
                continue;
            };
            let wait = self.groups.swap_remove(index);
            settled += 1;
            match result {
                Ok(group) => {
                    if let Some(element) = self.pool.get_mut(wait.handle) {
                        let dropped = element.complete_category(group.header.as_deref(), &group.data);
                        if dropped > 0 {
                            tracing::debug!(category = %wait.category, dropped, "category children that are not leaves were dropped");
                        }
                        surface.update(wait.handle, element);
                    }
                }
                Err(err) => {
                    self.stats.group_failures += 1;
                    tracing::warn!(category = %wait.category, error = %err, "category lookup failed; removing group");
                    if let Some(session) = self.session.as_mut() {
                        session.remove_live(wait.handle);
                    }
                    surface.detach(wait.handle, DetachReason::Failed);
                    self.pending_reveal.retain(|&h| h != wait.handle);
                    self.pool.release(wait.handle, now);
                }
            }
        }
        settled
    }

    /// Detach and release everything the session attached, and forget the
    /// session. Returns the number of handles released.
    pub fn teardown(&mut self, surface: &mut dyn ViewSurface, now: Instant) -> usize {
        if let Some(mut cursor) = self.cursor.take() {
            self.drop_fragment(&mut cursor, now);
        }
        self.pending_reveal.clear();
        self.groups.clear();

        let mut released = 0;
        if let Some(mut session) = self.session.take() {
            let live: Vec<HandleId> = session.drain_live().collect();
            for id in live {
                surface.detach(id, DetachReason::Cleared);
                if self.pool.release(id, now) != ReleaseOutcome::NotInUse {
                    released += 1;
                }
            }
            tracing::debug!(epoch = session.epoch(), released, "render session torn down");
        }
        self.list.clear();
        self.next_start = 0;
        released
    }

    /// No slots left to process (the current batch may still be finishing).
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.next_start >= self.list.len()
    }

    #[must_use]
    pub fn in_batch(&self) -> bool {
        self.cursor.is_some()
    }

    #[must_use]
    pub fn has_pending_groups(&self) -> bool {
        !self.groups.is_empty()
    }

    #[must_use]
    pub fn has_pending_reveal(&self) -> bool {
        !self.pending_reveal.is_empty()
    }

    #[must_use]
    pub fn session(&self) -> Option<&RenderSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[must_use]
    pub fn working_list(&self) -> &[WorkingItem] {
        &self.list
    }

    #[must_use]
    pub fn next_start(&self) -> usize {
        self.next_start
    }

    #[must_use]
    pub fn pool(&self) -> &ElementPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ElementPool {
        &mut self.pool
    }

    #[must_use]
    pub fn frames(&self) -> &FrameController {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut FrameController {
        &mut self.frames
    }

    #[must_use]
    pub fn limits(&self) -> BatchLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: BatchLimits) {
        self.limits = limits;
    }

    #[must_use]
    pub fn stats(&self) -> BatchStats {
        self.stats
    }
}
