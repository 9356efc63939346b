#![forbid(unsafe_code)]

//! Element pool: a slot arena with recycling.
//!
//! Handles are a slot index plus a generation ([`HandleId`]) rather than
//! shared references. Every release bumps the slot's generation, so a stale
//! handle never resolves to the element that later reuses its slot. Each
//! slot is in one of three states:
//!
//! - **in use**: owned by the renderer (attached or about to be attached)
//! - **recycled**: holds a blank element ready for [`ElementPool::acquire`]
//! - **vacant**: discarded; the index is reused when a new element is created
//!
//! At most `capacity` slots are kept recycled; releases beyond that discard
//! the element. An idle pool (nothing in use, no activity for
//! `idle_timeout`) drops its recycled elements on [`ElementPool::trim_idle`].
//!
//! # Invariants
//!
//! - A slot is never both in use and recycled.
//! - Releasing a handle that is not in use is a no-op ([`ReleaseOutcome::NotInUse`]).
//! - A handle from before a release never resolves again.
//! - A recycled element is blank when handed out.

use std::time::{Duration, Instant};

use trickle_core::element::Element;

/// Reference to a pooled element slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    /// Slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    /// Slot generation when this handle was issued.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

/// Pool sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum number of recycled elements kept for reuse.
    pub capacity: usize,
    /// Inactivity after which recycled elements are dropped.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 20,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// What happened to a released handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Cleared and kept for reuse.
    Recycled,
    /// Cleared and dropped because the pool was full.
    Discarded,
    /// The handle was not in use.
    NotInUse,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub recycled: u64,
    pub discarded: u64,
    pub trimmed: u64,
}

#[derive(Debug)]
struct Slot {
    element: Element,
    in_use: bool,
}

/// Arena of reusable elements.
#[derive(Debug)]
pub struct ElementPool {
    slots: Vec<Option<Slot>>,
    /// Per-slot generation; outlives discarded slots.
    generations: Vec<u32>,
    /// Recycled slot indices (stack).
    recycled: Vec<u32>,
    /// Discarded slot indices available for new elements.
    vacant: Vec<u32>,
    in_use: usize,
    config: PoolConfig,
    last_activity: Option<Instant>,
    stats: PoolStats,
}

impl ElementPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            recycled: Vec::with_capacity(config.capacity),
            vacant: Vec::new(),
            in_use: 0,
            config,
            last_activity: None,
            stats: PoolStats::default(),
        }
    }

    /// Hand out a blank element, reusing a recycled slot when possible.
    pub fn acquire(&mut self, now: Instant) -> HandleId {
        self.last_activity = Some(now);
        self.in_use += 1;

        if let Some(idx) = self.recycled.pop() {
            if let Some(Some(slot)) = self.slots.get_mut(idx as usize) {
                slot.element.reset();
                slot.in_use = true;
                self.stats.reused += 1;
                return self.handle(idx);
            }
        }

        let fresh = Slot {
            element: Element::blank(),
            in_use: true,
        };
        self.stats.created += 1;
        if let Some(idx) = self.vacant.pop() {
            self.slots[idx as usize] = Some(fresh);
            self.handle(idx)
        } else {
            let idx = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Some(fresh));
            self.generations.push(0);
            self.handle(idx)
        }
    }

    fn handle(&self, index: u32) -> HandleId {
        let generation = self.generations.get(index as usize).copied().unwrap_or(0);
        HandleId { index, generation }
    }

    fn is_current(&self, id: HandleId) -> bool {
        self.generations.get(id.index()) == Some(&id.generation)
    }

    /// Return a handle. The element is cleared, then recycled or discarded.
    pub fn release(&mut self, id: HandleId, now: Instant) -> ReleaseOutcome {
        let keep = self.recycled.len() < self.config.capacity;
        if !self.is_current(id) {
            return ReleaseOutcome::NotInUse;
        }
        let Some(Some(slot)) = self.slots.get_mut(id.index()) else {
            return ReleaseOutcome::NotInUse;
        };
        if !slot.in_use {
            return ReleaseOutcome::NotInUse;
        }

        self.last_activity = Some(now);
        self.in_use -= 1;
        slot.element.reset();
        slot.in_use = false;
        if let Some(generation) = self.generations.get_mut(id.index()) {
            *generation = generation.wrapping_add(1);
        }

        if keep {
            self.recycled.push(id.index);
            self.stats.recycled += 1;
            ReleaseOutcome::Recycled
        } else {
            self.slots[id.index()] = None;
            self.vacant.push(id.index);
            self.stats.discarded += 1;
            ReleaseOutcome::Discarded
        }
    }

    /// Element of an in-use handle.
    #[must_use]
    pub fn get(&self, id: HandleId) -> Option<&Element> {
        if !self.is_current(id) {
            return None;
        }
        match self.slots.get(id.index()) {
            Some(Some(slot)) if slot.in_use => Some(&slot.element),
            _ => None,
        }
    }

    /// Mutable element of an in-use handle.
    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut Element> {
        if !self.is_current(id) {
            return None;
        }
        match self.slots.get_mut(id.index()) {
            Some(Some(slot)) if slot.in_use => Some(&mut slot.element),
            _ => None,
        }
    }

    /// Whether the handle is currently handed out.
    #[must_use]
    pub fn is_in_use(&self, id: HandleId) -> bool {
        self.get(id).is_some()
    }

    /// Drop recycled elements once the pool has been idle long enough.
    ///
    /// Never trims while any handle is in use. Returns the number dropped.
    pub fn trim_idle(&mut self, now: Instant) -> usize {
        if self.in_use > 0 || self.recycled.is_empty() {
            return 0;
        }
        let Some(last) = self.last_activity else {
            return 0;
        };
        let idle = now.checked_duration_since(last).unwrap_or(Duration::ZERO);
        if idle < self.config.idle_timeout {
            return 0;
        }

        let dropped = self.recycled.len();
        for idx in self.recycled.drain(..) {
            self.slots[idx as usize] = None;
            self.vacant.push(idx);
        }
        self.stats.trimmed += dropped as u64;
        tracing::debug!(dropped, "element pool trimmed after idle timeout");
        dropped
    }

    /// Recycled elements ready for reuse ("pool size").
    #[inline]
    #[must_use]
    pub fn recycled_len(&self) -> usize {
        self.recycled.len()
    }

    /// Handles currently handed out.
    #[inline]
    #[must_use]
    pub fn in_use_len(&self) -> usize {
        self.in_use
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

impl Default for ElementPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
