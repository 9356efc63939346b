#![forbid(unsafe_code)]

//! In-memory view surface with an optional simulated viewport.
//!
//! [`MemorySurface`] keeps a copy of every attached element in append order
//! and logs each surface operation, so tests can assert on both the final
//! picture and the sequence that produced it.
//!
//! With a [`Viewport`] the surface also reports scroll metrics: every
//! attached element is one row of `row_height`, and the viewport can be
//! scrolled to the end to simulate a user reaching the tail.

use trickle_core::element::Element;
use trickle_runtime::pool::HandleId;
use trickle_runtime::services::{DetachReason, ScrollMetrics, ViewSurface};

/// One operation performed on the surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    /// A fragment of this many elements was appended.
    Append(usize),
    Update(HandleId),
    Opacity(HandleId, f32),
    Detach(HandleId, DetachReason),
    PlaceSentinel,
    RemoveSentinel,
}

/// An element as the surface sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedElement {
    pub id: HandleId,
    pub element: Element,
    pub opacity: f32,
}

/// Row-based scroll model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub offset: f64,
    pub height: f64,
    pub row_height: f64,
}

impl Viewport {
    #[must_use]
    pub fn new(height: f64, row_height: f64) -> Self {
        Self {
            offset: 0.0,
            height,
            row_height,
        }
    }
}

/// Recording surface.
#[derive(Debug, Clone, Default)]
pub struct MemorySurface {
    attached: Vec<AttachedElement>,
    ops: Vec<SurfaceOp>,
    sentinel: bool,
    viewport: Option<Viewport>,
}

impl MemorySurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A surface that reports scroll metrics.
    #[must_use]
    pub fn with_viewport(viewport: Viewport) -> Self {
        Self {
            viewport: Some(viewport),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn attached(&self) -> &[AttachedElement] {
        &self.attached
    }

    #[must_use]
    pub fn attached_len(&self) -> usize {
        self.attached.len()
    }

    /// Titles of attached elements, in surface order.
    #[must_use]
    pub fn titles(&self) -> Vec<String> {
        self.attached.iter().map(|a| a.element.title.clone()).collect()
    }

    #[must_use]
    pub fn get(&self, id: HandleId) -> Option<&AttachedElement> {
        self.attached.iter().find(|a| a.id == id)
    }

    #[must_use]
    pub fn ops(&self) -> &[SurfaceOp] {
        &self.ops
    }

    /// Number of append operations so far.
    #[must_use]
    pub fn append_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, SurfaceOp::Append(_)))
            .count()
    }

    /// Detach operations with the given reason.
    #[must_use]
    pub fn detached(&self, reason: DetachReason) -> Vec<HandleId> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                SurfaceOp::Detach(id, r) if *r == reason => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn has_sentinel(&self) -> bool {
        self.sentinel
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    #[must_use]
    pub fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }

    /// Scroll so the bottom of the viewport touches the last row.
    pub fn scroll_to_end(&mut self) {
        let content = self.content_height();
        if let Some(viewport) = self.viewport.as_mut() {
            viewport.offset = (content - viewport.height).max(0.0);
        }
    }

    pub fn scroll_to(&mut self, offset: f64) {
        if let Some(viewport) = self.viewport.as_mut() {
            viewport.offset = offset.max(0.0);
        }
    }

    fn content_height(&self) -> f64 {
        let rows = self.attached.len() as f64;
        self.viewport.map_or(0.0, |v| rows * v.row_height)
    }
}

impl ViewSurface for MemorySurface {
    fn append(&mut self, fragment: &[(HandleId, &Element)]) {
        self.ops.push(SurfaceOp::Append(fragment.len()));
        self.attached.extend(fragment.iter().map(|(id, element)| AttachedElement {
            id: *id,
            element: (*element).clone(),
            opacity: element.opacity,
        }));
    }

    fn update(&mut self, id: HandleId, element: &Element) {
        self.ops.push(SurfaceOp::Update(id));
        if let Some(attached) = self.attached.iter_mut().find(|a| a.id == id) {
            attached.element = element.clone();
        }
    }

    fn set_opacity(&mut self, id: HandleId, opacity: f32) {
        self.ops.push(SurfaceOp::Opacity(id, opacity));
        if let Some(attached) = self.attached.iter_mut().find(|a| a.id == id) {
            attached.opacity = opacity;
            attached.element.opacity = opacity;
        }
    }

    fn detach(&mut self, id: HandleId, reason: DetachReason) {
        self.ops.push(SurfaceOp::Detach(id, reason));
        self.attached.retain(|a| a.id != id);
    }

    fn place_sentinel(&mut self) {
        self.ops.push(SurfaceOp::PlaceSentinel);
        self.sentinel = true;
    }

    fn remove_sentinel(&mut self) {
        self.ops.push(SurfaceOp::RemoveSentinel);
        self.sentinel = false;
    }

    fn scroll_metrics(&self) -> Option<ScrollMetrics> {
        self.viewport.map(|v| ScrollMetrics {
            offset: v.offset,
            viewport: v.height,
            content: self.content_height(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trickle_core::item::{ItemKind, RenderItem};
    use trickle_runtime::pool::ElementPool;
    use std::time::Instant;

    #[test]
    fn append_and_detach_are_recorded() {
        let mut pool = ElementPool::default();
        let now = Instant::now();
        let id = pool.acquire(now);
        let item = RenderItem::button("one");
        pool.get_mut(id).unwrap().fill_leaf(ItemKind::Button, item.key(0), &item);

        let mut surface = MemorySurface::new();
        surface.append(&[(id, pool.get(id).unwrap())]);
        assert_eq!(surface.titles(), vec!["one"]);
        surface.set_opacity(id, 1.0);
        assert_eq!(surface.get(id).unwrap().opacity, 1.0);
        surface.detach(id, DetachReason::Evicted);
        assert_eq!(surface.attached_len(), 0);
        assert_eq!(surface.detached(DetachReason::Evicted), vec![id]);
        assert_eq!(surface.append_count(), 1);
    }

    #[test]
    fn viewport_metrics_follow_content() {
        let mut surface = MemorySurface::with_viewport(Viewport::new(300.0, 50.0));
        assert_eq!(surface.scroll_metrics().unwrap().content, 0.0);

        let mut pool = ElementPool::default();
        let now = Instant::now();
        let ids: Vec<_> = (0..10).map(|_| pool.acquire(now)).collect();
        let fragment: Vec<_> = ids.iter().map(|&id| (id, pool.get(id).unwrap())).collect();
        surface.append(&fragment);

        let metrics = surface.scroll_metrics().unwrap();
        assert_eq!(metrics.content, 500.0);
        assert!(metrics.near_tail(400.0));
        assert!(!metrics.near_tail(100.0));
        surface.scroll_to_end();
        assert_eq!(surface.scroll_metrics().unwrap().offset, 200.0);
    }
}
