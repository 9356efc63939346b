#![forbid(unsafe_code)]

//! Element contents held by pooled handles.
//!
//! An [`Element`] is the renderer-side state of one view element: what it
//! shows and whether it has faded in yet. Elements are recycled by the
//! element pool, so every field must be cleared by [`Element::reset`]; a
//! recycled element must be indistinguishable from a freshly created one.

use crate::item::{ItemKey, ItemKind, ItemShape, RenderItem};

/// Opacity of an element that has been appended but not yet revealed.
pub const PENDING_OPACITY: f32 = 0.0;

/// Opacity of a revealed element.
pub const VISIBLE_OPACITY: f32 = 1.0;

/// One child line of a grouped element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementChild {
    pub kind: ItemKind,
    pub title: String,
    pub content: Option<String>,
    pub api: Option<String>,
}

impl ElementChild {
    fn from_item(kind: ItemKind, item: &RenderItem) -> Self {
        Self {
            kind,
            title: item.title.clone().unwrap_or_default(),
            content: item.content.clone(),
            api: item.api.clone(),
        }
    }
}

/// Contents of a pooled view element.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// `None` while the element is blank.
    pub kind: Option<ItemKind>,
    /// Scoring identity of the item this element shows.
    pub key: Option<ItemKey>,
    pub title: String,
    pub content: Option<String>,
    pub api: Option<String>,
    /// Group header (inline title or category lookup header).
    pub header: Option<String>,
    pub children: Vec<ElementChild>,
    /// Grouped element (inline or category backed).
    pub grouped: bool,
    /// A category group whose children have not arrived yet.
    pub awaiting_children: bool,
    pub opacity: f32,
}

impl Default for Element {
    fn default() -> Self {
        Self::blank()
    }
}

impl Element {
    /// A blank element.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            kind: None,
            key: None,
            title: String::new(),
            content: None,
            api: None,
            header: None,
            children: Vec::new(),
            grouped: false,
            awaiting_children: false,
            opacity: PENDING_OPACITY,
        }
    }

    /// Clear every field, keeping allocations for reuse.
    pub fn reset(&mut self) {
        self.kind = None;
        self.key = None;
        self.title.clear();
        self.content = None;
        self.api = None;
        self.header = None;
        self.children.clear();
        self.grouped = false;
        self.awaiting_children = false;
        self.opacity = PENDING_OPACITY;
    }

    /// Whether the element holds no content.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.kind.is_none()
            && self.key.is_none()
            && self.title.is_empty()
            && self.content.is_none()
            && self.api.is_none()
            && self.header.is_none()
            && self.children.is_empty()
            && !self.grouped
            && !self.awaiting_children
    }

    /// Whether the element has been revealed.
    #[inline]
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.opacity > PENDING_OPACITY
    }

    /// Fill as a leaf.
    pub fn fill_leaf(&mut self, kind: ItemKind, key: ItemKey, item: &RenderItem) {
        self.kind = Some(kind);
        self.key = Some(key);
        self.title.push_str(item.title.as_deref().unwrap_or_default());
        self.content = item.content.clone();
        self.api = item.api.clone();
        self.opacity = PENDING_OPACITY;
    }

    /// Fill as a group with inline children.
    ///
    /// Children that are not leaves cannot be nested inside a group and are
    /// dropped; the number dropped is returned.
    pub fn fill_group(
        &mut self,
        kind: ItemKind,
        key: ItemKey,
        header: Option<&str>,
        children: &[RenderItem],
    ) -> usize {
        self.kind = Some(kind);
        self.key = Some(key);
        self.grouped = true;
        self.header = header.map(str::to_string);
        self.opacity = PENDING_OPACITY;
        self.push_children(children)
    }

    /// Fill as a category group whose children arrive later.
    pub fn fill_category_placeholder(&mut self, kind: ItemKind, key: ItemKey, title: Option<&str>) {
        self.kind = Some(kind);
        self.key = Some(key);
        self.grouped = true;
        self.awaiting_children = true;
        self.header = title.map(str::to_string);
        self.opacity = PENDING_OPACITY;
    }

    /// Complete a category placeholder with looked-up children.
    ///
    /// Returns the number of dropped (non-leaf or malformed) children.
    pub fn complete_category(&mut self, header: Option<&str>, children: &[RenderItem]) -> usize {
        if let Some(header) = header {
            self.header = Some(header.to_string());
        }
        self.awaiting_children = false;
        self.children.clear();
        self.push_children(children)
    }

    fn push_children(&mut self, children: &[RenderItem]) -> usize {
        let mut dropped = 0;
        for child in children {
            match child.shape() {
                Ok(ItemShape::Leaf(kind)) => self.children.push(ElementChild::from_item(kind, child)),
                _ => dropped += 1,
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_is_blank() {
        assert!(Element::blank().is_blank());
        assert!(!Element::blank().is_visible());
    }

    #[test]
    fn reset_clears_everything() {
        let mut el = Element::blank();
        el.fill_group(
            ItemKind::Card,
            ItemKey::Position(0),
            Some("Group"),
            &[RenderItem::button("a"), RenderItem::card("b")],
        );
        el.opacity = VISIBLE_OPACITY;
        assert!(!el.is_blank());

        el.reset();
        assert!(el.is_blank());
        assert_eq!(el, Element::blank());
    }

    #[test]
    fn leaf_copies_fields() {
        let mut el = Element::blank();
        let item = RenderItem::button("Copy").with_content("hello").with_api("/x");
        el.fill_leaf(ItemKind::Button, item.key(2), &item);
        assert_eq!(el.title, "Copy");
        assert_eq!(el.content.as_deref(), Some("hello"));
        assert_eq!(el.api.as_deref(), Some("/x"));
        assert_eq!(el.key, Some(ItemKey::Position(2)));
        assert!(!el.grouped);
    }

    #[test]
    fn group_drops_nested_non_leaves() {
        let mut el = Element::blank();
        let dropped = el.fill_group(
            ItemKind::Card,
            ItemKey::Position(0),
            None,
            &[
                RenderItem::button("a"),
                RenderItem::lazy("nested.json"),
                RenderItem::default(),
            ],
        );
        assert_eq!(dropped, 2);
        assert_eq!(el.children.len(), 1);
    }

    #[test]
    fn category_placeholder_completes() {
        let mut el = Element::blank();
        el.fill_category_placeholder(ItemKind::Button, ItemKey::Id("tools".into()), None);
        assert!(el.awaiting_children);

        let dropped = el.complete_category(Some("Tools"), &[RenderItem::button("hammer")]);
        assert_eq!(dropped, 0);
        assert!(!el.awaiting_children);
        assert_eq!(el.header.as_deref(), Some("Tools"));
        assert_eq!(el.children[0].title, "hammer");
    }
}
