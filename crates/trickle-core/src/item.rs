#![forbid(unsafe_code)]

//! Render item descriptors.
//!
//! A [`RenderItem`] is the opaque content descriptor handed to the renderer.
//! Items arrive as JSON from remote collections, so the struct mirrors the
//! wire field names (`type`, `categoryId`, `jsonFile`, ...) and every field
//! is optional. [`RenderItem::shape`] classifies an item into one of the
//! shapes the batch renderer knows how to build:
//!
//! | Shape | Recognised by | Built as |
//! |-------|---------------|----------|
//! | [`ItemShape::LazyRef`] | `jsonFile` | expanded in place by a remote fetch |
//! | [`ItemShape::InlineGroup`] | `type` + `items` | one grouped element |
//! | [`ItemShape::CategoryGroup`] | `type` + `categoryId` | grouped element filled by a category lookup |
//! | [`ItemShape::Leaf`] | `type` + `title`/`content`/`api` | one element |
//!
//! Anything else is a render-build error ([`ItemError`]) that the renderer
//! skips per item.
//!
//! # Example
//!
//! ```
//! use trickle_core::item::{FetchPayload, ItemShape, RenderItem};
//!
//! let payload = FetchPayload::from_json(
//!     r#"{"items": [{"type": "button", "title": "Copy"}, {"jsonFile": "more.json"}]}"#,
//! )
//! .unwrap();
//! let items = payload.into_items();
//! assert!(matches!(items[0].shape(), Ok(ItemShape::Leaf(_))));
//! assert!(matches!(items[1].shape(), Ok(ItemShape::LazyRef("more.json"))));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Visual flavour of a leaf or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Compact, button-like element.
    Button,
    /// Larger card-like element.
    Card,
    /// Any `type` string this renderer does not understand.
    #[serde(other)]
    Unknown,
}

impl ItemKind {
    /// Stable lowercase name, matching the wire format.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Card => "card",
            Self::Unknown => "unknown",
        }
    }
}

/// A content descriptor as received from the caller or a remote collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderItem {
    /// Explicit identity used for usage scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Leaf or group flavour.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Inline content shown (or copied) when the element is activated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Remote reference resolved on activation instead of inline content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
    /// Fixed children of an inline group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<RenderItem>>,
    /// Category whose children come from the category lookup service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    /// Remote collection that replaces this item when expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_file: Option<String>,
}

/// Classification of a [`RenderItem`], borrowing from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemShape<'a> {
    /// A single element.
    Leaf(ItemKind),
    /// A group with inline children.
    InlineGroup(ItemKind, &'a [RenderItem]),
    /// A group whose children come from a category lookup.
    CategoryGroup(ItemKind, &'a str),
    /// A pointer to a remote collection.
    LazyRef(&'a str),
}

impl ItemShape<'_> {
    /// Short name used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Leaf(_) => "leaf",
            Self::InlineGroup(..) => "inline_group",
            Self::CategoryGroup(..) => "category_group",
            Self::LazyRef(_) => "lazy_ref",
        }
    }
}

/// A malformed item that cannot be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    /// Neither a lazy reference nor a `type` was given.
    MissingKind,
    /// The `type` string is not one this renderer understands.
    UnsupportedKind,
    /// A `jsonFile` or `categoryId` reference is blank.
    EmptyReference(&'static str),
    /// A leaf with no title, content, or api reference.
    EmptyLeaf,
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKind => write!(f, "item has no type and no remote reference"),
            Self::UnsupportedKind => write!(f, "item type is not supported"),
            Self::EmptyReference(field) => write!(f, "item {field} is empty"),
            Self::EmptyLeaf => write!(f, "leaf item has no title, content, or api reference"),
        }
    }
}

impl std::error::Error for ItemError {}

impl RenderItem {
    /// A leaf button with a title.
    #[must_use]
    pub fn button(title: impl Into<String>) -> Self {
        Self::leaf(ItemKind::Button, title)
    }

    /// A leaf card with a title.
    #[must_use]
    pub fn card(title: impl Into<String>) -> Self {
        Self::leaf(ItemKind::Card, title)
    }

    /// A leaf of the given kind.
    #[must_use]
    pub fn leaf(kind: ItemKind, title: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// A group with fixed inline children.
    #[must_use]
    pub fn group(kind: ItemKind, title: impl Into<String>, items: Vec<RenderItem>) -> Self {
        Self {
            kind: Some(kind),
            title: Some(title.into()),
            items: Some(items),
            ..Self::default()
        }
    }

    /// A group backed by a category lookup.
    #[must_use]
    pub fn category(kind: ItemKind, category_id: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            category_id: Some(category_id.into()),
            ..Self::default()
        }
    }

    /// A lazy reference to a remote collection.
    #[must_use]
    pub fn lazy(json_file: impl Into<String>) -> Self {
        Self {
            json_file: Some(json_file.into()),
            ..Self::default()
        }
    }

    /// Attach an explicit identity.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach inline content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach a remote api reference.
    #[must_use]
    pub fn with_api(mut self, api: impl Into<String>) -> Self {
        self.api = Some(api.into());
        self
    }

    /// Classify the item.
    ///
    /// A `jsonFile` wins over every other field: the item is a placeholder
    /// for whatever the remote collection contains.
    pub fn shape(&self) -> Result<ItemShape<'_>, ItemError> {
        if let Some(reference) = self.json_file.as_deref() {
            if reference.trim().is_empty() {
                return Err(ItemError::EmptyReference("jsonFile"));
            }
            return Ok(ItemShape::LazyRef(reference));
        }

        let kind = match self.kind {
            None => return Err(ItemError::MissingKind),
            Some(ItemKind::Unknown) => return Err(ItemError::UnsupportedKind),
            Some(kind) => kind,
        };

        if let Some(items) = self.items.as_deref() {
            return Ok(ItemShape::InlineGroup(kind, items));
        }
        if let Some(category) = self.category_id.as_deref() {
            if category.trim().is_empty() {
                return Err(ItemError::EmptyReference("categoryId"));
            }
            return Ok(ItemShape::CategoryGroup(kind, category));
        }
        if self.title.is_some() || self.content.is_some() || self.api.is_some() {
            return Ok(ItemShape::Leaf(kind));
        }
        Err(ItemError::EmptyLeaf)
    }

    /// Whether this item is an (unexpanded) lazy reference.
    #[inline]
    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.json_file.is_some()
    }

    /// Identity for scoring: the explicit id, or the position in the list.
    #[must_use]
    pub fn key(&self, position: usize) -> ItemKey {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => ItemKey::Id(id.to_string()),
            _ => ItemKey::Position(position),
        }
    }

    /// Identity of the `offset`-th child expanded from the slot keyed
    /// `parent`. Positional keys never collide with the parent's siblings.
    #[must_use]
    pub fn child_key(&self, parent: &ItemKey, offset: usize) -> ItemKey {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => ItemKey::Id(id.to_string()),
            _ => ItemKey::Nested(Box::new(parent.clone()), offset),
        }
    }
}

/// Identity of an item for usage scoring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKey {
    /// Explicit `id` field.
    Id(String),
    /// Positional fallback for items without an id.
    Position(usize),
    /// Child of an expanded lazy slot, by offset within the fetched list.
    Nested(Box<ItemKey>, usize),
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Position(pos) => write!(f, "#{pos}"),
            Self::Nested(parent, offset) => write!(f, "{parent}/{offset}"),
        }
    }
}

/// Body of a remote collection: either a bare array or a wrapping object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FetchPayload {
    /// `[ {...}, {...} ]`
    Items(Vec<RenderItem>),
    /// `{ "items": [...] }` or `{ "data": [...] }`
    Wrapped(WrappedItems),
}

/// Object form of a [`FetchPayload`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WrappedItems {
    #[serde(alias = "data")]
    pub items: Vec<RenderItem>,
}

impl FetchPayload {
    /// Parse a payload from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Unwrap into the item list.
    #[must_use]
    pub fn into_items(self) -> Vec<RenderItem> {
        match self {
            Self::Items(items) => items,
            Self::Wrapped(wrapped) => wrapped.items,
        }
    }
}

impl From<Vec<RenderItem>> for FetchPayload {
    fn from(items: Vec<RenderItem>) -> Self {
        Self::Items(items)
    }
}

/// Result of a category lookup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CategoryGroup {
    /// Optional header shown above the group's children.
    #[serde(default)]
    pub header: Option<String>,
    /// The group's children.
    #[serde(default)]
    pub data: Vec<RenderItem>,
}
