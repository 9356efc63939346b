#![forbid(unsafe_code)]

//! Core: item descriptors, element contents, and device hints.
//!
//! Everything here is plain data. The rendering engine lives in
//! `trickle-runtime`; this crate only defines what it renders.

pub mod device;
pub mod element;
pub mod item;

pub use device::DeviceProfile;
pub use element::{Element, ElementChild, PENDING_OPACITY, VISIBLE_OPACITY};
pub use item::{
    CategoryGroup, FetchPayload, ItemError, ItemKey, ItemKind, ItemShape, RenderItem, WrappedItems,
};
