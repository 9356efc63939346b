#![forbid(unsafe_code)]

//! Scripted item source.
//!
//! Collections and category groups are registered up front; anything not
//! registered fails with status 404. Failures can be injected per reference
//! and every call is logged, so tests can check retry and priority
//! behavior.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use trickle_core::item::{CategoryGroup, FetchPayload, RenderItem};
use trickle_runtime::fetch::{FetchError, FetchPriority, FetchResult, ItemSource};

/// A logged source call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    Fetch(String, FetchPriority),
    Category(String),
}

#[derive(Debug, Default)]
struct Script {
    collections: HashMap<String, FetchPayload>,
    categories: HashMap<String, CategoryGroup>,
    failures: HashMap<String, VecDeque<FetchError>>,
    calls: Vec<SourceCall>,
}

/// [`ItemSource`] answering from registered data.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: Mutex<Script>,
    delay: Duration,
}

impl ScriptedSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Register a collection.
    #[must_use]
    pub fn with_collection(self, reference: &str, items: Vec<RenderItem>) -> Self {
        self.lock()
            .collections
            .insert(reference.to_string(), FetchPayload::Items(items));
        self
    }

    /// Register a collection from its JSON body.
    pub fn with_json(self, reference: &str, body: &str) -> Result<Self, serde_json::Error> {
        let payload = FetchPayload::from_json(body)?;
        self.lock().collections.insert(reference.to_string(), payload);
        Ok(self)
    }

    /// Register a category group.
    #[must_use]
    pub fn with_category(self, id: &str, header: Option<&str>, data: Vec<RenderItem>) -> Self {
        self.lock().categories.insert(
            id.to_string(),
            CategoryGroup {
                header: header.map(str::to_string),
                data,
            },
        );
        self
    }

    /// The next calls for `reference` fail with `errors`, in order.
    #[must_use]
    pub fn failing(self, reference: &str, errors: Vec<FetchError>) -> Self {
        self.lock()
            .failures
            .entry(reference.to_string())
            .or_default()
            .extend(errors);
        self
    }

    /// Every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<SourceCall> {
        self.lock().calls.clone()
    }

    /// Calls for one reference or category.
    #[must_use]
    pub fn calls_for(&self, reference: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| match call {
                SourceCall::Fetch(r, _) | SourceCall::Category(r) => r == reference,
            })
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pause(&self) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }
}

impl ItemSource for ScriptedSource {
    fn fetch(&self, reference: &str, priority: FetchPriority) -> FetchResult<FetchPayload> {
        self.pause();
        let mut script = self.lock();
        script
            .calls
            .push(SourceCall::Fetch(reference.to_string(), priority));
        if let Some(err) = script.failures.get_mut(reference).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        script
            .collections
            .get(reference)
            .cloned()
            .ok_or(FetchError::Status(404))
    }

    fn fetch_category(&self, category_id: &str) -> FetchResult<CategoryGroup> {
        self.pause();
        let mut script = self.lock();
        script.calls.push(SourceCall::Category(category_id.to_string()));
        if let Some(err) = script.failures.get_mut(category_id).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        script
            .categories
            .get(category_id)
            .cloned()
            .ok_or(FetchError::Status(404))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_reference_is_404() {
        let source = ScriptedSource::new();
        assert_eq!(
            source.fetch("nope.json", FetchPriority::High),
            Err(FetchError::Status(404))
        );
        assert_eq!(source.calls_for("nope.json"), 1);
    }

    #[test]
    fn injected_failures_come_first() {
        let source = ScriptedSource::new()
            .with_collection("a.json", vec![RenderItem::button("x")])
            .failing("a.json", vec![FetchError::Timeout]);
        assert_eq!(source.fetch("a.json", FetchPriority::Normal), Err(FetchError::Timeout));
        assert!(source.fetch("a.json", FetchPriority::Normal).is_ok());
        assert_eq!(
            source.calls()[0],
            SourceCall::Fetch("a.json".into(), FetchPriority::Normal)
        );
    }

    #[test]
    fn json_bodies_are_parsed() {
        let source = ScriptedSource::new()
            .with_json("w.json", r#"{"data":[{"type":"card","title":"c"}]}"#)
            .unwrap();
        let items = source.fetch("w.json", FetchPriority::Low).unwrap().into_items();
        assert_eq!(items.len(), 1);
    }
}
