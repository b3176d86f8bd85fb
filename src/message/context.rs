//! Per-exchange processing context.
//!
//! # Responsibilities
//! - Key/value bag for cross-filter signalling
//! - Own the passport and the traversal cursors of every filter chain
//! - Carry the stop-processing and cancellation flags consulted by skip policies
//!
//! # Design Decisions
//! - Shared by the request and the response of one exchange (`Arc`)
//! - One cursor per filter type, so inbound and outbound chains advance independently

use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::passport::{Passport, PassportState};
use crate::filter::cursor::TraversalCursor;
use crate::filter::FilterType;

/// Mutable context shared by all messages of one exchange.
#[derive(Debug)]
pub struct SessionContext {
    uuid: Uuid,
    attributes: DashMap<String, Value>,
    passport: Mutex<Passport>,
    cursors: DashMap<FilterType, Arc<TraversalCursor>>,
    stop_filter_processing: AtomicBool,
    cancelled: AtomicBool,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            attributes: DashMap::new(),
            passport: Mutex::new(Passport::new()),
            cursors: DashMap::new(),
            stop_filter_processing: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Unique id of this exchange, used in logs.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.attributes.get(key).map(|v| v.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.attributes.remove(key).map(|(_, v)| v)
    }

    /// Lock the passport.
    pub fn passport(&self) -> MutexGuard<'_, Passport> {
        self.passport.lock().expect("passport mutex poisoned")
    }

    pub fn add_passport_state(&self, state: PassportState) {
        self.passport().add(state);
    }

    /// Ask the remaining filters to skip (unless they override it).
    pub fn stop_filter_processing(&self) {
        self.stop_filter_processing.store(true, Ordering::Release);
    }

    pub fn should_stop_filter_processing(&self) -> bool {
        self.stop_filter_processing.load(Ordering::Acquire)
    }

    /// Mark the exchange cancelled by the client.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Cursor of the chain running filters of `filter_type`, if started.
    pub fn cursor(&self, filter_type: FilterType) -> Option<Arc<TraversalCursor>> {
        self.cursors.get(&filter_type).map(|c| Arc::clone(c.value()))
    }

    /// Cursor of the chain running filters of `filter_type`, created at index 0 if unset.
    pub fn init_cursor(&self, filter_type: FilterType) -> Arc<TraversalCursor> {
        Arc::clone(
            self.cursors
                .entry(filter_type)
                .or_insert_with(|| Arc::new(TraversalCursor::new()))
                .value(),
        )
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
