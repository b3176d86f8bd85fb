//! Runtime filter disable switches driven by configuration reloads.

use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;

use super::error::FilterResult;
use super::types::{ChunkAction, Filter, FilterOutcome, FilterType};
use crate::message::{BodyChunk, Message};

/// Snapshot of disabled filter names, swapped atomically on reload.
#[derive(Debug, Default)]
pub struct FilterSwitches {
    disabled: ArcSwap<HashSet<String>>,
}

impl FilterSwitches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the disabled set.
    pub fn apply<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let disabled: HashSet<String> = names.into_iter().map(Into::into).collect();
        tracing::info!(disabled = disabled.len(), "Filter switches updated");
        self.disabled.store(Arc::new(disabled));
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.load().contains(name)
    }

    /// Wrap `filter` so it also honours these switches.
    pub fn wrap<F: Filter>(self: &Arc<Self>, filter: F) -> SwitchedFilter<F> {
        SwitchedFilter {
            inner: filter,
            switches: Arc::clone(self),
        }
    }
}

/// A filter that can be disabled at runtime by name.
pub struct SwitchedFilter<F> {
    inner: F,
    switches: Arc<FilterSwitches>,
}

impl<F: Filter> Filter for SwitchedFilter<F> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn filter_type(&self) -> FilterType {
        self.inner.filter_type()
    }

    fn is_disabled(&self) -> bool {
        self.inner.is_disabled() || self.switches.is_disabled(self.inner.name())
    }

    fn should_filter(&self, message: &Message) -> bool {
        self.inner.should_filter(message)
    }

    fn overrides_stop_processing(&self) -> bool {
        self.inner.overrides_stop_processing()
    }

    fn needs_body_buffered(&self, message: &Message) -> bool {
        self.inner.needs_body_buffered(message)
    }

    fn apply(&self, message: Message) -> FilterOutcome {
        self.inner.apply(message)
    }

    fn apply_to_chunk(&self, message: &Message, chunk: BodyChunk) -> FilterResult<ChunkAction> {
        self.inner.apply_to_chunk(message, chunk)
    }
}
