//! Immutable ordered filter array.

use std::ops::Index;
use std::sync::Arc;

use super::error::ChainError;
use super::types::{Filter, FilterType};

/// An ordered, immutable sequence of filters of one type.
///
/// Cloning shares the same array; a chain holds no per-message state.
#[derive(Clone)]
pub struct FilterChain {
    filters: Arc<[Arc<dyn Filter>]>,
    filter_type: FilterType,
}

impl FilterChain {
    /// Build a chain; rejects empty chains and mixed filter types.
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Result<Self, ChainError> {
        let filter_type = filters
            .first()
            .map(|f| f.filter_type())
            .ok_or(ChainError::EmptyChain)?;

        if let Some(odd) = filters.iter().find(|f| f.filter_type() != filter_type) {
            return Err(ChainError::MixedFilterTypes {
                filter: odd.name().to_string(),
                expected: filter_type,
                found: odd.filter_type(),
            });
        }

        Ok(Self {
            filters: filters.into(),
            filter_type,
        })
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Filter>> {
        self.filters.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Filter>> {
        self.filters.iter()
    }

    /// Filter names in chain order.
    pub fn names(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.name().to_string()).collect()
    }
}

impl Index<usize> for FilterChain {
    type Output = Arc<dyn Filter>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.filters[index]
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("filter_type", &self.filter_type)
            .field("filters", &self.names())
            .finish()
    }
}
