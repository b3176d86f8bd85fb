//! Per-message skip decisions.

use super::types::{Filter, FilterType};
use crate::message::Message;

/// Decides whether a filter is passed over for one message.
///
/// Skipped filters still count as visited.
pub trait SkipPolicy: Send + Sync {
    fn should_skip(&self, message: &Message, filter: &dyn Filter) -> bool;
}

impl<F> SkipPolicy for F
where
    F: Fn(&Message, &dyn Filter) -> bool + Send + Sync,
{
    fn should_skip(&self, message: &Message, filter: &dyn Filter) -> bool {
        self(message, filter)
    }
}

/// Skip on stop-processing (unless overridden), on cancellation, or when the
/// filter declines the message. Endpoint filters always run.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSkipPolicy;

impl SkipPolicy for DefaultSkipPolicy {
    fn should_skip(&self, message: &Message, filter: &dyn Filter) -> bool {
        if filter.filter_type() == FilterType::Endpoint {
            return false;
        }

        let context = message.context();
        if context.should_stop_filter_processing() && !filter.overrides_stop_processing() {
            return true;
        }
        if context.is_cancelled() {
            return true;
        }

        !filter.should_filter(message)
    }
}
