//! # spcms-content
//!
//! Request-scoped content items. Reads pass through a filter pipeline:
//! every filter is an event `contentfilter.<type>.<filter>` dispatched on
//! the plugin bus with the value as the shared mutable argument.

pub mod filter;
pub mod store;

pub use filter::{FILTER_EVENT_PREFIX, FilterSelection, filter_event};
pub use store::ContentStore;
