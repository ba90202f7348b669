//! # sandbox-publisher
//!
//! Request-scoped publishing on top of the spcms crates: a [`Publisher`]
//! reads a page file into content items, renders them through a template
//! and lets plugins hook into every step over the event bus.

pub mod parser;
pub mod publisher;
pub mod template;

pub use publisher::{CONSTRUCT_COMPLETE_EVENT, PAGE_NAMESPACE, Publisher};
pub use template::TemplateSet;
