//! # spcms-cache
//!
//! Page and fragment cache for the sandbox publisher:
//!
//! - **memory tier**: authoritative for the running process
//! - **disk tier**: optional directory of `[<namespace>_-_]<sha256>.cache`
//!   JSON files, read on memory miss
//! - **output capture**: replay a cached page or record a fresh render
//!
//! Expiry is jittered per read so entries written together spread out.

pub mod keys;
pub mod output;
pub mod store;

pub use keys::derive_key;
pub use output::{CacheOutcome, OutputBuffer, OutputSink};
pub use store::{CacheStore, Ttl};
