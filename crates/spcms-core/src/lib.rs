//! # spcms-core
//!
//! Core crate for Sandbox Publisher. Contains the unified error system,
//! the configuration schema and the runtime type naming used by the
//! content filter pipeline.
//!
//! This crate has **no** internal dependencies on other spcms crates.

pub mod config;
pub mod error;
pub mod result;
pub mod value;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
pub use value::{Value, type_name};
