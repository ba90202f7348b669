//! Convenience result type alias for Sandbox Publisher.

use crate::error::AppError;

/// A specialized `Result` type for spcms operations.
pub type AppResult<T> = Result<T, AppError>;
