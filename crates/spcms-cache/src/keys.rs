//! Cache key derivation.
//!
//! A key is the lowercase SHA-256 hex digest of the entry name, prefixed by
//! `<namespace>_-_` when a namespace is given. Keys double as file names in
//! the disk tier, so namespaces are restricted to a safe alphabet.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use spcms_core::{AppError, AppResult};

/// Separator between namespace and digest.
pub const NAMESPACE_SEPARATOR: &str = "_-_";

/// File extension of disk tier entries.
pub const FILE_EXTENSION: &str = "cache";

/// Allowed namespace shape.
pub const NAMESPACE_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_-]*[A-Za-z0-9]$";

static NAMESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NAMESPACE_PATTERN).expect("namespace pattern compiles"));

/// Whether `namespace` may prefix a cache key.
pub fn is_valid_namespace(namespace: &str) -> bool {
    NAMESPACE_RE.is_match(namespace)
}

/// Derives the cache key for `name` in an optional namespace.
///
/// An empty namespace counts as absent.
pub fn derive_key(name: &str, namespace: Option<&str>) -> AppResult<String> {
    let digest = hex::encode(Sha256::digest(name.as_bytes()));

    match namespace.filter(|ns| !ns.is_empty()) {
        None => Ok(digest),
        Some(ns) if is_valid_namespace(ns) => Ok(format!("{ns}{NAMESPACE_SEPARATOR}{digest}")),
        Some(ns) => Err(AppError::validation(format!(
            "Invalid cache namespace '{ns}': use letters, digits, '-' and '_', \
             starting and ending with a letter or digit"
        ))),
    }
}

/// File name of a key in the disk tier.
pub fn file_name(key: &str) -> String {
    format!("{key}.{FILE_EXTENSION}")
}
