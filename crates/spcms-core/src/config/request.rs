//! Request attributes handed to plugins through the runtime context.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attributes of the request being published (headers, uri).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Raw `Accept-Language` header value.
    #[serde(default)]
    pub accept_language: Option<String>,
    /// Any further request attributes.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, String>,
}
