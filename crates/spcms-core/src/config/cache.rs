//! Cache store configuration.

use serde::{Deserialize, Serialize};

/// Page/fragment cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum age of an entry in seconds. `0` disables caching.
    #[serde(default)]
    pub max_age_seconds: u64,
    /// Optional directory mirroring memory writes to disk.
    #[serde(default)]
    pub directory: Option<String>,
    /// Proportional expiry jitter in `[0, 1)`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: 0,
            directory: None,
            jitter: default_jitter(),
        }
    }
}

fn default_jitter() -> f64 {
    0.1
}
