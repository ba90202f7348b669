//! Two-tier cache: an in-process map mirrored to an optional directory.
//!
//! The memory tier is authoritative for the current process. The disk tier
//! receives every write and is consulted on a memory miss; a disk hit is
//! promoted into memory with the file's modification time as its write time.
//!
//! Expiry is jittered: an entry is fresh while its age is at most
//! `max_age * r` with `r` drawn uniformly from `[1 - jitter, 1 + jitter]`
//! on every read, so entries written together do not expire together.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use spcms_core::config::cache::CacheConfig;
use spcms_core::{AppError, AppResult, ErrorKind};

use crate::keys::{derive_key, file_name};

/// Name of the file written to check that a cache directory is writable.
const WRITE_CHECK_FILE: &str = ".spcms-write-check";

/// Time-to-live of cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Expire after this many seconds (before jitter). `0` disables caching.
    Seconds(u64),
    /// Never expire by time.
    Never,
}

impl Ttl {
    /// Whether this age turns caching off.
    pub fn is_disabled(self) -> bool {
        self == Ttl::Seconds(0)
    }
}

impl From<u64> for Ttl {
    fn from(seconds: u64) -> Self {
        Ttl::Seconds(seconds)
    }
}

/// A cached value and when it was written.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    written_at: SystemTime,
}

/// Memory + optional disk cache with jittered expiry.
#[derive(Debug)]
pub struct CacheStore {
    /// Default entry age.
    max_age: Ttl,
    /// Disk tier directory, if any.
    directory: Option<PathBuf>,
    /// Default proportional jitter in `[0, 1)`.
    jitter: f64,
    /// Memory tier, keyed by derived key.
    memory: RwLock<HashMap<String, CacheEntry>>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self {
            max_age: Ttl::Seconds(0),
            directory: None,
            jitter: 0.0,
            memory: RwLock::new(HashMap::new()),
        }
    }
}

impl CacheStore {
    /// Creates a disabled cache. Call [`CacheStore::configure`] to enable it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from configuration; a relative directory resolves
    /// against `base_dir`.
    pub fn from_config(config: &CacheConfig, base_dir: &Path) -> AppResult<Self> {
        let directory = config.directory.as_deref().map(|dir| {
            let dir = Path::new(dir);
            if dir.is_absolute() {
                dir.to_path_buf()
            } else {
                base_dir.join(dir)
            }
        });

        let mut store = Self::new();
        store.configure(config.max_age_seconds, directory.as_deref(), config.jitter)?;
        Ok(store)
    }

    /// Sets the default age, disk directory and jitter.
    ///
    /// The directory is created if missing and must accept a test write.
    pub fn configure(
        &mut self,
        max_age: impl Into<Ttl>,
        directory: Option<&Path>,
        jitter: f64,
    ) -> AppResult<()> {
        check_jitter(jitter).map_err(|e| AppError::configuration(e.message))?;

        let directory = match directory {
            Some(dir) => Some(prepare_directory(dir)?),
            None => None,
        };

        self.max_age = max_age.into();
        self.jitter = jitter;
        self.directory = directory;

        info!(
            max_age = ?self.max_age,
            directory = ?self.directory,
            jitter = self.jitter,
            "Cache configured"
        );
        Ok(())
    }

    /// Whether the default age stores anything at all.
    pub fn is_enabled(&self) -> bool {
        !self.max_age.is_disabled()
    }

    /// The disk tier directory.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Path of the disk tier file for `name`, if a directory is configured.
    pub fn cache_path(&self, name: &str, namespace: Option<&str>) -> AppResult<Option<PathBuf>> {
        let key = derive_key(name, namespace)?;
        Ok(self.directory.as_ref().map(|dir| dir.join(file_name(&key))))
    }

    /// Stores `value` under `name`.
    ///
    /// Returns `Ok(false)` without storing when the effective age is zero.
    /// A failed disk write is reported after the memory tier was updated.
    pub fn put(
        &self,
        value: &Value,
        name: &str,
        namespace: Option<&str>,
        ttl: Option<Ttl>,
    ) -> AppResult<bool> {
        if ttl.unwrap_or(self.max_age).is_disabled() {
            return Ok(false);
        }

        let key = derive_key(name, namespace)?;
        self.write_memory().insert(
            key.clone(),
            CacheEntry {
                value: value.clone(),
                written_at: SystemTime::now(),
            },
        );
        debug!(key = %key, "Cache entry stored");

        if let Some(dir) = &self.directory {
            let path = dir.join(file_name(&key));
            let encoded = serde_json::to_string(value)?;
            write_atomic(dir, &path, encoded.as_bytes())?;
        }

        Ok(true)
    }

    /// Reads `name` if it is still fresh.
    ///
    /// Memory is checked first, then the disk tier. Unreadable or corrupt
    /// files are misses.
    pub fn get(
        &self,
        name: &str,
        namespace: Option<&str>,
        max_age: Option<Ttl>,
        jitter: Option<f64>,
    ) -> AppResult<Option<Value>> {
        let age = max_age.unwrap_or(self.max_age);
        if age.is_disabled() {
            return Ok(None);
        }
        let jitter = match jitter {
            Some(j) => check_jitter(j)?,
            None => self.jitter,
        };

        let key = derive_key(name, namespace)?;
        let limit = displaced_age(age, jitter);

        if let Some(entry) = self.read_memory().get(&key)
            && is_fresh(entry.written_at, limit)
        {
            debug!(key = %key, "Cache hit (memory)");
            return Ok(Some(entry.value.clone()));
        }

        let Some(dir) = &self.directory else {
            return Ok(None);
        };

        let Some(entry) = read_disk(&dir.join(file_name(&key)), limit) else {
            return Ok(None);
        };

        debug!(key = %key, "Cache hit (disk)");
        let value = entry.value.clone();
        self.write_memory().insert(key, entry);
        Ok(Some(value))
    }

    /// Drops `name` from both tiers. Returns whether anything was removed.
    pub fn remove(&self, name: &str, namespace: Option<&str>) -> AppResult<bool> {
        let key = derive_key(name, namespace)?;
        let mut removed = self.write_memory().remove(&key).is_some();

        if let Some(dir) = &self.directory {
            match fs::remove_file(dir.join(file_name(&key))) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Empties the memory tier; the disk tier is left alone.
    pub fn clear_memory(&self) {
        self.write_memory().clear();
    }

    fn read_memory(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.memory.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_memory(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.memory.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_jitter(jitter: f64) -> AppResult<f64> {
    if (0.0..1.0).contains(&jitter) {
        Ok(jitter)
    } else {
        Err(AppError::validation(format!(
            "Cache jitter must be in [0, 1), got {jitter}"
        )))
    }
}

fn prepare_directory(dir: &Path) -> AppResult<PathBuf> {
    let unusable = |e: std::io::Error| {
        AppError::with_source(
            ErrorKind::Configuration,
            format!("Cache directory {} is not writable", dir.display()),
            e,
        )
    };

    fs::create_dir_all(dir).map_err(unusable)?;
    let check = dir.join(WRITE_CHECK_FILE);
    fs::write(&check, b"").map_err(unusable)?;
    let _ = fs::remove_file(&check);

    Ok(dir.to_path_buf())
}

/// Writes `bytes` to a temporary file in `dir` and renames it onto `path`,
/// so readers see either the old file or the complete new one.
fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> AppResult<()> {
    let failed = |e: std::io::Error| {
        AppError::with_source(
            ErrorKind::Io,
            format!("Failed to write cache file {}", path.display()),
            e,
        )
    };

    let mut staged = NamedTempFile::new_in(dir).map_err(failed)?;
    staged.write_all(bytes).map_err(failed)?;
    staged.persist(path).map_err(|e| failed(e.error))?;
    Ok(())
}

/// Freshness limit for one read, `None` when entries never expire.
fn displaced_age(age: Ttl, jitter: f64) -> Option<f64> {
    match age {
        Ttl::Never => None,
        Ttl::Seconds(seconds) => {
            let factor = 1.0 - jitter + 2.0 * jitter * rand::random::<f64>();
            Some(seconds as f64 * factor)
        }
    }
}

fn is_fresh(written_at: SystemTime, limit: Option<f64>) -> bool {
    let Some(limit) = limit else {
        return true;
    };
    // Clock skew into the future counts as brand new.
    let elapsed = SystemTime::now()
        .duration_since(written_at)
        .unwrap_or(Duration::ZERO);
    elapsed.as_secs_f64() <= limit
}

fn read_disk(path: &Path, limit: Option<f64>) -> Option<CacheEntry> {
    let written_at = match fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(mtime) => mtime,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cache miss (no file)");
            return None;
        }
    };

    if !is_fresh(written_at, limit) {
        debug!(path = %path.display(), "Cache miss (expired)");
        return None;
    }

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cache file unreadable");
            return None;
        }
    };

    match serde_json::from_str(&contents) {
        Ok(value) => Some(CacheEntry { value, written_at }),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cache file corrupt");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn disk_store(dir: &Path, max_age: u64, jitter: f64) -> CacheStore {
        let mut store = CacheStore::new();
        store
            .configure(max_age, Some(dir), jitter)
            .expect("configure");
        store
    }

    /// Moves the disk entry's modification time into the past.
    fn age_file(store: &CacheStore, name: &str, by: Duration) {
        let path = store.cache_path(name, None).unwrap().expect("directory");
        let file = fs::File::options().write(true).open(path).expect("open");
        file.set_modified(SystemTime::now() - by).expect("set mtime");
    }

    #[test]
    fn test_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 60, 0.1);

        for (name, value) in [
            ("number", json!(42)),
            ("text", json!("hello")),
            ("object", json!({"a": 1, "b": [1, 2, 3]})),
        ] {
            assert!(store.put(&value, name, None, None).unwrap());
            store.clear_memory();
            assert_eq!(store.get(name, None, None, None).unwrap(), Some(value));
        }
    }

    #[test]
    fn test_namespaced_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 60, 0.1);

        for (name, value) in [
            ("answer", json!(42)),
            ("greeting", json!("hello")),
            ("nested", json!({"a": 1, "b": [1, 2, 3]})),
        ] {
            assert!(store.put(&value, name, Some("ns"), None).unwrap());
            store.clear_memory();
            assert_eq!(store.get(name, Some("ns"), None, None).unwrap(), Some(value));
            assert!(store.cache_path(name, Some("ns")).unwrap().unwrap().is_file());
        }
        assert_eq!(store.get("answer", None, None, None).unwrap(), None);
    }

    #[test]
    fn test_memory_entry_expires_without_disk() {
        let mut store = CacheStore::new();
        store.configure(60, None, 0.0).unwrap();
        store.put(&json!("warm"), "n", None, None).unwrap();

        let key = derive_key("n", None).unwrap();
        let backdate = |by: u64| {
            let mut memory = store.write_memory();
            let entry = memory.get_mut(&key).expect("entry");
            entry.written_at = SystemTime::now() - Duration::from_secs(by);
        };

        backdate(30);
        assert_eq!(store.get("n", None, None, None).unwrap(), Some(json!("warm")));
        backdate(61);
        assert_eq!(store.get("n", None, None, None).unwrap(), None);
        assert_eq!(
            store.get("n", None, Some(Ttl::Seconds(120)), None).unwrap(),
            Some(json!("warm"))
        );
    }

    #[test]
    fn test_memory_only_round_trip() {
        let mut store = CacheStore::new();
        store.configure(60, None, 0.0).unwrap();

        assert!(store.put(&json!([1, 2]), "list", Some("frag"), None).unwrap());
        assert_eq!(
            store.get("list", Some("frag"), None, None).unwrap(),
            Some(json!([1, 2]))
        );
        assert_eq!(store.get("list", None, None, None).unwrap(), None);
        assert_eq!(store.cache_path("list", None).unwrap(), None);
    }

    #[test]
    fn test_zero_age_disables_storage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 0, 0.0);

        assert!(!store.is_enabled());
        assert!(!store.put(&json!(1), "n", None, None).unwrap());
        assert!(store.put(&json!(1), "n", None, Some(Ttl::Seconds(30))).unwrap());
        assert_eq!(store.get("n", None, None, None).unwrap(), None);
        assert_eq!(
            store.get("n", None, Some(Ttl::Seconds(30)), None).unwrap(),
            Some(json!(1))
        );
    }

    #[test]
    fn test_disk_entry_expires_exactly_without_jitter() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 60, 0.0);
        store.put(&json!("old"), "page", None, None).unwrap();
        store.clear_memory();

        age_file(&store, "page", Duration::from_secs(30));
        assert_eq!(store.get("page", None, None, None).unwrap(), Some(json!("old")));

        store.clear_memory();
        age_file(&store, "page", Duration::from_secs(61));
        assert_eq!(store.get("page", None, None, None).unwrap(), None);
    }

    #[test]
    fn test_jittered_reads_never_exceed_upper_bound() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 100, 0.5);
        store.put(&json!(1), "n", None, None).unwrap();
        age_file(&store, "n", Duration::from_secs(151));

        for _ in 0..50 {
            store.clear_memory();
            assert_eq!(store.get("n", None, None, None).unwrap(), None);
        }
    }

    #[test]
    fn test_jittered_reads_always_accept_below_lower_bound() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 100, 0.5);
        store.put(&json!(1), "n", None, None).unwrap();
        age_file(&store, "n", Duration::from_secs(49));

        for _ in 0..50 {
            store.clear_memory();
            assert_eq!(store.get("n", None, None, None).unwrap(), Some(json!(1)));
        }
    }

    #[test]
    fn test_never_expiring_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 1, 0.0);
        store.put(&json!("kept"), "n", None, None).unwrap();
        store.clear_memory();
        age_file(&store, "n", Duration::from_secs(86_400));

        assert_eq!(
            store.get("n", None, Some(Ttl::Never), None).unwrap(),
            Some(json!("kept"))
        );
    }

    #[test]
    fn test_disk_hit_is_promoted_with_file_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 60, 0.0);
        store.put(&json!(7), "n", None, None).unwrap();
        store.clear_memory();
        age_file(&store, "n", Duration::from_secs(50));

        assert_eq!(store.get("n", None, None, None).unwrap(), Some(json!(7)));
        fs::remove_file(store.cache_path("n", None).unwrap().unwrap()).unwrap();

        // Served from memory now, still judged by the file's age.
        assert_eq!(store.get("n", None, None, None).unwrap(), Some(json!(7)));
        assert_eq!(
            store.get("n", None, Some(Ttl::Seconds(40)), None).unwrap(),
            None
        );
    }

    #[test]
    fn test_corrupt_file_is_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 60, 0.0);
        let path = store.cache_path("broken", None).unwrap().unwrap();
        fs::write(&path, "{not json").unwrap();

        assert_eq!(store.get("broken", None, None, None).unwrap(), None);
    }

    #[test]
    fn test_truncated_file_is_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 60, 0.0);
        store.put(&json!({"a": [1, 2]}), "n", None, None).unwrap();
        store.clear_memory();
        fs::write(store.cache_path("n", None).unwrap().unwrap(), "{\"a\":[1,").unwrap();

        assert_eq!(store.get("n", None, None, None).unwrap(), None);
    }

    #[test]
    fn test_overwrite_replaces_whole_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 60, 0.0);
        let path = store.cache_path("n", None).unwrap().unwrap();

        store.put(&json!(123456), "n", None, None).unwrap();
        let reader = fs::File::open(&path).unwrap();
        store.put(&json!("short"), "n", None, None).unwrap();

        // The open handle still sees the complete old file.
        let old: Value = serde_json::from_reader(reader).unwrap();
        assert_eq!(old, json!(123456));
        assert_eq!(fs::read_to_string(&path).unwrap(), "\"short\"");

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![path.file_name().unwrap().to_os_string()]);
    }

    #[test]
    fn test_invalid_namespace_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 60, 0.0);

        let err = store.put(&json!(1), "n", Some("-bad"), None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        let err = store.get("n", Some("a/b"), None, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_namespaced_file_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 60, 0.0);
        store.put(&json!(1), "hello", Some("pages"), None).unwrap();

        let expected = dir.path().join(
            "pages_-_2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824.cache",
        );
        assert!(expected.is_file());
        assert_eq!(fs::read_to_string(expected).unwrap(), "1");
    }

    #[test]
    fn test_remove_clears_both_tiers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = disk_store(dir.path(), 60, 0.0);
        store.put(&json!(1), "n", None, None).unwrap();

        assert!(store.remove("n", None).unwrap());
        assert_eq!(store.get("n", None, None, None).unwrap(), None);
        assert!(!store.remove("n", None).unwrap());
    }

    #[test]
    fn test_bad_jitter_is_configuration_error() {
        let mut store = CacheStore::new();
        for jitter in [-0.1, 1.0, 2.5] {
            let err = store.configure(60, None, jitter).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Configuration);
        }
    }

    #[test]
    fn test_unusable_directory_is_configuration_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();

        let mut store = CacheStore::new();
        let err = store
            .configure(60, Some(&blocker.join("cache")), 0.0)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[test]
    fn test_from_config_resolves_relative_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CacheConfig {
            max_age_seconds: 30,
            directory: Some("var/cache".to_string()),
            jitter: 0.0,
        };

        let store = CacheStore::from_config(&config, dir.path()).unwrap();
        assert!(store.is_enabled());
        assert_eq!(store.directory(), Some(dir.path().join("var/cache").as_path()));
        assert!(dir.path().join("var/cache").is_dir());
    }
}
