//! File-backed persistence primitives over a session directory.
//!
//! Two storage shapes, nothing else:
//!
//! - **Append-only jsonl logs** (`raw.jsonl`, `efforts/<id>.jsonl`): one
//!   JSON object per line, appended with O(1) writes. A crash can leave a
//!   partial trailing line; readers skip lines that fail to parse.
//! - **Small replaced state files** (`manifest.yaml`, `expanded.json`,
//!   `summary_refs.json`, `session.json`): always rewritten atomically via
//!   write-to-temp + rename.
//!
//! The session directory is the sole unit of state. [`SessionStore`] is a
//! cheap handle to it — it owns no in-memory caches, so tool calls within a
//! turn observe each other's effects simply by re-reading.

use crate::error::EngineError;
use crate::LogEntry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Handle to a session directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    /// Open (creating if needed) a session directory and its `efforts/`
    /// subdirectory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        fs::create_dir_all(root.join("efforts")).map_err(|e| EngineError::storage(&root, e))?;
        Ok(Self { root })
    }

    /// The session directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Well-known paths ───────────────────────────────────────────

    /// The ambient exchange log.
    pub fn raw_log_path(&self) -> PathBuf {
        self.root.join("raw.jsonl")
    }

    /// An effort's append-only log.
    pub fn effort_log_path(&self, id: &str) -> PathBuf {
        self.root.join("efforts").join(format!("{id}.jsonl"))
    }

    /// The effort's log path relative to the session directory, as stored
    /// in the manifest's `raw_file` field.
    pub fn effort_raw_file(id: &str) -> String {
        format!("efforts/{id}.jsonl")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.yaml")
    }

    pub fn expanded_path(&self) -> PathBuf {
        self.root.join("expanded.json")
    }

    pub fn summary_refs_path(&self) -> PathBuf {
        self.root.join("summary_refs.json")
    }

    pub fn session_path(&self) -> PathBuf {
        self.root.join("session.json")
    }

    // ── Append-only jsonl ──────────────────────────────────────────

    /// Append one entry as a single `\n`-terminated JSON line.
    pub fn append_entry(&self, path: &Path, entry: &LogEntry) -> Result<(), EngineError> {
        let line =
            serde_json::to_string(entry).map_err(|e| EngineError::Parse(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| EngineError::storage(path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .map_err(|e| EngineError::storage(path, e))?;
        Ok(())
    }

    /// Read all entries from a jsonl log, in append order.
    ///
    /// A missing file reads as empty. Lines that fail to parse (a partial
    /// trailing line after a crash) are skipped with a warning.
    pub fn read_entries(&self, path: &Path) -> Result<Vec<LogEntry>, EngineError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::storage(path, e)),
        };

        let mut entries = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!("Skipping malformed line in {}: {e}", path.display());
                }
            }
        }
        Ok(entries)
    }

    /// Read the last `n` entries from a jsonl log, in append order.
    pub fn read_last_entries(&self, path: &Path, n: usize) -> Result<Vec<LogEntry>, EngineError> {
        let mut entries = self.read_entries(path)?;
        let len = entries.len();
        if len > n {
            entries.drain(..len - n);
        }
        Ok(entries)
    }

    /// Number of well-formed entries in a jsonl log.
    pub fn entry_count(&self, path: &Path) -> Result<usize, EngineError> {
        Ok(self.read_entries(path)?.len())
    }

    /// Create an empty log file if it does not exist yet.
    pub fn touch(&self, path: &Path) -> Result<(), EngineError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map(|_| ())
            .map_err(|e| EngineError::storage(path, e))
    }

    // ── Replaced state files ───────────────────────────────────────

    /// Load a JSON state file, or its `Default` if the file is missing.
    pub fn load_json<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T, EngineError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(EngineError::storage(path, e)),
        };
        serde_json::from_str(&content).map_err(|e| EngineError::parse(path, e))
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    pub fn save_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), EngineError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| EngineError::Parse(e.to_string()))?;
        self.replace_file(path, &json)
    }

    /// Load a YAML state file, or its `Default` if the file is missing.
    pub fn load_yaml<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T, EngineError> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(EngineError::storage(path, e)),
        };
        serde_yaml::from_str(&content).map_err(|e| EngineError::parse(path, e))
    }

    /// Atomic write of a YAML state file.
    pub fn save_yaml<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), EngineError> {
        let yaml =
            serde_yaml::to_string(value).map_err(|e| EngineError::Parse(e.to_string()))?;
        self.replace_file(path, &yaml)
    }

    fn replace_file(&self, path: &Path, content: &str) -> Result<(), EngineError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".into());
        let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

        fs::write(&tmp_path, content).map_err(|e| EngineError::storage(&tmp_path, e))?;
        fs::rename(&tmp_path, path).map_err(|e| EngineError::storage(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_efforts_dir() {
        let (dir, _store) = store();
        assert!(dir.path().join("efforts").is_dir());
    }

    #[test]
    fn append_and_read_roundtrip() {
        let (_dir, store) = store();
        let path = store.raw_log_path();

        store.append_entry(&path, &LogEntry::user("one")).unwrap();
        store
            .append_entry(&path, &LogEntry::assistant("two"))
            .unwrap();

        let entries = store.read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "one");
        assert_eq!(entries[1].role, crate::Role::Assistant);
    }

    #[test]
    fn missing_log_reads_empty() {
        let (_dir, store) = store();
        let entries = store.read_entries(&store.effort_log_path("nope")).unwrap();
        assert!(entries.is_empty());
        assert_eq!(store.entry_count(&store.raw_log_path()).unwrap(), 0);
    }

    #[test]
    fn partial_trailing_line_is_skipped() {
        let (_dir, store) = store();
        let path = store.raw_log_path();
        store.append_entry(&path, &LogEntry::user("complete")).unwrap();

        // Simulate a crash mid-append.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"role\":\"assistant\",\"cont").unwrap();

        let entries = store.read_entries(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "complete");

        // Appends after the partial line still work; the broken line stays broken.
        store.append_entry(&path, &LogEntry::user("after")).unwrap();
        let entries = store.read_entries(&path).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn read_last_entries_tail() {
        let (_dir, store) = store();
        let path = store.raw_log_path();
        for i in 0..30 {
            store
                .append_entry(&path, &LogEntry::user(format!("msg {i}")))
                .unwrap();
        }

        let tail = store.read_last_entries(&path, 20).unwrap();
        assert_eq!(tail.len(), 20);
        assert_eq!(tail[0].content, "msg 10");
        assert_eq!(tail[19].content, "msg 29");

        // Shorter logs come back whole.
        let all = store.read_last_entries(&path, 100).unwrap();
        assert_eq!(all.len(), 30);
    }

    #[derive(Serialize, Deserialize, Default, PartialEq, Debug)]
    struct Counter {
        count: u64,
    }

    #[test]
    fn json_state_default_and_roundtrip() {
        let (_dir, store) = store();
        let path = store.session_path();

        let initial: Counter = store.load_json(&path).unwrap();
        assert_eq!(initial, Counter::default());

        store.save_json(&path, &Counter { count: 7 }).unwrap();
        let loaded: Counter = store.load_json(&path).unwrap();
        assert_eq!(loaded.count, 7);
    }

    #[test]
    fn yaml_state_roundtrip() {
        let (_dir, store) = store();
        let path = store.manifest_path();

        store.save_yaml(&path, &Counter { count: 3 }).unwrap();
        let loaded: Counter = store.load_yaml(&path).unwrap();
        assert_eq!(loaded.count, 3);
    }

    #[test]
    fn atomic_save_leaves_no_temp_file() {
        let (dir, store) = store();
        store
            .save_json(&store.session_path(), &Counter { count: 1 })
            .unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn corrupted_state_file_is_a_parse_error() {
        let (_dir, store) = store();
        let path = store.session_path();
        fs::write(&path, "not json at all {{{").unwrap();
        let result: Result<Counter, _> = store.load_json(&path);
        assert!(matches!(result, Err(EngineError::Parse(_))));
    }

    #[test]
    fn effort_paths() {
        let (_dir, store) = store();
        let path = store.effort_log_path("auth-bug");
        assert!(path.ends_with("efforts/auth-bug.jsonl"));
        assert_eq!(SessionStore::effort_raw_file("auth-bug"), "efforts/auth-bug.jsonl");
    }
}
