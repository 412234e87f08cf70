//! The effort catalog (`manifest.yaml`) and auxiliary session state.
//!
//! The manifest is the source of truth for effort lifecycle: which efforts
//! exist, which are open, which single effort is active, and the summary a
//! concluded effort left behind. The auxiliary files track cross-turn
//! bookkeeping: the expanded set (`expanded.json`), summary reference turns
//! (`summary_refs.json`), and the turn counter (`session.json`).
//!
//! All four are loaded fresh and saved atomically through
//! [`SessionStore`]; none of them cache.

use crate::error::EngineError;
use crate::now_iso8601;
use crate::store::SessionStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Effort ─────────────────────────────────────────────────────────

/// Lifecycle status of an effort.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EffortStatus {
    Open,
    Concluded,
}

/// A named, focused unit of work with its own append-only log.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Effort {
    /// Kebab-case slug, unique within the session.
    pub id: String,
    pub status: EffortStatus,
    /// At most one effort is active at a time. Absent in YAML ⇒ false.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub active: bool,
    /// Prose summary produced at close time; `None` while open.
    pub summary: Option<String>,
    /// Path of the effort's log, relative to the session directory.
    pub raw_file: String,
    pub created: String,
    pub updated: String,
}

impl Effort {
    /// A freshly opened, active effort.
    pub fn open(id: impl Into<String>) -> Self {
        let id = id.into();
        let now = now_iso8601();
        Self {
            raw_file: SessionStore::effort_raw_file(&id),
            id,
            status: EffortStatus::Open,
            active: true,
            summary: None,
            created: now.clone(),
            updated: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == EffortStatus::Open
    }

    pub fn is_concluded(&self) -> bool {
        self.status == EffortStatus::Concluded
    }
}

// ── Manifest ───────────────────────────────────────────────────────

/// The effort catalog, persisted as `manifest.yaml`.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct Manifest {
    #[serde(default)]
    pub efforts: Vec<Effort>,
}

impl Manifest {
    pub fn load(store: &SessionStore) -> Result<Self, EngineError> {
        store.load_yaml(&store.manifest_path())
    }

    pub fn save(&self, store: &SessionStore) -> Result<(), EngineError> {
        store.save_yaml(&store.manifest_path(), self)
    }

    /// Whether the manifest file exists on disk yet.
    pub fn exists(store: &SessionStore) -> bool {
        store.manifest_path().exists()
    }

    pub fn list(&self) -> &[Effort] {
        &self.efforts
    }

    pub fn get(&self, id: &str) -> Option<&Effort> {
        self.efforts.iter().find(|e| e.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Effort> {
        self.efforts.iter_mut().find(|e| e.id == id)
    }

    /// The unique active effort, if any.
    pub fn get_active(&self) -> Option<&Effort> {
        self.efforts.iter().find(|e| e.is_open() && e.active)
    }

    /// All open efforts (active or not), in catalog order.
    pub fn get_all_open(&self) -> Vec<&Effort> {
        self.efforts.iter().filter(|e| e.is_open()).collect()
    }

    pub fn get_concluded(&self) -> Vec<&Effort> {
        self.efforts.iter().filter(|e| e.is_concluded()).collect()
    }

    /// Add an effort. Idempotent per id: a second add with the same id
    /// patches status/active/updated on the existing entry instead of
    /// duplicating it.
    pub fn add(&mut self, effort: Effort) {
        match self.get_mut(&effort.id) {
            Some(existing) => {
                existing.status = effort.status;
                existing.active = effort.active;
                existing.updated = effort.updated;
            }
            None => self.efforts.push(effort),
        }
    }

    /// Apply a patch to the effort with the given id, bumping `updated`.
    pub fn update(
        &mut self,
        id: &str,
        patch: impl FnOnce(&mut Effort),
    ) -> Result<(), EngineError> {
        let effort = self
            .get_mut(id)
            .ok_or_else(|| EngineError::ToolUsage(format!("unknown effort '{id}'")))?;
        patch(effort);
        effort.updated = now_iso8601();
        Ok(())
    }

    /// Open a brand-new effort and make it active.
    ///
    /// Fails with a `ToolUsage` error when another effort is already active
    /// (only reopening may displace the active effort). A concluded effort
    /// with the same id is patched back to open per idempotent-add rules.
    pub fn open_new(&mut self, id: &str) -> Result<(), EngineError> {
        if let Some(active) = self.get_active() {
            return Err(EngineError::ToolUsage(format!(
                "effort '{}' is already active; close it before opening another",
                active.id
            )));
        }
        self.add(Effort::open(id));
        Ok(())
    }

    /// Make the given effort active, deactivating whichever effort was.
    pub fn activate(&mut self, id: &str) -> Result<(), EngineError> {
        if self.get(id).is_none() {
            return Err(EngineError::ToolUsage(format!("unknown effort '{id}'")));
        }
        for effort in &mut self.efforts {
            effort.active = effort.id == id;
        }
        self.update(id, |e| e.status = EffortStatus::Open)
    }
}

// ── Auxiliary state ────────────────────────────────────────────────

/// The expanded set: concluded efforts whose full raw log is currently
/// injected into context, each with the turn it was last referenced.
/// Persisted as `expanded.json`.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct ExpandedState {
    /// effort id → last_referenced_turn.
    #[serde(default)]
    pub efforts: BTreeMap<String, u64>,
}

impl ExpandedState {
    pub fn load(store: &SessionStore) -> Result<Self, EngineError> {
        store.load_json(&store.expanded_path())
    }

    pub fn save(&self, store: &SessionStore) -> Result<(), EngineError> {
        store.save_json(&store.expanded_path(), self)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.efforts.contains_key(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, turn: u64) {
        self.efforts.insert(id.into(), turn);
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.efforts.remove(id).is_some()
    }

    /// Expanded ids in deterministic (sorted) order.
    pub fn ids(&self) -> Vec<&str> {
        self.efforts.keys().map(|k| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.efforts.is_empty()
    }
}

/// Per-effort turn of last summary reference, used as the eviction clock.
/// Persisted as `summary_refs.json`.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct SummaryRefs {
    /// effort id → turn its summary was last referenced (or first seen).
    #[serde(default)]
    pub refs: BTreeMap<String, u64>,
}

impl SummaryRefs {
    pub fn load(store: &SessionStore) -> Result<Self, EngineError> {
        store.load_json(&store.summary_refs_path())
    }

    pub fn save(&self, store: &SessionStore) -> Result<(), EngineError> {
        store.save_json(&store.summary_refs_path(), self)
    }

    pub fn get(&self, id: &str) -> Option<u64> {
        self.refs.get(id).copied()
    }

    pub fn set(&mut self, id: impl Into<String>, turn: u64) {
        self.refs.insert(id.into(), turn);
    }
}

/// Session counters, persisted as `session.json`.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct SessionCounter {
    #[serde(default)]
    pub turn_count: u64,
}

impl SessionCounter {
    pub fn load(store: &SessionStore) -> Result<Self, EngineError> {
        store.load_json(&store.session_path())
    }

    pub fn save(&self, store: &SessionStore) -> Result<(), EngineError> {
        store.save_json(&store.session_path(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn manifest_yaml_roundtrip() {
        let (_dir, store) = store();
        let mut manifest = Manifest::default();
        manifest.open_new("auth-bug").unwrap();
        manifest.save(&store).unwrap();

        let loaded = Manifest::load(&store).unwrap();
        assert_eq!(loaded.efforts.len(), 1);
        let effort = loaded.get("auth-bug").unwrap();
        assert_eq!(effort.status, EffortStatus::Open);
        assert!(effort.active);
        assert_eq!(effort.raw_file, "efforts/auth-bug.jsonl");
        assert!(effort.summary.is_none());
    }

    #[test]
    fn absent_active_field_reads_false() {
        let yaml = "\
efforts:
  - id: old-work
    status: concluded
    summary: did the thing
    raw_file: efforts/old-work.jsonl
    created: 2026-01-01T00:00:00Z
    updated: 2026-01-02T00:00:00Z
";
        let manifest: Manifest = serde_yaml::from_str(yaml).unwrap();
        assert!(!manifest.get("old-work").unwrap().active);
    }

    #[test]
    fn inactive_flag_not_serialized() {
        let mut manifest = Manifest::default();
        manifest.add(Effort {
            active: false,
            summary: Some("done".into()),
            status: EffortStatus::Concluded,
            ..Effort::open("quiet")
        });
        let yaml = serde_yaml::to_string(&manifest).unwrap();
        assert!(!yaml.contains("active"));
    }

    #[test]
    fn missing_manifest_loads_default() {
        let (_dir, store) = store();
        let manifest = Manifest::load(&store).unwrap();
        assert!(manifest.efforts.is_empty());
        assert!(!Manifest::exists(&store));
    }

    #[test]
    fn open_new_rejects_second_active() {
        let mut manifest = Manifest::default();
        manifest.open_new("first").unwrap();
        let err = manifest.open_new("second").unwrap_err();
        assert!(matches!(err, EngineError::ToolUsage(_)));
        assert!(err.to_string().contains("first"));
        assert_eq!(manifest.efforts.len(), 1);
    }

    #[test]
    fn add_is_idempotent_per_id() {
        let mut manifest = Manifest::default();
        manifest.open_new("work").unwrap();
        manifest
            .update("work", |e| {
                e.status = EffortStatus::Concluded;
                e.active = false;
                e.summary = Some("first pass".into());
            })
            .unwrap();

        // A second add with the same id patches instead of duplicating.
        manifest.add(Effort::open("work"));
        assert_eq!(manifest.efforts.len(), 1);
        let effort = manifest.get("work").unwrap();
        assert_eq!(effort.status, EffortStatus::Open);
        assert!(effort.active);
        // The original summary survives the patch.
        assert_eq!(effort.summary.as_deref(), Some("first pass"));
    }

    #[test]
    fn activate_displaces_prior_active() {
        let mut manifest = Manifest::default();
        manifest.open_new("one").unwrap();
        manifest
            .update("one", |e| {
                e.status = EffortStatus::Concluded;
                e.active = false;
            })
            .unwrap();
        manifest.open_new("two").unwrap();

        manifest.activate("one").unwrap();
        assert_eq!(manifest.get_active().unwrap().id, "one");
        assert!(!manifest.get("two").unwrap().active);
        // Reactivation reopens.
        assert_eq!(manifest.get("one").unwrap().status, EffortStatus::Open);
        // At most one active, always.
        let active_count = manifest.efforts.iter().filter(|e| e.active).count();
        assert_eq!(active_count, 1);
    }

    #[test]
    fn activate_unknown_is_tool_usage() {
        let mut manifest = Manifest::default();
        assert!(matches!(
            manifest.activate("ghost"),
            Err(EngineError::ToolUsage(_))
        ));
        assert!(matches!(
            manifest.update("ghost", |_| {}),
            Err(EngineError::ToolUsage(_))
        ));
    }

    #[test]
    fn open_and_concluded_views() {
        let mut manifest = Manifest::default();
        manifest.open_new("a").unwrap();
        manifest
            .update("a", |e| {
                e.status = EffortStatus::Concluded;
                e.active = false;
                e.summary = Some("done a".into());
            })
            .unwrap();
        manifest.open_new("b").unwrap();

        assert_eq!(manifest.get_all_open().len(), 1);
        assert_eq!(manifest.get_concluded().len(), 1);
        assert_eq!(manifest.get_active().unwrap().id, "b");
    }

    #[test]
    fn expanded_state_roundtrip() {
        let (_dir, store) = store();
        let mut expanded = ExpandedState::default();
        expanded.insert("auth-bug", 4);
        expanded.insert("db-tuning", 6);
        expanded.save(&store).unwrap();

        let loaded = ExpandedState::load(&store).unwrap();
        assert!(loaded.contains("auth-bug"));
        assert_eq!(loaded.efforts["db-tuning"], 6);
        assert_eq!(loaded.ids(), vec!["auth-bug", "db-tuning"]);

        let mut loaded = loaded;
        assert!(loaded.remove("auth-bug"));
        assert!(!loaded.remove("auth-bug"));
    }

    #[test]
    fn summary_refs_roundtrip() {
        let (_dir, store) = store();
        let mut refs = SummaryRefs::default();
        refs.set("auth-bug", 12);
        refs.save(&store).unwrap();

        let loaded = SummaryRefs::load(&store).unwrap();
        assert_eq!(loaded.get("auth-bug"), Some(12));
        assert_eq!(loaded.get("missing"), None);
    }

    #[test]
    fn session_counter_roundtrip() {
        let (_dir, store) = store();
        assert_eq!(SessionCounter::load(&store).unwrap().turn_count, 0);

        let mut counter = SessionCounter::load(&store).unwrap();
        counter.turn_count += 1;
        counter.save(&store).unwrap();
        assert_eq!(SessionCounter::load(&store).unwrap().turn_count, 1);
    }
}
