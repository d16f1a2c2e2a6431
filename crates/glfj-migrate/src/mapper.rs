//! Source to target identity mapping.
//!
//! The mapper is the single owner of the mapping table for a run. Dependent
//! entities look up their parents here; a lookup that cannot be satisfied
//! is classified so the caller can tell a sequencing bug from a parent that
//! simply failed or never existed.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::types::{EntityKind, TargetRef};

/// Progress of a kind through the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KindStatus {
    /// Every entity of the kind was listed and processed.
    Complete,
    /// Processing finished but the listing was cut short.
    Incomplete,
}

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub kind: EntityKind,
    pub key: String,
    pub target: TargetRef,
}

#[derive(Debug, Default)]
struct MapperState {
    table: BTreeMap<(EntityKind, String), TargetRef>,
    unavailable: HashMap<(EntityKind, String), String>,
    kinds: HashMap<EntityKind, KindStatus>,
    reverse: HashMap<(EntityKind, String), String>,
}

/// Mapping table from source natural keys to target refs.
#[derive(Debug, Default)]
pub struct IdentityMapper {
    state: Mutex<MapperState>,
}

impl IdentityMapper {
    /// Create an empty mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Target ref for a source entity, if one was recorded.
    pub fn resolve(&self, kind: EntityKind, key: &str) -> Option<TargetRef> {
        self.state.lock().table.get(&(kind, key.to_string())).cloned()
    }

    /// Record the target ref of a source entity.
    ///
    /// Recording the same ref twice is a no-op; recording a different ref
    /// for an already mapped key is an invariant violation.
    pub fn record(&self, kind: EntityKind, key: &str, target: TargetRef) -> Result<()> {
        let mut state = self.state.lock();
        let entry_key = (kind, key.to_string());

        if let Some(existing) = state.table.get(&entry_key) {
            if *existing == target {
                return Ok(());
            }
            return Err(MigrationError::DuplicateMapping {
                kind,
                key: key.to_string(),
                existing: existing.clone(),
                attempted: target,
            });
        }

        state.unavailable.remove(&entry_key);
        state
            .reverse
            .insert((kind, target.name.clone()), key.to_string());
        state.table.insert(entry_key, target);
        Ok(())
    }

    /// Note that a source entity was processed without producing a target.
    pub fn mark_unavailable(&self, kind: EntityKind, key: &str, reason: impl Into<String>) {
        let mut state = self.state.lock();
        let entry_key = (kind, key.to_string());
        if !state.table.contains_key(&entry_key) {
            state.unavailable.insert(entry_key, reason.into());
        }
    }

    /// Mark a kind as done. `complete` is false when its listing was cut short.
    pub fn complete_kind(&self, kind: EntityKind, complete: bool) {
        let status = if complete {
            KindStatus::Complete
        } else {
            KindStatus::Incomplete
        };
        self.state.lock().kinds.insert(kind, status);
    }

    /// Resolve a dependency of `dependent`, classifying a miss.
    pub fn require_resolved(
        &self,
        kind: EntityKind,
        key: &str,
        dependent: &str,
    ) -> Result<TargetRef> {
        let state = self.state.lock();
        let entry_key = (kind, key.to_string());

        if let Some(target) = state.table.get(&entry_key) {
            return Ok(target.clone());
        }

        if let Some(reason) = state.unavailable.get(&entry_key) {
            return Err(MigrationError::DependencyUnavailable {
                kind,
                key: key.to_string(),
                reason: reason.clone(),
            });
        }

        match state.kinds.get(&kind) {
            Some(KindStatus::Complete) => Err(MigrationError::MissingFromSource {
                kind,
                key: key.to_string(),
            }),
            Some(KindStatus::Incomplete) => Err(MigrationError::DependencyUnavailable {
                kind,
                key: key.to_string(),
                reason: format!("{kind} listing was incomplete"),
            }),
            None => Err(MigrationError::UnresolvedDependency {
                kind,
                key: key.to_string(),
                dependent: dependent.to_string(),
            }),
        }
    }

    /// Source key that was mapped onto the given target name.
    pub fn source_key_for(&self, kind: EntityKind, target_name: &str) -> Option<String> {
        self.state
            .lock()
            .reverse
            .get(&(kind, target_name.to_string()))
            .cloned()
    }

    /// Number of mapped entities.
    pub fn len(&self) -> usize {
        self.state.lock().table.len()
    }

    /// Whether nothing has been mapped yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the table, ordered by kind then key.
    pub fn snapshot(&self) -> Vec<MappingEntry> {
        self.state
            .lock()
            .table
            .iter()
            .map(|((kind, key), target)| MappingEntry {
                kind: *kind,
                key: key.clone(),
                target: target.clone(),
            })
            .collect()
    }
}
