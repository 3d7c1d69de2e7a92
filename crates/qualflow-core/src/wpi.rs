//! Whole-program inference
//!
//! Each run records the qualifiers actually flowing into unannotated fields, parameters
//! and returns of the unit's own declarations. The summary is written as JSON and read
//! back on the next run, where it stands in for the missing annotations. Iterating until
//! [`InferenceStorage::changed`] stays false reaches a fixed point.

use crate::error::{CheckerError, Result};
use crate::hierarchy::QualifierHierarchy;
use crate::hir::MethodSig;
use crate::qualifier::Qualifier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// An inferable declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InferenceSite {
    Field { class: String, field: String },
    Param { class: String, method: String, param: String },
    Return { class: String, method: String },
}

impl InferenceSite {
    pub fn field(class: &str, field: &str) -> Self {
        InferenceSite::Field {
            class: class.to_string(),
            field: field.to_string(),
        }
    }

    pub fn param(sig: &MethodSig, param: &str) -> Self {
        InferenceSite::Param {
            class: sig.owner.clone(),
            method: sig.to_string(),
            param: param.to_string(),
        }
    }

    pub fn ret(sig: &MethodSig) -> Self {
        InferenceSite::Return {
            class: sig.owner.clone(),
            method: sig.to_string(),
        }
    }

    fn class(&self) -> &str {
        match self {
            InferenceSite::Field { class, .. }
            | InferenceSite::Param { class, .. }
            | InferenceSite::Return { class, .. } => class,
        }
    }
}

/// Inferred qualifiers keyed by type system
pub type BySystem = BTreeMap<String, Qualifier>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInference {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, BySystem>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub ret: BySystem,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInference {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, BySystem>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub methods: BTreeMap<String, MethodInference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceStorage {
    pub classes: BTreeMap<String, ClassInference>,
    #[serde(skip)]
    changed: bool,
}

/// Summaries compare by content; the change flag is per run
impl PartialEq for InferenceStorage {
    fn eq(&self, other: &Self) -> bool {
        self.classes == other.classes
    }
}

impl Eq for InferenceStorage {}

impl InferenceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if any observation since creation (or the last reset) altered the summary
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn reset_changed(&mut self) {
        self.changed = false;
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    fn slot(&self, site: &InferenceSite) -> Option<&BySystem> {
        let class = self.classes.get(site.class())?;
        match site {
            InferenceSite::Field { field, .. } => class.fields.get(field),
            InferenceSite::Param { method, param, .. } => class.methods.get(method)?.params.get(param),
            InferenceSite::Return { method, .. } => class.methods.get(method).map(|m| &m.ret),
        }
    }

    fn slot_mut(&mut self, site: &InferenceSite) -> &mut BySystem {
        let class = self.classes.entry(site.class().to_string()).or_default();
        match site {
            InferenceSite::Field { field, .. } => class.fields.entry(field.clone()).or_default(),
            InferenceSite::Param { method, param, .. } => class
                .methods
                .entry(method.clone())
                .or_default()
                .params
                .entry(param.clone())
                .or_default(),
            InferenceSite::Return { method, .. } => &mut class.methods.entry(method.clone()).or_default().ret,
        }
    }

    pub fn lookup(&self, site: &InferenceSite, system: &str) -> Option<&Qualifier> {
        self.slot(site)?.get(system)
    }

    /// Merge one observation into the summary
    pub fn record(&mut self, site: InferenceSite, system: &str, q: Qualifier, h: &dyn QualifierHierarchy) {
        let slot = self.slot_mut(&site);
        let merged = match slot.get(system) {
            Some(existing) => h.least_upper_bound(existing, &q),
            None => q,
        };
        if slot.get(system) != Some(&merged) {
            debug!(?site, system, qualifier = %merged, "inferred");
            slot.insert(system.to_string(), merged);
            self.changed = true;
        }
    }

    pub fn path_for(dir: &Path, stem: &str) -> PathBuf {
        dir.join(format!("{}.wpi.json", stem))
    }

    pub fn write_json(&self, dir: &Path, stem: &str) -> Result<PathBuf> {
        let path = Self::path_for(dir, stem);
        std::fs::create_dir_all(dir).map_err(|source| CheckerError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let text = serde_json::to_string_pretty(self).map_err(|source| CheckerError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, text).map_err(|source| CheckerError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "wrote inference summary");
        Ok(path)
    }

    /// The summary written by an earlier run, or `None` if there is none yet
    pub fn read_json(dir: &Path, stem: &str) -> Result<Option<Self>> {
        let path = Self::path_for(dir, stem);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|source| CheckerError::Io {
            path: path.clone(),
            source,
        })?;
        let storage = serde_json::from_str(&text).map_err(|source| CheckerError::Json { path, source })?;
        Ok(Some(storage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::HierarchyBuilder;

    fn det() -> crate::hierarchy::GraphHierarchy {
        HierarchyBuilder::new("determinism")
            .qualifier("NonDet", &[])
            .qualifier("OrderNonDet", &["NonDet"])
            .qualifier("Det", &["OrderNonDet"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_record_merges_by_lub() {
        let h = det();
        let mut storage = InferenceStorage::new();
        let site = InferenceSite::field("C", "f");
        storage.record(site.clone(), "determinism", Qualifier::new("Det"), &h);
        assert!(storage.changed());
        storage.reset_changed();

        storage.record(site.clone(), "determinism", Qualifier::new("Det"), &h);
        assert!(!storage.changed());

        storage.record(site.clone(), "determinism", Qualifier::new("OrderNonDet"), &h);
        assert!(storage.changed());
        assert_eq!(storage.lookup(&site, "determinism"), Some(&Qualifier::new("OrderNonDet")));
        assert_eq!(storage.lookup(&site, "format"), None);
    }

    #[test]
    fn test_json_round_trip() {
        let h = det();
        let dir = tempfile::tempdir().unwrap();
        let sig = MethodSig::new("C", "m", &["int"]);
        let mut storage = InferenceStorage::new();
        storage.record(InferenceSite::param(&sig, "x"), "determinism", Qualifier::new("Det"), &h);
        storage.record(InferenceSite::ret(&sig), "determinism", Qualifier::new("NonDet"), &h);

        assert!(InferenceStorage::read_json(dir.path(), "C").unwrap().is_none());
        let path = storage.write_json(dir.path(), "C").unwrap();
        assert!(path.ends_with("C.wpi.json"));

        let back = InferenceStorage::read_json(dir.path(), "C").unwrap().unwrap();
        assert_eq!(back, storage);
        assert!(!back.changed());
        assert_eq!(
            back.lookup(&InferenceSite::ret(&sig), "determinism"),
            Some(&Qualifier::new("NonDet"))
        );
    }
}
