//src/markers.rs

use std::path::Path;
use std::sync::OnceLock;

use ahash::{AHashMap, AHashSet};
use regex::Regex;

use crate::error::{QuantifyError, Result};
use crate::seqio::SequenceLengths;
use crate::types::Marker;

/// How a marker id maps onto its protein family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FamilyNaming {
    /// Ids look like `<family>_<TM|JM|QM><index>_#<suffix>`.
    #[default]
    Convention,
    /// Every id is its own family (centroids, hand-made marker sets).
    IdAsFamily,
}

fn marker_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // TM = true marker, JM = junction marker, QM = quasi marker
    RE.get_or_init(|| Regex::new(r"^(.*)_([TJQ]M)([0-9]*)_#([0-9]*)").expect("marker id regex"))
}

/// Extract the family stub from a marker id following the naming convention.
/// Returns `None` when the id does not match or the stub is blank.
pub fn family_stub(marker_id: &str) -> Option<&str> {
    let caps = marker_id_regex().captures(marker_id)?;
    let stub = caps.get(1)?.as_str().trim();
    if stub.is_empty() {
        None
    } else {
        Some(stub)
    }
}

/// All markers of a run, with per-family totals.
#[derive(Debug, Default, Clone)]
pub struct MarkerCatalog {
    naming: FamilyNaming,
    min_length: usize,
    markers: AHashMap<String, Marker>,
    excluded: AHashSet<String>,
    family_lengths: AHashMap<String, usize>,
    family_marker_counts: AHashMap<String, usize>,
}

impl MarkerCatalog {
    pub fn new(naming: FamilyNaming) -> Self {
        Self {
            naming,
            ..Self::default()
        }
    }

    /// Markers shorter than `min_length` residues are kept out of the
    /// catalog. Set before inserting.
    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Build a catalog from `(id, length)` pairs.
    pub fn from_records<I, S>(records: I, naming: FamilyNaming) -> Result<Self>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let mut catalog = Self::new(naming);
        for (id, length) in records {
            catalog.insert(id.into(), length)?;
        }
        Ok(catalog)
    }

    /// Load the marker FASTA (optionally compressed) and build the catalog.
    pub fn from_fasta<P: AsRef<Path>>(path: P, naming: FamilyNaming, min_length: usize) -> Result<Self> {
        log::info!("Calculating markers per family...");
        let mut catalog = Self::new(naming).with_min_length(min_length);
        for rec in SequenceLengths::open(path.as_ref())? {
            let rec = rec?;
            catalog.insert(rec.id, rec.length)?;
        }
        log::info!(
            "Loaded {} markers across {} families from {}",
            catalog.len(),
            catalog.family_count(),
            path.as_ref().display()
        );
        if !catalog.excluded.is_empty() {
            log::warn!(
                "{} markers shorter than {} aa were left out",
                catalog.excluded.len(),
                min_length
            );
        }
        Ok(catalog)
    }

    /// Add one marker. Fails on ids that break the naming convention
    /// when the convention is required. A marker below the minimum length
    /// is remembered as excluded and contributes nothing to the totals.
    pub fn insert(&mut self, id: String, length: usize) -> Result<()> {
        let family = match self.naming {
            FamilyNaming::Convention => family_stub(&id)
                .ok_or_else(|| QuantifyError::MalformedMarkerId { marker: id.clone() })?
                .to_string(),
            FamilyNaming::IdAsFamily => id.clone(),
        };

        if let Some(old) = self.markers.remove(&id) {
            log::warn!("Duplicate marker id {}; keeping the last record", id);
            if let Some(total) = self.family_lengths.get_mut(&old.family) {
                *total -= old.length;
            }
            if let Some(n) = self.family_marker_counts.get_mut(&old.family) {
                *n -= 1;
            }
        }
        self.excluded.remove(&id);

        if length < self.min_length {
            log::debug!("Marker {} is {} aa, shorter than {}; left out", id, length, self.min_length);
            self.excluded.insert(id);
            return Ok(());
        }

        *self.family_lengths.entry(family.clone()).or_insert(0) += length;
        *self.family_marker_counts.entry(family.clone()).or_insert(0) += 1;
        self.markers.insert(id.clone(), Marker { id, family, length });
        Ok(())
    }

    pub fn naming(&self) -> FamilyNaming {
        self.naming
    }

    pub fn min_length(&self) -> usize {
        self.min_length
    }

    /// Whether `marker_id` was dropped for being too short.
    pub fn is_excluded(&self, marker_id: &str) -> bool {
        self.excluded.contains(marker_id)
    }

    pub fn get(&self, marker_id: &str) -> Option<&Marker> {
        self.markers.get(marker_id)
    }

    /// Like `get`, but an unknown id is an error.
    pub fn require(&self, marker_id: &str) -> Result<&Marker> {
        self.get(marker_id).ok_or_else(|| QuantifyError::UnknownMarker {
            marker: marker_id.to_string(),
        })
    }

    /// Summed length (residues) of every marker in `family`; 0 if unknown.
    pub fn family_length(&self, family: &str) -> usize {
        self.family_lengths.get(family).copied().unwrap_or(0)
    }

    /// Number of markers in `family`; 0 if unknown.
    pub fn family_marker_count(&self, family: &str) -> usize {
        self.family_marker_counts.get(family).copied().unwrap_or(0)
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.family_lengths.keys().map(String::as_str)
    }

    pub fn family_count(&self) -> usize {
        self.family_lengths.len()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_stub() {
        assert_eq!(family_stub("FamA_JM1_#1"), Some("FamA"));
        assert_eq!(family_stub("VFG0001_TM_#03"), Some("VFG0001"));
        assert_eq!(family_stub("ABC_12_QM10_#0"), Some("ABC_12"));
        assert_eq!(family_stub("no_marker_kind"), None);
        assert_eq!(family_stub("FamA_XM1_#1"), None);
        assert_eq!(family_stub("_TM1_#1"), None);
    }

    #[test]
    fn test_catalog_family_totals() {
        let catalog = MarkerCatalog::from_records(
            vec![("FamA_JM1_#1", 50), ("FamA_JM2_#2", 50), ("FamB_TM1_#1", 20)],
            FamilyNaming::Convention,
        )
        .expect("catalog");

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.family_count(), 2);
        assert_eq!(catalog.family_length("FamA"), 100);
        assert_eq!(catalog.family_marker_count("FamA"), 2);
        assert_eq!(catalog.family_length("FamB"), 20);
        assert_eq!(catalog.get("FamB_TM1_#1").map(|m| m.family.as_str()), Some("FamB"));
        assert_eq!(catalog.family_length("missing"), 0);
    }

    #[test]
    fn test_malformed_marker_id_is_an_error() {
        let err = MarkerCatalog::from_records(vec![("not-a-marker", 10)], FamilyNaming::Convention)
            .expect_err("should reject");
        assert!(matches!(err, QuantifyError::MalformedMarkerId { ref marker } if marker == "not-a-marker"));
    }

    #[test]
    fn test_id_as_family() {
        let catalog = MarkerCatalog::from_records(vec![("not-a-marker", 10)], FamilyNaming::IdAsFamily)
            .expect("catalog");
        assert_eq!(catalog.require("not-a-marker").expect("marker").family, "not-a-marker");
        assert!(catalog.require("other").is_err());
    }

    #[test]
    fn test_duplicate_marker_replaces_previous() {
        let catalog = MarkerCatalog::from_records(
            vec![("FamA_TM1_#1", 40), ("FamA_TM1_#1", 30)],
            FamilyNaming::Convention,
        )
        .expect("catalog");
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.family_length("FamA"), 30);
        assert_eq!(catalog.family_marker_count("FamA"), 1);
    }

    #[test]
    fn test_short_markers_are_left_out() {
        let mut catalog = MarkerCatalog::new(FamilyNaming::Convention).with_min_length(25);
        for (id, len) in [("FamA_TM1_#1", 40), ("FamA_TM2_#2", 20), ("FamB_TM1_#1", 10)] {
            catalog.insert(id.to_string(), len).expect("insert");
        }

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.family_length("FamA"), 40);
        assert_eq!(catalog.family_marker_count("FamA"), 1);
        assert_eq!(catalog.family_count(), 1, "FamB has no marker left");
        assert!(catalog.is_excluded("FamA_TM2_#2"));
        assert!(catalog.is_excluded("FamB_TM1_#1"));
        assert!(!catalog.is_excluded("FamA_TM1_#1"));
        // a malformed id still fails even when it would be too short
        let mut strict = MarkerCatalog::new(FamilyNaming::Convention).with_min_length(25);
        assert!(strict.insert("bad".to_string(), 5).is_err());
    }

    #[test]
    fn test_from_fasta_with_min_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("markers.faa");
        std::fs::write(&path, ">FamA_TM1_#1\nMKVLA\nMKV\n>FamA_QM1_#2\nMK\n").expect("write");

        let catalog = MarkerCatalog::from_fasta(&path, FamilyNaming::Convention, 3).expect("catalog");
        assert_eq!(catalog.min_length(), 3);
        assert_eq!(catalog.get("FamA_TM1_#1").map(|m| m.length), Some(8));
        assert!(catalog.is_excluded("FamA_QM1_#2"));
        assert_eq!(catalog.family_length("FamA"), 8);
    }
}
