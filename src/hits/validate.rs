// src/hits/validate.rs

use std::io::{BufRead, Write};

use ahash::AHashMap;

use super::layout::OutputLayout;
use crate::error::Result;
use crate::markers::MarkerCatalog;
use crate::types::HitRecord;

/// Minimum alignment length (residues) for a hit against a centroid.
pub const CENTROID_MIN_ALN_LEN: usize = 30;

/// Which kind of reference sequences the reads were searched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountingMode {
    /// ShortBRED markers; hits are checked against the marker's length.
    #[default]
    Markers,
    /// Whole centroids (evaluation runs); fixed alignment-length floor,
    /// every centroid is its own family.
    Centroids,
}

/// Acceptance thresholds for a single hit. Lengths are in residues.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Minimum identity as a fraction (0.95 = 95%).
    pub min_identity: f64,
    /// Fraction of the read that must align.
    pub aln_fraction: f64,
    /// Trusted (average) read length.
    pub avg_read_aa: usize,
    /// Reads shorter than this never count.
    pub min_read_aa: usize,
    pub mode: CountingMode,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_identity: 0.95,
            aln_fraction: 0.90,
            avg_read_aa: 0,
            min_read_aa: 0,
            mode: CountingMode::Markers,
        }
    }
}

impl Thresholds {
    /// A hit must cover `aln_fraction` of a trusted read, or the whole
    /// marker when the marker is shorter than that.
    pub fn required_aln_len(&self, marker_len: usize) -> usize {
        let read_part = (self.avg_read_aa as f64 * self.aln_fraction).floor() as usize;
        marker_len.min(read_part)
    }

    fn identity_ok(&self, hit: &HitRecord) -> bool {
        hit.identity / 100.0 >= self.min_identity
    }
}

/// Valid-hit counts per marker and per family for one sample.
#[derive(Debug, Default, Clone)]
pub struct HitTally {
    marker_hits: AHashMap<String, u64>,
    family_hits: AHashMap<String, u64>,
}

impl HitTally {
    pub fn record(&mut self, marker: &str, family: &str) {
        *self.marker_hits.entry(marker.to_string()).or_insert(0) += 1;
        *self.family_hits.entry(family.to_string()).or_insert(0) += 1;
    }

    pub fn marker_hits(&self, marker: &str) -> u64 {
        self.marker_hits.get(marker).copied().unwrap_or(0)
    }

    pub fn family_hits(&self, family: &str) -> u64 {
        self.family_hits.get(family).copied().unwrap_or(0)
    }

    /// `(marker, hits)` for every marker with at least one valid hit.
    pub fn markers(&self) -> impl Iterator<Item = (&str, u64)> {
        self.marker_hits.iter().map(|(m, &n)| (m.as_str(), n))
    }

    pub fn total(&self) -> u64 {
        self.marker_hits.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.marker_hits.is_empty()
    }
}

/// Streams aligner output, keeps the hits that pass the thresholds,
/// tallies them and copies their raw lines to the valid-hits ledger.
pub struct HitValidator<'a> {
    catalog: &'a MarkerCatalog,
    thresholds: Thresholds,
    layout: OutputLayout,
    tally: HitTally,
    accepted: u64,
    rejected: u64,
}

impl<'a> HitValidator<'a> {
    pub fn new(catalog: &'a MarkerCatalog, thresholds: Thresholds, layout: OutputLayout) -> Self {
        Self {
            catalog,
            thresholds,
            layout,
            tally: HitTally::default(),
            accepted: 0,
            rejected: 0,
        }
    }

    /// Check one hit and count it if it passes.
    /// Returns whether the hit was accepted.
    pub fn process_hit(&mut self, hit: &HitRecord) -> Result<bool> {
        let catalog = self.catalog;
        let t = &self.thresholds;
        let family = match t.mode {
            _ if catalog.is_excluded(&hit.marker) => None,
            CountingMode::Centroids => {
                if hit.aln_len >= CENTROID_MIN_ALN_LEN && t.identity_ok(hit) {
                    Some(hit.marker.as_str())
                } else {
                    None
                }
            }
            CountingMode::Markers => {
                let marker = catalog.require(&hit.marker)?;
                if hit.aln_len >= t.required_aln_len(marker.length)
                    && hit.read_len >= t.min_read_aa
                    && t.identity_ok(hit)
                {
                    Some(marker.family.as_str())
                } else {
                    None
                }
            }
        };

        match family {
            Some(family) => {
                self.tally.record(&hit.marker, family);
                self.accepted += 1;
                Ok(true)
            }
            None => {
                self.rejected += 1;
                Ok(false)
            }
        }
    }

    /// Parse, check and (if accepted) append one raw line to `ledger` unchanged.
    pub fn process_line<W: Write>(&mut self, line: &str, line_no: u64, ledger: &mut W) -> Result<bool> {
        let hit = self.layout.parse(line, line_no)?;
        let accepted = self.process_hit(&hit)?;
        if accepted {
            writeln!(ledger, "{}", line.trim_end_matches(&['\r', '\n'][..]))?;
        }
        Ok(accepted)
    }

    /// Consume a whole aligner table one line at a time.
    pub fn process_reader<R: BufRead, W: Write>(&mut self, mut reader: R, ledger: &mut W) -> Result<()> {
        log::info!("Processing aligner results...");
        let mut line = String::new();
        let mut line_no = 0u64;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            self.process_line(&line, line_no, ledger)?;
        }
        ledger.flush()?;
        log::info!(
            "{} hits accepted, {} rejected",
            self.accepted,
            self.rejected
        );
        Ok(())
    }

    pub fn tally(&self) -> &HitTally {
        &self.tally
    }

    pub fn into_tally(self) -> HitTally {
        self.tally
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuantifyError;
    use crate::markers::FamilyNaming;
    use std::io::Cursor;

    fn catalog() -> MarkerCatalog {
        MarkerCatalog::from_records(
            vec![("FamA_JM1_#1", 50), ("FamA_JM2_#2", 50), ("FamB_TM1_#1", 10)],
            FamilyNaming::Convention,
        )
        .expect("catalog")
    }

    fn thresholds() -> Thresholds {
        Thresholds {
            avg_read_aa: 33,
            min_read_aa: 30,
            ..Thresholds::default()
        }
    }

    fn hit(marker: &str, identity: f64, aln_len: usize, read_len: usize) -> HitRecord {
        HitRecord {
            query: "read".into(),
            marker: marker.into(),
            identity,
            aln_len,
            read_len,
        }
    }

    #[test]
    fn test_required_aln_len() {
        let t = thresholds();
        // floor(33 * 0.9) = 29
        assert_eq!(t.required_aln_len(50), 29);
        assert_eq!(t.required_aln_len(10), 10);
    }

    #[test]
    fn test_marker_mode_rules() {
        let catalog = catalog();
        let mut v = HitValidator::new(&catalog, thresholds(), OutputLayout::ReadVsMarker);

        assert!(v.process_hit(&hit("FamA_JM1_#1", 98.0, 29, 33)).unwrap());
        // alignment too short
        assert!(!v.process_hit(&hit("FamA_JM1_#1", 98.0, 28, 33)).unwrap());
        // read too short
        assert!(!v.process_hit(&hit("FamA_JM1_#1", 98.0, 29, 29)).unwrap());
        // identity too low
        assert!(!v.process_hit(&hit("FamA_JM1_#1", 94.9, 33, 33)).unwrap());
        // short marker only needs a full-length alignment
        assert!(v.process_hit(&hit("FamB_TM1_#1", 95.0, 10, 33)).unwrap());

        let tally = v.tally();
        assert_eq!(tally.marker_hits("FamA_JM1_#1"), 1);
        assert_eq!(tally.family_hits("FamA"), 1);
        assert_eq!(tally.family_hits("FamB"), 1);
        assert_eq!(tally.total(), 2);
        assert_eq!(v.accepted(), 2);
        assert_eq!(v.rejected(), 3);
    }

    #[test]
    fn test_unknown_marker_is_fatal() {
        let catalog = catalog();
        let mut v = HitValidator::new(&catalog, thresholds(), OutputLayout::ReadVsMarker);
        let err = v.process_hit(&hit("FamZ_TM1_#1", 99.0, 40, 40)).expect_err("unknown");
        assert!(matches!(err, QuantifyError::UnknownMarker { .. }));
    }

    #[test]
    fn test_hits_on_short_markers_are_rejected() {
        let mut catalog = MarkerCatalog::new(FamilyNaming::Convention).with_min_length(20);
        catalog.insert("FamA_JM1_#1".to_string(), 50).expect("insert");
        catalog.insert("FamB_TM1_#1".to_string(), 10).expect("insert");

        let mut v = HitValidator::new(&catalog, thresholds(), OutputLayout::ReadVsMarker);
        assert!(v.process_hit(&hit("FamA_JM1_#1", 98.0, 30, 33)).unwrap());
        assert!(!v.process_hit(&hit("FamB_TM1_#1", 100.0, 10, 33)).unwrap());
        assert_eq!(v.rejected(), 1);
        assert_eq!(v.tally().family_hits("FamB"), 0);
    }

    #[test]
    fn test_centroid_mode() {
        let catalog = MarkerCatalog::new(FamilyNaming::IdAsFamily);
        let t = Thresholds {
            mode: CountingMode::Centroids,
            ..thresholds()
        };
        let mut v = HitValidator::new(&catalog, t, OutputLayout::ReadVsMarker);
        assert!(v.process_hit(&hit("centroid_1", 96.0, 30, 5)).unwrap());
        assert!(!v.process_hit(&hit("centroid_1", 96.0, 29, 40)).unwrap());
        assert_eq!(v.tally().family_hits("centroid_1"), 1);
    }

    #[test]
    fn test_identity_threshold_is_monotone() {
        let catalog = catalog();
        let hits: Vec<HitRecord> = (0..40)
            .map(|i| hit("FamA_JM1_#1", 80.0 + i as f64 * 0.5, 30, 33))
            .collect();

        let mut previous = u64::MAX;
        for step in 0..=20 {
            let t = Thresholds {
                min_identity: 0.80 + step as f64 * 0.01,
                ..thresholds()
            };
            let mut v = HitValidator::new(&catalog, t, OutputLayout::ReadVsMarker);
            for h in &hits {
                v.process_hit(h).unwrap();
            }
            assert!(v.accepted() <= previous, "raising identity must not add hits");
            previous = v.accepted();
        }
    }

    #[test]
    fn test_ledger_gets_only_valid_lines() {
        let catalog = catalog();
        let good = "r1\tFamA_JM1_#1\t98.0\t30\t0\t0\t1\t30\t1\t30\t1e-9\t50\t33\t50\tx\ty";
        let bad = "r2\tFamA_JM1_#1\t90.0\t30\t0\t0\t1\t30\t1\t30\t1e-9\t50\t33\t50\tx\ty";
        let input = format!("{}\n{}\n\n", good, bad);

        let mut ledger = Vec::new();
        let mut v = HitValidator::new(&catalog, thresholds(), OutputLayout::ReadVsMarker);
        v.process_reader(Cursor::new(input), &mut ledger).expect("process");

        assert_eq!(String::from_utf8(ledger).unwrap(), format!("{}\n", good));
        assert_eq!(v.into_tally().marker_hits("FamA_JM1_#1"), 1);
    }
}
