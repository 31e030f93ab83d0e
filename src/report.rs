// src/report.rs

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::error::{QuantifyError, Result};
use crate::markers::MarkerCatalog;
use crate::types::{FamilySummaryRecord, MarkerCountRecord};

pub const MARKER_TABLE_HEADER: &str =
    "Family\tMarker\tNormalized Count\tHits\tMarkerLength\tReadLength\tHitSpace";
pub const FAMILY_TABLE_HEADER: &str = "Family\tCount\tHits\tTotMarkerLength";
pub const GENOME_TABLE_HEADER: &str = "Family\tCount";

/// Median with the usual even/odd rule; `None` for an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 0 {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    } else {
        Some(sorted[n / 2])
    }
}

/// Family rows that could be computed, plus one error per family that could not.
#[derive(Debug, Default)]
pub struct FamilyReport {
    pub families: Vec<FamilySummaryRecord>,
    pub failures: Vec<(String, QuantifyError)>,
}

/// Summarise the marker records of one family.
/// `tot_marker_len` is the summed length of all the family's markers,
/// hit or not.
pub fn summarize_family(
    family: &str,
    records: &[&MarkerCountRecord],
    tot_marker_len: usize,
) -> Result<FamilySummaryRecord> {
    let fail = |reason: String| QuantifyError::EmptyFamilyGroup {
        family: family.to_string(),
        reason,
    };

    if let Some(stray) = records.iter().find(|r| r.family != family) {
        return Err(fail(format!(
            "marker {} belongs to family {}",
            stray.marker, stray.family
        )));
    }
    if let Some(bad) = records.iter().find(|r| !r.normalized_count.is_finite()) {
        return Err(fail(format!(
            "normalized count of marker {} is {}",
            bad.marker, bad.normalized_count
        )));
    }

    let counts: Vec<f64> = records.iter().map(|r| r.normalized_count).collect();
    let count = median(&counts).ok_or_else(|| fail("no marker records".to_string()))?;

    Ok(FamilySummaryRecord {
        family: family.to_string(),
        count,
        hits: records.iter().map(|r| r.hits).sum(),
        tot_marker_len,
    })
}

/// Group marker records by family and summarise each group.
/// A family that cannot be summarised is logged and reported in
/// `failures`; the remaining families are still summarised.
pub fn aggregate_families(records: &[MarkerCountRecord], catalog: &MarkerCatalog) -> FamilyReport {
    let mut groups: BTreeMap<&str, Vec<&MarkerCountRecord>> = BTreeMap::new();
    for rec in records {
        groups.entry(rec.family.as_str()).or_default().push(rec);
    }

    let mut report = FamilyReport::default();
    for (family, group) in groups {
        // centroid runs may use a catalog that does not know the family
        let tot_marker_len = match catalog.family_length(family) {
            0 => group.iter().map(|r| r.marker_len).sum(),
            n => n,
        };
        match summarize_family(family, &group, tot_marker_len) {
            Ok(row) => report.families.push(row),
            Err(e) => {
                log::error!("{}", e);
                report.failures.push((family.to_string(), e));
            }
        }
    }
    report
}

/// Sort marker records by family, then marker id.
pub fn sort_marker_records(records: &mut [MarkerCountRecord]) {
    records.sort_by(|a, b| a.family.cmp(&b.family).then_with(|| a.marker.cmp(&b.marker)));
}

pub fn write_marker_table<W: Write>(mut w: W, records: &[MarkerCountRecord]) -> io::Result<()> {
    writeln!(w, "{}", MARKER_TABLE_HEADER)?;
    for r in records {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            r.family, r.marker, r.normalized_count, r.hits, r.marker_len, r.read_len, r.hit_space
        )?;
    }
    w.flush()
}

pub fn write_family_table<W: Write>(mut w: W, families: &[FamilySummaryRecord]) -> io::Result<()> {
    writeln!(w, "{}", FAMILY_TABLE_HEADER)?;
    for f in families {
        writeln!(w, "{}\t{}\t{}\t{}", f.family, f.count, f.hits, f.tot_marker_len)?;
    }
    w.flush()
}

/// Genome-mode table: one fractional ORF count per family.
pub fn write_genome_table<W: Write>(mut w: W, counts: &BTreeMap<String, f64>) -> io::Result<()> {
    writeln!(w, "{}", GENOME_TABLE_HEADER)?;
    for (family, count) in counts {
        writeln!(w, "{}\t{}", family, count)?;
    }
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::FamilyNaming;

    fn rec(family: &str, marker: &str, count: f64, hits: u64) -> MarkerCountRecord {
        MarkerCountRecord {
            family: family.into(),
            marker: marker.into(),
            normalized_count: count,
            hits,
            marker_len: 40,
            read_len: 100.0,
            hit_space: 41.0,
        }
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[7.5]), Some(7.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_aggregate_families() {
        let catalog = MarkerCatalog::from_records(
            vec![("FamA_TM1_#1", 40), ("FamA_TM2_#2", 40), ("FamA_TM3_#3", 40), ("FamB_TM1_#1", 40)],
            FamilyNaming::Convention,
        )
        .expect("catalog");
        let records = vec![
            rec("FamA", "FamA_TM1_#1", 1.0, 2),
            rec("FamA", "FamA_TM2_#2", 3.0, 5),
            rec("FamB", "FamB_TM1_#1", 8.0, 1),
        ];

        let report = aggregate_families(&records, &catalog);
        assert!(report.failures.is_empty());
        assert_eq!(report.families.len(), 2);
        let fam_a = &report.families[0];
        assert_eq!(fam_a.family, "FamA");
        assert_eq!(fam_a.count, 2.0);
        assert_eq!(fam_a.hits, 7);
        assert_eq!(fam_a.tot_marker_len, 120);
        assert_eq!(report.families[1].family, "FamB");
    }

    #[test]
    fn test_bad_family_does_not_stop_the_others() {
        let catalog = MarkerCatalog::from_records(
            vec![("FamA_TM1_#1", 40), ("FamB_TM1_#1", 40)],
            FamilyNaming::Convention,
        )
        .expect("catalog");
        let records = vec![
            rec("FamA", "FamA_TM1_#1", f64::NAN, 2),
            rec("FamB", "FamB_TM1_#1", 8.0, 1),
        ];

        let report = aggregate_families(&records, &catalog);
        assert_eq!(report.families.len(), 1);
        assert_eq!(report.families[0].family, "FamB");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "FamA");
        assert!(matches!(report.failures[0].1, QuantifyError::EmptyFamilyGroup { .. }));
    }

    #[test]
    fn test_summarize_empty_group() {
        let err = summarize_family("FamA", &[], 10).expect_err("empty group");
        assert!(matches!(err, QuantifyError::EmptyFamilyGroup { ref family, .. } if family == "FamA"));
    }

    #[test]
    fn test_summarize_rejects_foreign_record() {
        let stray = rec("FamB", "FamB_TM1_#1", 1.0, 1);
        assert!(summarize_family("FamA", &[&stray], 10).is_err());
    }

    #[test]
    fn test_tables() {
        let records = vec![rec("FamA", "FamA_TM1_#1", 1.5, 2)];
        let mut out = Vec::new();
        write_marker_table(&mut out, &records).expect("write");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("{}\nFamA\tFamA_TM1_#1\t1.5\t2\t40\t100\t41\n", MARKER_TABLE_HEADER)
        );

        let fams = vec![FamilySummaryRecord {
            family: "FamA".into(),
            count: 1.5,
            hits: 2,
            tot_marker_len: 80,
        }];
        let mut out = Vec::new();
        write_family_table(&mut out, &fams).expect("write");
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Family\tCount\tHits\tTotMarkerLength\nFamA\t1.5\t2\t80\n"
        );
    }
}
