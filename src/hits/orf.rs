// src/hits/orf.rs

use std::collections::BTreeMap;
use std::io::BufRead;

use crate::error::{QuantifyError, Result};
use crate::markers::MarkerCatalog;

/// ORF id -> markers it hit, in ledger order.
pub type OrfMatches = BTreeMap<String, Vec<String>>;

/// Group the valid-hits ledger by ORF (column 1) and marker (column 2).
pub fn collect_orf_matches<R: BufRead>(reader: R) -> Result<OrfMatches> {
    let mut matches = OrfMatches::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut cols = line.split('\t');
        let (orf, marker) = match (cols.next(), cols.next()) {
            (Some(orf), Some(marker)) => (orf, marker),
            _ => {
                return Err(QuantifyError::MalformedHitLine {
                    line: idx as u64 + 1,
                    reason: "expected ORF and marker columns".to_string(),
                })
            }
        };
        matches
            .entry(orf.to_string())
            .or_default()
            .push(marker.to_string());
    }
    Ok(matches)
}

/// Share of one ORF's credit per family.
///
/// Each family first scores `matches / markers in family`; every score is
/// then weighted by its own share of the ORF's total, so an ORF that hits
/// one family strongly and others weakly gives almost all its credit to
/// the strong family:
///
/// ```text
///   before          after
///   FamA  0.85      FamA  0.62
///   FamB  0.32      FamB  0.09
/// ```
///
/// Returns an empty vector when nothing can be scored.
pub fn orf_family_scores(
    family_matches: &BTreeMap<String, u64>,
    catalog: &MarkerCatalog,
) -> Vec<(String, f64)> {
    let scores: Vec<(String, f64)> = family_matches
        .iter()
        .filter_map(|(family, &n)| {
            let total = catalog.family_marker_count(family);
            if total == 0 {
                None
            } else {
                Some((family.clone(), n as f64 / total as f64))
            }
        })
        .collect();

    let sum: f64 = scores.iter().map(|(_, s)| s).sum();
    if sum <= 0.0 {
        return Vec::new();
    }

    scores
        .into_iter()
        .map(|(family, s)| (family, s * (s / sum)))
        .collect()
}

/// Fractional family counts for a genome: every ORF's credit is split
/// across the families it hit and summed per family.
///
/// With `count_repeats` false a marker hit several times by the same ORF
/// counts once. Every family of the catalog appears in the result,
/// with 0 when no ORF hit it.
pub fn reassign_orfs(
    orf_matches: &OrfMatches,
    catalog: &MarkerCatalog,
    count_repeats: bool,
) -> Result<BTreeMap<String, f64>> {
    let mut final_counts: BTreeMap<String, f64> =
        catalog.families().map(|f| (f.to_string(), 0.0)).collect();

    for (orf, markers) in orf_matches {
        let mut hits: Vec<&str> = markers.iter().map(String::as_str).collect();
        if !count_repeats {
            hits.sort_unstable();
            hits.dedup();
        }

        let mut family_matches: BTreeMap<String, u64> = BTreeMap::new();
        for marker in hits {
            if catalog.is_excluded(marker) {
                continue;
            }
            let family = &catalog.require(marker)?.family;
            *family_matches.entry(family.clone()).or_insert(0) += 1;
        }

        let scores = orf_family_scores(&family_matches, catalog);
        if scores.is_empty() {
            log::debug!("ORF {} has no scorable matches; skipped", orf);
            continue;
        }
        for (family, score) in scores {
            *final_counts.entry(family).or_insert(0.0) += score;
        }
    }

    Ok(final_counts)
}
