//src/normalize.rs

use crate::error::{Diagnostic, Result};
use crate::hits::{CountingMode, HitTally};
use crate::markers::MarkerCatalog;
use crate::report::sort_marker_records;
use crate::types::MarkerCountRecord;

/// Number of sequence positions a read may start at and still give a valid
/// hit on a marker of `marker_len_aa` residues.
///
/// Only `aln_fraction` of a read has to align, so reads hanging
/// `(1 - aln_fraction) * read_len` over either end of the marker still count.
/// A marker longer than the required overlap loses `read_len - 1` start
/// positions at its far end; a shorter marker is caught by every read
/// that covers it completely.
///
/// `read_len` is in nucleotides. The result may be zero or negative for
/// markers about as long as a read when `aln_fraction` is close to 1.
pub fn hit_space(marker_len_aa: usize, read_len: f64, aln_fraction: f64) -> f64 {
    let nuc_len = (marker_len_aa * 3) as f64;
    let extra = (1.0 - aln_fraction) * 2.0 * read_len;
    if nuc_len > read_len * aln_fraction {
        nuc_len + extra - (read_len - 1.0)
    } else {
        read_len - nuc_len - 1.0
    }
}

/// Per-sample inputs of the count normalisation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeParams {
    /// Trusted read length in nucleotides.
    pub read_len: f64,
    pub aln_fraction: f64,
    pub total_reads: u64,
    pub mode: CountingMode,
}

/// Hits per kilobase of hit space per million reads. Centroids use plain
/// hits per nucleotide of centroid. An empty sample always scores 0.
fn normalized_count(hits: u64, hit_space: f64, params: &NormalizeParams) -> f64 {
    if params.total_reads == 0 {
        return 0.0;
    }
    match params.mode {
        CountingMode::Centroids => hits as f64 / hit_space,
        CountingMode::Markers => {
            hits as f64 / (hit_space / 1000.0) / (params.total_reads as f64 / 1e6)
        }
    }
}

/// Turn the valid-hit tally of one sample into marker count records,
/// sorted by family then marker.
///
/// Markers whose hit space is not positive are left out and reported as
/// `Diagnostic::DegenerateHitSpace`. An empty sample yields zero counts and
/// one `Diagnostic::EmptySample`.
pub fn normalize_counts(
    tally: &HitTally,
    catalog: &MarkerCatalog,
    params: &NormalizeParams,
    sample: &str,
) -> Result<(Vec<MarkerCountRecord>, Vec<Diagnostic>)> {
    log::info!("Tabulating results for each marker...");
    let mut records = Vec::new();
    let mut diagnostics = Vec::new();

    if params.total_reads == 0 && !tally.is_empty() {
        diagnostics.push(
            Diagnostic::EmptySample {
                sample: sample.to_string(),
            }
            .raise(),
        );
    }

    for (marker_id, hits) in tally.markers() {
        let marker = catalog.require(marker_id)?;
        let (family, space) = match params.mode {
            CountingMode::Centroids => (marker.id.clone(), (marker.length * 3) as f64),
            CountingMode::Markers => (
                marker.family.clone(),
                hit_space(marker.length, params.read_len, params.aln_fraction),
            ),
        };

        if space <= 0.0 || !space.is_finite() {
            diagnostics.push(
                Diagnostic::DegenerateHitSpace {
                    marker: marker.id.clone(),
                    hit_space: space,
                }
                .raise(),
            );
            continue;
        }

        let count = normalized_count(hits, space, params);
        log::debug!("{}\t{}\thits={}\thit_space={}\tcount={}", family, marker.id, hits, space, count);
        records.push(MarkerCountRecord {
            family,
            marker: marker.id.clone(),
            normalized_count: count,
            hits,
            marker_len: marker.length,
            read_len: params.read_len,
            hit_space: space,
        });
    }

    sort_marker_records(&mut records);
    Ok((records, diagnostics))
}
