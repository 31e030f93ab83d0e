// src/lib.rs
pub mod aligner;
pub mod error;
pub mod hits;
pub mod markers;
pub mod normalize;
pub mod report;
pub mod seqio;
pub mod types;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;

use chrono::Local;

pub use crate::error::{Diagnostic, QuantifyError, Result};
use crate::hits::{collect_orf_matches, reassign_orfs, CountingMode, HitTally, HitValidator, OutputLayout, Thresholds};
use crate::markers::{FamilyNaming, MarkerCatalog};
use crate::normalize::{normalize_counts, NormalizeParams};
use crate::report::{aggregate_families, write_family_table, write_genome_table, write_marker_table, FamilyReport};
use crate::seqio::ReadStats;
use crate::types::MarkerCountRecord;

/// Knobs of one quantification run.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantifyConfig {
    /// Minimum identity as a fraction.
    pub min_identity: f64,
    /// Fraction of a read that must align to the marker.
    pub aln_fraction: f64,
    /// Reads shorter than this (bases) never count.
    pub min_read_bp: usize,
    /// Trusted read length in bases; the sample mean when `None`.
    pub avg_read_bp: Option<usize>,
    /// Markers shorter than this (residues) are left out of the catalog.
    pub min_marker_len: usize,
    pub naming: FamilyNaming,
    pub mode: CountingMode,
    pub layout: OutputLayout,
    /// Genome mode: count a marker every time an ORF hits it.
    pub count_repeats: bool,
}

impl Default for QuantifyConfig {
    fn default() -> Self {
        Self {
            min_identity: 0.95,
            aln_fraction: 0.90,
            min_read_bp: 90,
            avg_read_bp: None,
            min_marker_len: 0,
            naming: FamilyNaming::Convention,
            mode: CountingMode::Markers,
            layout: OutputLayout::ReadVsMarker,
            count_repeats: false,
        }
    }
}

impl QuantifyConfig {
    /// Load the marker FASTA with this run's naming and minimum length.
    pub fn load_catalog<P: AsRef<Path>>(&self, path: P) -> Result<MarkerCatalog> {
        self.check_settings()?;
        MarkerCatalog::from_fasta(path, self.naming, self.min_marker_len)
    }

    fn check_settings(&self) -> Result<()> {
        if self.mode == CountingMode::Centroids && self.naming != FamilyNaming::IdAsFamily {
            return Err(QuantifyError::InvalidConfig {
                reason: "centroid counting needs every id to be its own family".to_string(),
            });
        }
        Ok(())
    }

    /// The catalog must have been built with this run's naming and minimum
    /// marker length.
    pub fn check_catalog(&self, catalog: &MarkerCatalog) -> Result<()> {
        self.check_settings()?;
        if catalog.naming() != self.naming {
            return Err(QuantifyError::InvalidConfig {
                reason: format!(
                    "catalog uses {:?} family naming, run asks for {:?}",
                    catalog.naming(),
                    self.naming
                ),
            });
        }
        if catalog.min_length() != self.min_marker_len {
            return Err(QuantifyError::InvalidConfig {
                reason: format!(
                    "catalog keeps markers of {} aa and up, run asks for {}",
                    catalog.min_length(),
                    self.min_marker_len
                ),
            });
        }
        Ok(())
    }

    /// Read length (bases) used for thresholds and hit space.
    pub fn trusted_read_len(&self, stats: &ReadStats) -> f64 {
        match self.avg_read_bp {
            Some(bp) => bp as f64,
            None => stats.mean_len(),
        }
    }

    pub fn thresholds(&self, stats: &ReadStats) -> Thresholds {
        Thresholds {
            min_identity: self.min_identity,
            aln_fraction: self.aln_fraction,
            avg_read_aa: (self.trusted_read_len(stats) / 3.0).floor() as usize,
            min_read_aa: self.min_read_bp / 3,
            mode: self.mode,
        }
    }

    /// Genome ORFs are longer than markers: a hit must cover the whole marker.
    pub fn genome_thresholds(&self) -> Thresholds {
        Thresholds {
            min_identity: self.min_identity,
            aln_fraction: self.aln_fraction,
            avg_read_aa: usize::MAX,
            min_read_aa: 0,
            mode: self.mode,
        }
    }

    pub fn normalize_params(&self, stats: &ReadStats) -> NormalizeParams {
        NormalizeParams {
            read_len: self.trusted_read_len(stats),
            aln_fraction: self.aln_fraction,
            total_reads: stats.reads,
            mode: self.mode,
        }
    }
}

/// Everything one sample produces.
#[derive(Debug)]
pub struct QuantifyResults {
    pub sample: String,
    pub tally: HitTally,
    pub accepted: u64,
    pub rejected: u64,
    /// One row per marker with at least one valid hit, by family then marker.
    pub marker_records: Vec<MarkerCountRecord>,
    pub family_report: FamilyReport,
    /// Non-fatal conditions met along the way.
    pub diagnostics: Vec<Diagnostic>,
}

impl QuantifyResults {
    /// Marker-level table text.
    pub fn marker_table(&self) -> String {
        let mut buf = Vec::new();
        let _ = write_marker_table(&mut buf, &self.marker_records);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Family-level table text.
    pub fn family_table(&self) -> String {
        let mut buf = Vec::new();
        let _ = write_family_table(&mut buf, &self.family_report.families);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn write_tables<P: AsRef<Path>, Q: AsRef<Path>>(&self, family_path: P, marker_path: Option<Q>) -> Result<()> {
        write_family_table(BufWriter::new(File::create(family_path)?), &self.family_report.families)?;
        if let Some(path) = marker_path {
            write_marker_table(BufWriter::new(File::create(path)?), &self.marker_records)?;
        }
        Ok(())
    }
}

/// Quantify one sample from its aligner tables, one per read file.
///
/// Each table is consumed line by line on its own; accepted lines are
/// copied to `ledger`. `stats` describes all of the sample's reads.
pub fn quantify_sample<I, R, W>(
    catalog: &MarkerCatalog,
    tables: I,
    ledger: &mut W,
    sample: &str,
    stats: &ReadStats,
    config: &QuantifyConfig,
) -> Result<QuantifyResults>
where
    I: IntoIterator<Item = R>,
    R: BufRead,
    W: Write,
{
    config.check_catalog(catalog)?;
    let thresholds = config.thresholds(stats);
    log::info!(
        "{}: {} reads, trusted read length {:.1} bp, identity >= {}, alignment >= {} of read",
        sample,
        stats.reads,
        config.trusted_read_len(stats),
        config.min_identity,
        config.aln_fraction
    );

    let mut validator = HitValidator::new(catalog, thresholds, config.layout);
    for table in tables {
        validator.process_reader(table, ledger)?;
    }
    let accepted = validator.accepted();
    let rejected = validator.rejected();
    let tally = validator.into_tally();

    let (marker_records, diagnostics) =
        normalize_counts(&tally, catalog, &config.normalize_params(stats), sample)?;
    let family_report = aggregate_families(&marker_records, catalog);

    Ok(QuantifyResults {
        sample: sample.to_string(),
        tally,
        accepted,
        rejected,
        marker_records,
        family_report,
        diagnostics,
    })
}

/// Filter a genome search table into the valid-hits ledger.
pub fn validate_genome_hits<R: BufRead, W: Write>(
    catalog: &MarkerCatalog,
    hits: R,
    ledger: &mut W,
    config: &QuantifyConfig,
) -> Result<HitTally> {
    config.check_catalog(catalog)?;
    let mut validator = HitValidator::new(catalog, config.genome_thresholds(), config.layout);
    validator.process_reader(hits, ledger)?;
    Ok(validator.into_tally())
}

/// Whole-genome mode: split each ORF's credit across the families it hit.
/// `ledger` is the valid-hits ledger of the genome search.
pub fn quantify_genome<R: BufRead>(
    catalog: &MarkerCatalog,
    ledger: R,
    config: &QuantifyConfig,
) -> Result<BTreeMap<String, f64>> {
    config.check_catalog(catalog)?;
    let matches = collect_orf_matches(ledger)?;
    log::info!("{} ORFs with valid hits", matches.len());
    reassign_orfs(&matches, catalog, config.count_repeats)
}

pub fn write_genome_counts<P: AsRef<Path>>(path: P, counts: &BTreeMap<String, f64>) -> Result<()> {
    write_genome_table(BufWriter::new(File::create(path)?), counts)?;
    Ok(())
}

/// Write `Quantlog.txt` with the search parameters into `dir`.
pub fn write_run_log<P: AsRef<Path>>(dir: P, config: &QuantifyConfig) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(dir.as_ref().join("Quantlog.txt"))?);
    writeln!(out, "ShortBRED log")?;
    // ctime layout, e.g. "Sat Oct 17 09:30:00 2026"
    writeln!(out, "{}", Local::now().format("%a %b %e %H:%M:%S %Y"))?;
    writeln!(out, "SEARCH PARAMETERS")?;
    writeln!(out, "Match ID:{}", config.min_identity)?;
    writeln!(out, "Match Coverage of Read:{}", config.aln_fraction)?;
    writeln!(out, "Minimum marker length (aa): {}", config.min_marker_len)?;
    writeln!(out, "Minimum read length (bp): {}", config.min_read_bp)?;
    match config.avg_read_bp {
        Some(bp) => writeln!(out, "Trusted read length (bp): {}", bp)?,
        None => writeln!(out, "Trusted read length (bp): sample mean")?,
    }
    writeln!(out, "Mode: {:?}, layout: {:?}", config.mode, config.layout)?;
    out.flush()
}
