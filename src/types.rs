//src/types.rs

/// One marker sequence from the marker FASTA.
/// The owning family is resolved once, when the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub id: String,
    pub family: String,
    /// Length in amino-acid residues.
    pub length: usize,
}

/// The fields of one aligner output line that the quantifier needs.
/// The raw line itself is kept by the caller for the valid-hits ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct HitRecord {
    /// Read id (per-read mode) or ORF id (genome mode).
    pub query: String,
    pub marker: String,
    /// Percent identity, 0-100.
    pub identity: f64,
    /// Alignment length in residues.
    pub aln_len: usize,
    /// Read length in residues.
    pub read_len: usize,
}

/// One row of the marker-level results table.
///   Family  Marker  Normalized Count  Hits  MarkerLength  ReadLength  HitSpace
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerCountRecord {
    pub family: String,
    pub marker: String,
    pub normalized_count: f64,
    pub hits: u64,
    pub marker_len: usize,
    pub read_len: f64,
    pub hit_space: f64,
}

/// One row of the family-level results table.
///   Family  Count  Hits  TotMarkerLength
#[derive(Debug, Clone, PartialEq)]
pub struct FamilySummaryRecord {
    pub family: String,
    /// Median of the normalized counts of the family's hit markers.
    pub count: f64,
    pub hits: u64,
    pub tot_marker_len: usize,
}
