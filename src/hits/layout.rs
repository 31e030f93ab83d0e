// src/hits/layout.rs

use crate::error::{QuantifyError, Result};
use crate::types::HitRecord;

/// usearch `--userfields` for reads searched against the marker database.
pub const READ_VS_MARKER_FIELDS: &str =
    "query+target+id+alnlen+mism+opens+qlo+qhi+tlo+thi+evalue+bits+ql+tl+qs+ts";

/// usearch `--userfields` for markers searched against genome ORFs; the
/// target (ORF) comes first so column 1 is always the read/ORF.
pub const GENOME_VS_MARKER_FIELDS: &str =
    "target+query+id+alnlen+mism+opens+qlo+qhi+tlo+thi+evalue+bits+ql+tl+qs+ts";

/// tblastn `-outfmt` for markers searched against a nucleotide genome.
pub const PROTEIN_VS_GENOME_OUTFMT: &str =
    "6 sseqid qseqid pident length mismatch gapopen qstart qend sstart send evalue bitscore";

/// Column layout of the aligner's tabular output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputLayout {
    /// usearch, reads vs markers: `query,target,id,alnlen,...,ql,tl,qs,ts`
    #[default]
    ReadVsMarker,
    /// usearch, ORFs vs markers: `target,query,id,alnlen,...,ql,tl,qs,ts`
    GenomeVsMarker,
    /// tblastn outfmt 6: `sseqid,qseqid,pident,length,...,bitscore`
    ProteinVsGenome,
}

impl OutputLayout {
    /// Minimum number of columns a line must have.
    pub fn min_columns(self) -> usize {
        match self {
            OutputLayout::ReadVsMarker | OutputLayout::GenomeVsMarker => 13,
            OutputLayout::ProteinVsGenome => 8,
        }
    }

    /// Pull the quantifier's fields out of one tab-separated line.
    /// `line_no` is only used for error messages.
    pub fn parse(self, line: &str, line_no: u64) -> Result<HitRecord> {
        let fields: Vec<&str> = line.trim_end_matches(&['\r', '\n'][..]).split('\t').collect();
        if fields.len() < self.min_columns() {
            return Err(malformed(
                line_no,
                format!(
                    "expected at least {} columns, found {}",
                    self.min_columns(),
                    fields.len()
                ),
            ));
        }

        let identity: f64 = parse_field(&fields, 2, "identity", line_no)?;
        let aln_len: usize = parse_field(&fields, 3, "alignment length", line_no)?;
        let read_len = match self {
            OutputLayout::ReadVsMarker | OutputLayout::GenomeVsMarker => {
                parse_field(&fields, 12, "query length", line_no)?
            }
            OutputLayout::ProteinVsGenome => {
                let qlo: usize = parse_field(&fields, 6, "query start", line_no)?;
                let qhi: usize = parse_field(&fields, 7, "query end", line_no)?;
                qhi.saturating_sub(qlo)
            }
        };

        Ok(HitRecord {
            query: fields[0].to_string(),
            marker: fields[1].to_string(),
            identity,
            aln_len,
            read_len,
        })
    }
}

fn parse_field<T: std::str::FromStr>(
    fields: &[&str],
    idx: usize,
    name: &str,
    line_no: u64,
) -> Result<T> {
    fields[idx]
        .trim()
        .parse()
        .map_err(|_| malformed(line_no, format!("invalid {} '{}'", name, fields[idx])))
}

fn malformed(line: u64, reason: String) -> QuantifyError {
    QuantifyError::MalformedHitLine { line, reason }
}
