//src/aligner.rs

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{QuantifyError, Result};
use crate::hits::layout::{GENOME_VS_MARKER_FIELDS, PROTEIN_VS_GENOME_OUTFMT, READ_VS_MARKER_FIELDS};

/// Where the external search tools live and how to drive them.
#[derive(Debug, Clone)]
pub struct AlignerConfig {
    pub usearch: PathBuf,
    pub tblastn: PathBuf,
    pub makeblastdb: PathBuf,
    pub threads: usize,
    /// usearch `--maxaccepts`
    pub max_accepts: usize,
    /// usearch `--maxrejects`
    pub max_rejects: usize,
    pub tmp_dir: PathBuf,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            usearch: PathBuf::from("usearch"),
            tblastn: PathBuf::from("tblastn"),
            makeblastdb: PathBuf::from("makeblastdb"),
            threads: 1,
            max_accepts: 1,
            max_rejects: 32,
            tmp_dir: PathBuf::from("tmp"),
        }
    }
}

fn tool_name(cmd: &Command) -> String {
    Path::new(cmd.get_program())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cmd.get_program().to_string_lossy().into_owned())
}

/// Run a command to completion. A non-zero exit is fatal; nothing is retried.
pub fn run_command(mut cmd: Command) -> Result<()> {
    let tool = tool_name(&cmd);
    log::info!("Running {:?}", cmd);
    let output = cmd
        .output()
        .map_err(|source| QuantifyError::AlignerNotFound {
            tool: tool.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            log::error!("{} stderr:\n{}", tool, stderr.trim_end());
        }
        return Err(QuantifyError::AlignerFailed {
            tool,
            status: output.status,
        });
    }
    Ok(())
}

/// `usearch --makeudb_usearch <markers> --output <db>`
pub fn usearch_db_command(config: &AlignerConfig, markers: &Path, db: &Path) -> Command {
    let mut cmd = Command::new(&config.usearch);
    cmd.arg("--makeudb_usearch")
        .arg(markers)
        .arg("--output")
        .arg(db);
    cmd
}

fn usearch_local_command(
    config: &AlignerConfig,
    query: &Path,
    db: &Path,
    out: &Path,
    min_identity: f64,
    fields: &str,
) -> Command {
    let mut cmd = Command::new(&config.usearch);
    cmd.arg("--usearch_local")
        .arg(query)
        .arg("--db")
        .arg(db)
        .arg("--id")
        .arg(min_identity.to_string())
        .arg("--userout")
        .arg(out)
        .arg("--userfields")
        .arg(fields)
        .arg("--maxaccepts")
        .arg(config.max_accepts.to_string())
        .arg("--maxrejects")
        .arg(config.max_rejects.to_string())
        .arg("--threads")
        .arg(config.threads.to_string());
    cmd
}

/// Reads searched against the marker database.
pub fn usearch_reads_command(
    config: &AlignerConfig,
    wgs: &Path,
    db: &Path,
    out: &Path,
    min_identity: f64,
) -> Command {
    usearch_local_command(config, wgs, db, out, min_identity, READ_VS_MARKER_FIELDS)
}

/// Markers searched against a database of genome ORFs.
pub fn usearch_genome_command(
    config: &AlignerConfig,
    markers: &Path,
    orf_db: &Path,
    out: &Path,
    min_identity: f64,
) -> Command {
    usearch_local_command(config, markers, orf_db, out, min_identity, GENOME_VS_MARKER_FIELDS)
}

/// `makeblastdb -in <genome> -out <db> -dbtype nucl`
pub fn blast_nucl_db_command(config: &AlignerConfig, genome: &Path, db: &Path) -> Command {
    let mut cmd = Command::new(&config.makeblastdb);
    cmd.arg("-in")
        .arg(genome)
        .arg("-out")
        .arg(db)
        .arg("-dbtype")
        .arg("nucl")
        .arg("-logfile")
        .arg(config.tmp_dir.join("blast_nuc_db.log"));
    cmd
}

/// Markers searched against a translated nucleotide genome.
pub fn tblastn_command(config: &AlignerConfig, db: &Path, markers: &Path, out: &Path) -> Command {
    let mut cmd = Command::new(&config.tblastn);
    cmd.arg("-db")
        .arg(db)
        .arg("-query")
        .arg(markers)
        .arg("-out")
        .arg(out)
        .args(["-outfmt", PROTEIN_VS_GENOME_OUTFMT])
        .args(["-matrix", "PAM30", "-ungapped"])
        .args(["-comp_based_stats", "F", "-window_size", "0"])
        .args(["-xdrop_ungap", "1", "-evalue", "1e-3"])
        .args(["-max_target_seqs", "1000000"])
        .arg("-num_threads")
        .arg(config.threads.to_string());
    cmd
}

pub fn make_usearch_db(config: &AlignerConfig, markers: &Path, db: &Path) -> Result<()> {
    run_command(usearch_db_command(config, markers, db))
}

pub fn run_usearch(config: &AlignerConfig, wgs: &Path, db: &Path, out: &Path, min_identity: f64) -> Result<()> {
    run_command(usearch_reads_command(config, wgs, db, out, min_identity))
}

pub fn run_usearch_genome(
    config: &AlignerConfig,
    markers: &Path,
    orf_db: &Path,
    out: &Path,
    min_identity: f64,
) -> Result<()> {
    run_command(usearch_genome_command(config, markers, orf_db, out, min_identity))
}

pub fn make_blast_nucl_db(config: &AlignerConfig, genome: &Path, db: &Path) -> Result<()> {
    run_command(blast_nucl_db_command(config, genome, db))
}

pub fn run_tblastn(config: &AlignerConfig, db: &Path, markers: &Path, out: &Path) -> Result<()> {
    run_command(tblastn_command(config, db, markers, out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_usearch_reads_command() {
        let config = AlignerConfig {
            threads: 8,
            ..AlignerConfig::default()
        };
        let cmd = usearch_reads_command(
            &config,
            Path::new("wgs.fna"),
            Path::new("markers.udb"),
            Path::new("out.tab"),
            0.95,
        );
        let a = args(&cmd);
        assert_eq!(cmd.get_program(), "usearch");
        assert_eq!(a[0], "--usearch_local");
        assert_eq!(a[1], "wgs.fna");
        let fields = a.iter().position(|x| x == "--userfields").expect("userfields");
        assert_eq!(a[fields + 1], READ_VS_MARKER_FIELDS);
        let threads = a.iter().position(|x| x == "--threads").expect("threads");
        assert_eq!(a[threads + 1], "8");
        assert!(a.contains(&"0.95".to_string()));
    }

    #[test]
    fn test_genome_command_swaps_fields() {
        let cmd = usearch_genome_command(
            &AlignerConfig::default(),
            Path::new("markers.faa"),
            Path::new("orfs.udb"),
            Path::new("out.tab"),
            0.9,
        );
        assert!(args(&cmd).contains(&GENOME_VS_MARKER_FIELDS.to_string()));
    }

    #[test]
    fn test_tblastn_command() {
        let cmd = tblastn_command(
            &AlignerConfig::default(),
            Path::new("genome_db"),
            Path::new("markers.faa"),
            Path::new("out.tab"),
        );
        let a = args(&cmd);
        assert!(a.contains(&PROTEIN_VS_GENOME_OUTFMT.to_string()));
        assert!(a.contains(&"PAM30".to_string()));
    }

    #[test]
    fn test_missing_tool_is_reported() {
        let cmd = Command::new("surely-not-an-installed-aligner-binary");
        let err = run_command(cmd).expect_err("should not launch");
        assert!(matches!(err, QuantifyError::AlignerNotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_fatal() {
        let err = run_command(Command::new("false")).expect_err("false exits 1");
        assert!(matches!(err, QuantifyError::AlignerFailed { ref tool, .. } if tool == "false"));
    }
}
