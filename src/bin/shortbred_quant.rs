use std::error::Error;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use shortbred_quant::aligner::{self, AlignerConfig};
use shortbred_quant::hits::{CountingMode, OutputLayout};
use shortbred_quant::markers::{FamilyNaming, MarkerCatalog};
use shortbred_quant::seqio::{self, InputCompression, SequenceFormat};
use shortbred_quant::{quantify_genome, quantify_sample, validate_genome_hits, write_genome_counts, write_run_log, QuantifyConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SearchProgram {
    /// usearch against a protein ORF database
    Usearch,
    /// tblastn against a nucleotide genome
    Tblastn,
}

/// Estimate protein family abundance from short reads hitting ShortBRED markers.
#[derive(Parser, Debug)]
#[command(name = "shortbred-quant", version)]
struct Args {
    /// Marker FASTA (protein)
    #[arg(long)]
    markers: PathBuf,

    /// WGS read files (FASTA/FASTQ; .gz, .bz2, .tar.gz and .tar.bz2 accepted)
    #[arg(long, num_args = 1.., conflicts_with = "genome")]
    wgs: Vec<PathBuf>,

    /// Genome (ORFs for usearch, nucleotides for tblastn); switches to genome mode
    #[arg(long)]
    genome: Option<PathBuf>,

    /// Family-level results table
    #[arg(long, default_value = "results.tsv")]
    results: PathBuf,

    /// Marker-level results table
    #[arg(long)]
    marker_results: Option<PathBuf>,

    /// Aligner output table; searched into the tmp directory when omitted
    #[arg(long)]
    blastout: Option<PathBuf>,

    /// Use the existing --blastout table instead of running the aligner
    #[arg(long, requires = "blastout")]
    reuse_blastout: bool,

    /// Valid-hits ledger
    #[arg(long)]
    valid_hits: Option<PathBuf>,

    /// Minimum identity (fraction)
    #[arg(long = "id", default_value_t = 0.95)]
    min_identity: f64,

    /// Fraction of the read that must align
    #[arg(long = "cov", alias = "pctlength", default_value_t = 0.90)]
    aln_fraction: f64,

    /// Markers shorter than this (aa) are left out
    #[arg(long = "length", default_value_t = 0)]
    min_marker_len: usize,

    /// Reads shorter than this (bp) are ignored
    #[arg(long, default_value_t = 90)]
    min_read_bp: usize,

    /// Trusted read length (bp); the sample mean when omitted
    #[arg(long)]
    avg_read_bp: Option<usize>,

    /// Threads for the aligner and read scanning
    #[arg(long, default_value_t = 1)]
    threads: usize,

    #[arg(long, default_value = "tmp")]
    tmp: PathBuf,

    /// Marker ids are their own families
    #[arg(long)]
    not_markers: bool,

    /// Count against whole centroids (evaluation runs)
    #[arg(long)]
    centroids: bool,

    /// Genome mode: count repeated ORF hits on the same marker
    #[arg(long)]
    unannotated: bool,

    #[arg(long, value_enum, default_value_t = SearchProgram::Usearch)]
    search_program: SearchProgram,

    #[arg(long, default_value = "usearch")]
    usearch: PathBuf,

    #[arg(long, default_value = "tblastn")]
    tblastn: PathBuf,

    #[arg(long, default_value = "makeblastdb")]
    makeblastdb: PathBuf,

    #[arg(long, default_value_t = 1)]
    max_accepts: usize,

    #[arg(long, default_value_t = 32)]
    max_rejects: usize,
}

fn spinner(color: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template(&format!("{{spinner:.{}}} {{msg}}", color))
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner
}

fn open_table(path: &Path) -> io::Result<BufReader<File>> {
    Ok(BufReader::new(File::open(path)?))
}

fn file_stem(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}

/// Archives are unpacked into `tmp`; other inputs are used as they are.
fn expand_inputs(paths: &[PathBuf], tmp: &Path) -> io::Result<Vec<PathBuf>> {
    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        if InputCompression::from_path(path).is_archive() {
            let dest = tmp.join(format!("{}_extracted", file_stem(path)));
            inputs.extend(seqio::extract_archive(path, &dest)?);
        } else {
            inputs.push(path.clone());
        }
    }
    Ok(inputs)
}

/// One aligner table per read file: `<blastout>` for a single file,
/// `<blastout>.<i>` for several, or numbered tables in `tmp`.
fn search_tables(blastout: Option<&Path>, tmp: &Path, markers_name: &str, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| match (blastout, n) {
            (Some(path), 1) => path.to_path_buf(),
            (Some(path), _) => PathBuf::from(format!("{}.{}", path.display(), i)),
            (None, _) => tmp.join(format!("{}.{}.blast", markers_name, i)),
        })
        .collect()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(&args.tmp)?;
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads.max(1))
        .build_global()
        .ok();

    let mode = if args.centroids {
        CountingMode::Centroids
    } else {
        CountingMode::Markers
    };
    let naming = if args.not_markers || args.centroids {
        FamilyNaming::IdAsFamily
    } else {
        FamilyNaming::Convention
    };
    let layout = match (&args.genome, args.search_program) {
        (None, _) => OutputLayout::ReadVsMarker,
        (Some(_), SearchProgram::Usearch) => OutputLayout::GenomeVsMarker,
        (Some(_), SearchProgram::Tblastn) => OutputLayout::ProteinVsGenome,
    };
    let config = QuantifyConfig {
        min_identity: args.min_identity,
        aln_fraction: args.aln_fraction,
        min_read_bp: args.min_read_bp,
        avg_read_bp: args.avg_read_bp,
        min_marker_len: args.min_marker_len,
        naming,
        mode,
        layout,
        count_repeats: args.unannotated,
    };
    let aligner_config = AlignerConfig {
        usearch: args.usearch.clone(),
        tblastn: args.tblastn.clone(),
        makeblastdb: args.makeblastdb.clone(),
        threads: args.threads,
        max_accepts: args.max_accepts,
        max_rejects: args.max_rejects,
        tmp_dir: args.tmp.clone(),
    };
    write_run_log(&args.tmp, &config)?;

    // 1. Markers
    let sp = spinner("blue");
    sp.set_message("Loading markers...");
    let catalog = config.load_catalog(&args.markers)?;
    sp.finish_with_message(format!(
        "Loaded {} markers in {} families.",
        catalog.len(),
        catalog.family_count()
    ));

    let markers_name = file_stem(&args.markers);
    let valid_hits = args
        .valid_hits
        .clone()
        .unwrap_or_else(|| args.tmp.join(format!("{}.valid_hits.tab", markers_name)));

    if let Some(genome) = &args.genome {
        return run_genome(&args, genome, &catalog, &config, &aligner_config, &valid_hits);
    }

    if args.wgs.is_empty() {
        return Err("either --wgs or --genome is required".into());
    }
    let wgs = expand_inputs(&args.wgs, &args.tmp)?;
    for wgs in &wgs {
        if SequenceFormat::from_path(wgs) == SequenceFormat::Unknown {
            log::warn!("Could not tell the format of {} from its name; sniffing contents", wgs.display());
        }
    }

    // 2. Reads
    let sp = spinner("green");
    sp.set_message("Counting reads...");
    let stats = seqio::read_stats(&wgs)?;
    sp.finish_with_message(format!(
        "{} reads, mean length {:.1} bp.",
        stats.reads,
        stats.mean_len()
    ));

    // 3. Search
    let tables = search_tables(args.blastout.as_deref(), &args.tmp, &markers_name, wgs.len());
    if !args.reuse_blastout {
        let sp = spinner("yellow");
        sp.set_message("Searching reads against markers...");
        let db = args.tmp.join(format!("{}.udb", markers_name));
        aligner::make_usearch_db(&aligner_config, &args.markers, &db)?;
        for (reads, table) in wgs.iter().zip(&tables) {
            aligner::run_usearch(&aligner_config, reads, &db, table, config.min_identity)?;
        }
        sp.finish_with_message("Search finished.");
    }

    // 4. Count
    let sp = spinner("cyan");
    sp.set_message("Quantifying...");
    let hits = tables
        .iter()
        .map(|t| open_table(t))
        .collect::<io::Result<Vec<_>>>()?;
    let sample = args
        .wgs
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",");
    let mut ledger = BufWriter::new(File::create(&valid_hits)?);
    let results = quantify_sample(&catalog, hits, &mut ledger, &sample, &stats, &config)?;
    results.write_tables(&args.results, args.marker_results.as_ref())?;
    sp.finish_with_message(format!(
        "{} valid hits, {} families written to {}.",
        results.accepted,
        results.family_report.families.len(),
        args.results.display()
    ));

    for (family, e) in &results.family_report.failures {
        eprintln!("Problem with results for family {}: {}", family, e);
    }
    for d in &results.diagnostics {
        eprintln!("WARNING: {}", d);
    }
    Ok(())
}

fn run_genome(
    args: &Args,
    genome: &Path,
    catalog: &MarkerCatalog,
    config: &QuantifyConfig,
    aligner_config: &AlignerConfig,
    valid_hits: &Path,
) -> Result<(), Box<dyn Error>> {
    let genome_name = file_stem(genome);
    let table = args
        .blastout
        .clone()
        .unwrap_or_else(|| args.tmp.join(format!("{}.blast", genome_name)));

    if !args.reuse_blastout {
        let sp = spinner("yellow");
        sp.set_message("Searching markers against genome...");
        match args.search_program {
            SearchProgram::Usearch => {
                let db = args.tmp.join(format!("{}.udb", genome_name));
                aligner::make_usearch_db(aligner_config, genome, &db)?;
                aligner::run_usearch_genome(aligner_config, &args.markers, &db, &table, config.min_identity)?;
            }
            SearchProgram::Tblastn => {
                let db = args.tmp.join(format!("{}.blastdb", genome_name));
                aligner::make_blast_nucl_db(aligner_config, genome, &db)?;
                aligner::run_tblastn(aligner_config, &db, &args.markers, &table)?;
            }
        }
        sp.finish_with_message("Search finished.");
    }

    let sp = spinner("cyan");
    sp.set_message("Assigning ORF hits to families...");
    {
        let mut ledger = BufWriter::new(File::create(valid_hits)?);
        validate_genome_hits(catalog, open_table(&table)?, &mut ledger, config)?;
    }
    let counts = quantify_genome(catalog, open_table(valid_hits)?, config)?;
    write_genome_counts(&args.results, &counts)?;
    sp.finish_with_message(format!(
        "{} families written to {}.",
        counts.len(),
        args.results.display()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_tables_match_between_search_and_reuse() {
        let tmp = Path::new("tmp");
        let out = Path::new("hits.blast");
        assert_eq!(search_tables(Some(out), tmp, "m.faa", 1), vec![PathBuf::from("hits.blast")]);
        assert_eq!(
            search_tables(Some(out), tmp, "m.faa", 2),
            vec![PathBuf::from("hits.blast.0"), PathBuf::from("hits.blast.1")]
        );
        assert_eq!(search_tables(None, tmp, "m.faa", 1), vec![tmp.join("m.faa.0.blast")]);
    }

    #[test]
    fn test_expand_inputs_keeps_plain_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let reads = vec![PathBuf::from("a.fastq"), PathBuf::from("b.fq.gz")];
        assert_eq!(expand_inputs(&reads, dir.path()).expect("expand"), reads);
    }
}
