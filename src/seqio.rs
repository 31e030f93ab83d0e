//src/seqio.rs

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use rayon::prelude::*;
use tar::Archive;

/// Sequence id and length, all the quantifier needs from a FASTA/FASTQ record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqLen {
    pub id: String,
    pub length: usize,
}

/// Format guess from a file name, the same way the file names are
/// checked before handing them to the aligner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceFormat {
    Fasta,
    Fastq,
    Unknown,
}

impl SequenceFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let name = path.as_ref().to_string_lossy().to_lowercase();
        if name.contains("fastq") || name.contains(".fq") {
            SequenceFormat::Fastq
        } else if ["fasta", ".fna", ".faa", ".fa"].iter().any(|ext| name.contains(ext)) {
            SequenceFormat::Fasta
        } else {
            SequenceFormat::Unknown
        }
    }
}

/// Compression of an input file, from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputCompression {
    Plain,
    Gzip,
    Bzip2,
    TarGzip,
    TarBzip2,
}

impl InputCompression {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let name = path.as_ref().to_string_lossy().to_lowercase();
        if name.ends_with(".tar.bz2") {
            InputCompression::TarBzip2
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            InputCompression::TarGzip
        } else if name.ends_with(".gz") {
            InputCompression::Gzip
        } else if name.ends_with(".bz2") {
            InputCompression::Bzip2
        } else {
            InputCompression::Plain
        }
    }

    pub fn is_archive(self) -> bool {
        matches!(self, InputCompression::TarGzip | InputCompression::TarBzip2)
    }
}

fn archive_error(path: &Path) -> io::Error {
    io::Error::new(
        ErrorKind::InvalidInput,
        format!("{} is a tar archive; extract it first", path.display()),
    )
}

/// Open a file for line reading, decompressing ".gz" and ".bz2" on the fly.
/// Tar archives have to go through `extract_archive`.
pub fn open_reader<P: AsRef<Path>>(path: P) -> io::Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let compression = InputCompression::from_path(path);
    if compression.is_archive() {
        return Err(archive_error(path));
    }
    let f = File::open(path)?;

    let reader: Box<dyn BufRead + Send> = match compression {
        InputCompression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(f))),
        InputCompression::Bzip2 => Box::new(BufReader::new(MultiBzDecoder::new(f))),
        _ => Box::new(BufReader::new(f)),
    };
    Ok(reader)
}

/// Unpack the regular files of a ".tar.gz" / ".tar.bz2" into `dest`
/// (directory structure flattened) and return their paths, sorted.
pub fn extract_archive<P: AsRef<Path>, Q: AsRef<Path>>(path: P, dest: Q) -> io::Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let dest = dest.as_ref();
    let f = File::open(path)?;
    let decoder: Box<dyn Read> = match InputCompression::from_path(path) {
        InputCompression::TarGzip => Box::new(MultiGzDecoder::new(f)),
        InputCompression::TarBzip2 => Box::new(MultiBzDecoder::new(f)),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{} is not a tar archive", path.display()),
            ))
        }
    };

    log::info!("Extracting {} into {}", path.display(), dest.display());
    fs::create_dir_all(dest)?;
    let mut archive = Archive::new(decoder);
    let mut files = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = match entry.path()?.file_name() {
            Some(name) => name.to_owned(),
            None => continue,
        };
        let out = dest.join(name);
        entry.unpack(&out)?;
        files.push(out);
    }
    files.sort();
    Ok(files)
}

#[derive(Clone, Copy)]
enum Layout {
    Fasta,
    Fastq,
}

/// Streaming `(id, length)` iterator over a FASTA or FASTQ file.
/// The format is taken from the first non-blank line ('>' or '@').
/// Multi-line FASTA is supported; FASTQ records are expected on four lines.
pub struct SequenceLengths {
    reader: Box<dyn BufRead + Send>,
    line: String,
    layout: Option<Layout>,
    pending_header: Option<String>,
    done: bool,
}

impl SequenceLengths {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(open_reader(path)?))
    }

    pub fn new(reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            reader,
            line: String::new(),
            layout: None,
            pending_header: None,
            done: false,
        }
    }

    /// Read the next line into `self.line`, returning `false` at EOF.
    fn next_line(&mut self) -> io::Result<bool> {
        self.line.clear();
        Ok(self.reader.read_line(&mut self.line)? != 0)
    }

    fn next_nonblank_line(&mut self) -> io::Result<bool> {
        loop {
            if !self.next_line()? {
                return Ok(false);
            }
            if !self.line.trim().is_empty() {
                return Ok(true);
            }
        }
    }

    fn detect(&mut self) -> io::Result<Option<Layout>> {
        if !self.next_nonblank_line()? {
            return Ok(None);
        }
        let layout = if self.line.starts_with('>') {
            Layout::Fasta
        } else if self.line.starts_with('@') {
            Layout::Fastq
        } else {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "Not a FASTA or FASTQ file: first record starts with neither '>' nor '@'",
            ));
        };
        self.pending_header = Some(self.line.clone());
        self.layout = Some(layout);
        Ok(Some(layout))
    }

    fn next_fasta(&mut self) -> io::Result<Option<SeqLen>> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => return Ok(None),
        };
        let mut length = 0;
        while self.next_line()? {
            if self.line.starts_with('>') {
                self.pending_header = Some(self.line.clone());
                break;
            }
            length += self.line.trim().len();
        }
        Ok(Some(SeqLen {
            id: record_id(&header),
            length,
        }))
    }

    fn next_fastq(&mut self) -> io::Result<Option<SeqLen>> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => {
                if !self.next_nonblank_line()? {
                    return Ok(None);
                }
                self.line.clone()
            }
        };
        if !header.starts_with('@') {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("Malformed FASTQ header: {}", header.trim_end()),
            ));
        }

        if !self.next_line()? {
            return Err(truncated(&header));
        }
        let length = self.line.trim().len();

        // plus line, then quality line
        for _ in 0..2 {
            if !self.next_line()? {
                return Err(truncated(&header));
            }
        }

        Ok(Some(SeqLen {
            id: record_id(&header),
            length,
        }))
    }
}

impl Iterator for SequenceLengths {
    type Item = io::Result<SeqLen>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let layout = match self.layout {
            Some(l) => Ok(Some(l)),
            None => self.detect(),
        };
        let result = match layout {
            Ok(Some(Layout::Fasta)) => self.next_fasta(),
            Ok(Some(Layout::Fastq)) => self.next_fastq(),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        match result {
            Ok(Some(rec)) => Some(Ok(rec)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn record_id(header: &str) -> String {
    header[1..]
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

fn truncated(header: &str) -> io::Error {
    io::Error::new(
        ErrorKind::UnexpectedEof,
        format!("Truncated FASTQ record: {}", header.trim_end()),
    )
}

/// Read count and length statistics of a WGS sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReadStats {
    pub reads: u64,
    pub bases: u64,
    pub max_len: usize,
}

impl ReadStats {
    pub fn add(&mut self, length: usize) {
        self.reads += 1;
        self.bases += length as u64;
        self.max_len = self.max_len.max(length);
    }

    pub fn merge(mut self, other: ReadStats) -> ReadStats {
        self.reads += other.reads;
        self.bases += other.bases;
        self.max_len = self.max_len.max(other.max_len);
        self
    }

    /// Mean read length in bases, 0 for an empty sample.
    pub fn mean_len(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            self.bases as f64 / self.reads as f64
        }
    }
}

/// Scan one WGS file.
pub fn scan_reads<P: AsRef<Path>>(path: P) -> io::Result<ReadStats> {
    let mut stats = ReadStats::default();
    for rec in SequenceLengths::open(path)? {
        stats.add(rec?.length);
    }
    Ok(stats)
}

/// Scan several WGS files in parallel and merge their statistics.
pub fn read_stats<P: AsRef<Path> + Sync>(paths: &[P]) -> io::Result<ReadStats> {
    paths
        .par_iter()
        .map(|p| {
            let stats = scan_reads(p)?;
            log::debug!(
                "{}: {} reads, mean length {:.1}",
                p.as_ref().display(),
                stats.reads,
                stats.mean_len()
            );
            Ok(stats)
        })
        .try_reduce(ReadStats::default, |a, b| Ok(a.merge(b)))
}
