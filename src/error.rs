//src/error.rs

use std::fmt;
use std::io;
use std::process::ExitStatus;

use thiserror::Error;

/// A type alias for `Result<T, shortbred_quant::QuantifyError>`.
pub type Result<T> = std::result::Result<T, QuantifyError>;

/// Errors that stop (part of) a quantification run.
#[derive(Debug, Error)]
pub enum QuantifyError {
    /// A marker id does not follow the `<family>_<TM|JM|QM><n>_#<n>` convention.
    #[error("marker id '{marker}' does not match the <family>_<kind><index>_#<suffix> naming convention")]
    MalformedMarkerId { marker: String },

    /// The aligner reported a hit against a marker that is not in the catalog.
    #[error("marker '{marker}' is not present in the marker catalog")]
    UnknownMarker { marker: String },

    /// A family's marker records could not be summarised.
    #[error("problem with results for family '{family}': {reason}")]
    EmptyFamilyGroup { family: String, reason: String },

    /// A line of aligner output could not be parsed with the selected layout.
    #[error("malformed aligner output at line {line}: {reason}")]
    MalformedHitLine { line: u64, reason: String },

    /// Run settings that contradict each other or the loaded catalog.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The external aligner exited with a non-zero status.
    #[error("{tool} failed with {status}")]
    AlignerFailed { tool: String, status: ExitStatus },

    /// The external aligner could not be started at all.
    #[error("could not launch {tool}: {source}")]
    AlignerNotFound {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error - {0}")]
    Io(#[from] io::Error),
}

/// Non-fatal conditions. They are logged when raised and carried in the
/// results so the caller can inspect them after the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// The sample contained no reads; every normalized count was forced to 0.
    EmptySample { sample: String },
    /// The computed hit space of a marker was not positive; the marker was
    /// left out of the marker table.
    DegenerateHitSpace { marker: String, hit_space: f64 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Diagnostic::EmptySample { sample } => {
                write!(f, "0 reads found in file: {}", sample)
            }
            Diagnostic::DegenerateHitSpace { marker, hit_space } => write!(
                f,
                "non-positive hit space ({}) for marker {}; marker excluded",
                hit_space, marker
            ),
        }
    }
}

impl Diagnostic {
    /// Log the diagnostic on the warning channel and hand it back.
    pub(crate) fn raise(self) -> Self {
        log::warn!("{}", self);
        self
    }
}
