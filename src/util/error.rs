// MrcSleuth - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation.
//
// Only `SourceError` aborts a run. Extraction problems are `ExtractError`
// values collected as soft diagnostics by the session and never propagated.
// `ConfigError` is never propagated either: the loader falls back to
// defaults and reports it as a warning.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all MrcSleuth operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum MrcSleuthError {
    /// The console transcript could not be opened at all.
    Source(SourceError),

    /// The goal testplan was declared inconsistently.
    Plan(PlanError),

    /// Writing a report or inventory failed.
    Export(ExportError),
}

impl fmt::Display for MrcSleuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source(e) => write!(f, "Source error: {e}"),
            Self::Plan(e) => write!(f, "Testplan error: {e}"),
            Self::Export(e) => write!(f, "Export error: {e}"),
        }
    }
}

impl std::error::Error for MrcSleuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Source(e) => Some(e),
            Self::Plan(e) => Some(e),
            Self::Export(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Source errors
// ---------------------------------------------------------------------------

/// Errors obtaining the console line sequence. These are the only fatal
/// errors of a parsing run.
#[derive(Debug)]
pub enum SourceError {
    /// The source path does not exist.
    NotFound { path: PathBuf },

    /// The source is a regular file with no content.
    Empty { path: PathBuf },

    /// The source is neither a regular file nor a character device.
    Unsupported { path: PathBuf },

    /// The source exists but could not be opened or read.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => {
                write!(f, "Console source '{}' does not exist", path.display())
            }
            Self::Empty { path } => {
                write!(f, "Console log '{}' is empty", path.display())
            }
            Self::Unsupported { path } => write!(
                f,
                "Console source '{}' is neither a log file nor a serial device",
                path.display()
            ),
            Self::Io { path, source } => {
                write!(f, "Cannot read console source '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<SourceError> for MrcSleuthError {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

// ---------------------------------------------------------------------------
// Extraction diagnostics (soft)
// ---------------------------------------------------------------------------

/// Non-fatal problems met while segmenting or extracting a block.
///
/// Recorded in the session's diagnostic list; processing always continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// A table row could not be interpreted.
    MalformedRow {
        block: String,
        row: usize,
        reason: String,
    },

    /// A data row appeared before the table header.
    RowBeforeHeader { block: String, row: usize },

    /// A row carried more cells than the header has columns.
    CellOutsideHeader {
        block: String,
        row: usize,
        column: usize,
    },

    /// A per-socket block carried no socket number in its identity.
    MissingQualifier { block: String },

    /// A margin results block arrived but no analyzer is registered.
    NoAnalyzer { block: String },

    /// A block body exceeded the buffered line cap; the rest was dropped.
    BodyOverflow { block: String, max_lines: usize },

    /// A start marker arrived while the frame stack was already at its cap.
    NestingTooDeep { block: String, max_depth: usize },
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRow { block, row, reason } => {
                write!(f, "'{block}' row {row}: {reason}")
            }
            Self::RowBeforeHeader { block, row } => {
                write!(f, "'{block}' row {row}: data row before table header")
            }
            Self::CellOutsideHeader { block, row, column } => {
                write!(f, "'{block}' row {row}: cell {column} has no header column")
            }
            Self::MissingQualifier { block } => {
                write!(f, "'{block}': block identity carries no socket number")
            }
            Self::NoAnalyzer { block } => {
                write!(f, "'{block}': no margin analyzer registered, block ignored")
            }
            Self::BodyOverflow { block, max_lines } => write!(
                f,
                "'{block}': body exceeded {max_lines} lines, remaining lines dropped"
            ),
            Self::NestingTooDeep { block, max_depth } => write!(
                f,
                "'{block}': block nesting exceeds {max_depth} levels, start marker ignored"
            ),
        }
    }
}

impl std::error::Error for ExtractError {}

// ---------------------------------------------------------------------------
// Testplan errors
// ---------------------------------------------------------------------------

/// Errors declaring the goal graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Two goals were registered under the same id.
    DuplicateGoal { id: String },

    /// A completion was reported for a goal that was never registered.
    UnknownGoal { id: String },
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateGoal { id } => write!(f, "goal '{id}' is declared twice"),
            Self::UnknownGoal { id } => write!(f, "goal '{id}' is not declared"),
        }
    }
}

impl std::error::Error for PlanError {}

impl From<PlanError> for MrcSleuthError {
    fn from(e: PlanError) -> Self {
        Self::Plan(e)
    }
}

// ---------------------------------------------------------------------------
// Export errors
// ---------------------------------------------------------------------------

/// Errors related to report and inventory export.
#[derive(Debug)]
pub enum ExportError {
    /// I/O error writing the export file.
    Io { path: PathBuf, source: io::Error },

    /// CSV serialisation error.
    Csv { path: PathBuf, source: csv::Error },

    /// JSON serialisation error.
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Export I/O error '{}': {source}", path.display())
            }
            Self::Csv { path, source } => {
                write!(f, "CSV export error '{}': {source}", path.display())
            }
            Self::Json { path, source } => {
                write!(f, "JSON export error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Csv { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
        }
    }
}

impl From<ExportError> for MrcSleuthError {
    fn from(e: ExportError) -> Self {
        Self::Export(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading. Surfaced as warnings by
/// `load_config`, never as a `MrcSleuthError`.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Convenience type alias for MrcSleuth results.
pub type Result<T> = std::result::Result<T, MrcSleuthError>;
