/// Error types for the processing stages.
///
/// Each stage owns its error enum. Row-scoped problems (malformed codes, missing rates)
/// are not errors at all: they surface in the status column of the report. Only
/// whole-stage failures end up in `PipelineError`.
use std::time::Duration;

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("not a docx package: {0}")]
    Archive(String),

    #[error("document part missing: {0}")]
    MissingPart(&'static str),

    #[error("malformed document xml at byte {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("no table with a 'Код ТН ВЭД' header found in the document")]
    NoCodeTable,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid source url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid fetcher configuration: {0}")]
    Config(String),

    #[error("http client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    #[error("source returned status {status} for {url}")]
    Status { url: String, status: StatusCode },

    #[error("source unreachable after {attempts} attempts: {last_error}")]
    Unreachable { attempts: u32, last_error: String },

    #[error("unexpected page structure at {url}: {reason}")]
    UnexpectedStructure { url: String, reason: String },

    #[error("rate table spans more than {max_pages} pages")]
    TooManyPages { max_pages: usize },

    #[error("fetch did not complete within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("text in row {row}, column {column} contains a character not allowed in a spreadsheet")]
    InvalidCharacter { row: usize, column: usize },

    #[error("failed to write workbook: {0}")]
    Package(String),
}

impl From<zip::result::ZipError> for RenderError {
    fn from(e: zip::result::ZipError) -> Self {
        RenderError::Package(e.to_string())
    }
}

impl From<std::io::Error> for RenderError {
    fn from(e: std::io::Error) -> Self {
        RenderError::Package(e.to_string())
    }
}

/// Stage of a processing request, used for logging and for the user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extracting,
    Fetching,
    Merging,
    Rendering,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extracting => "extracting",
            Stage::Fetching => "fetching",
            Stage::Merging => "merging",
            Stage::Rendering => "rendering",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a processing request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("document extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("duty rate fetch failed: {0}")]
    Fetch(FetchError),

    #[error("duty rate fetch timed out after {0:?}")]
    FetchTimeout(Duration),

    #[error("report rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl From<FetchError> for PipelineError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout(limit) => PipelineError::FetchTimeout(limit),
            other => PipelineError::Fetch(other),
        }
    }
}

impl PipelineError {
    /// The stage that was running when the request failed.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Extraction(_) | PipelineError::Task(_) => Stage::Extracting,
            PipelineError::Fetch(_) | PipelineError::FetchTimeout(_) => Stage::Fetching,
            PipelineError::Render(_) => Stage::Rendering,
        }
    }
}
