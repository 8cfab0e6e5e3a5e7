//! Core of the TN VED duty-rate merger: reads commodity codes from a `.docx`
//! listing, fetches the current import duty rates and writes the joined table as an
//! `.xlsx` workbook. Nothing here depends on the web layer.

pub mod code;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod matcher;
pub mod model;
pub mod pipeline;
pub mod rate_text;
pub mod report;

pub use error::{ExtractionError, FetchError, PipelineError, RenderError, Stage};
pub use fetch::{FetcherConfig, RateFetcher};
pub use pipeline::Pipeline;
