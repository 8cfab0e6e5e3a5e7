/// Request orchestration: document in, workbook out.
///
/// Extraction runs on the blocking pool while the rate table is being fetched; both
/// must succeed before the merge, and an extraction error is reported ahead of a
/// fetch error. Every stage transition is logged inside a span
/// keyed by the document fingerprint.
use sha2::{Digest, Sha256};
use tracing::{info, warn, Instrument};

use crate::error::{ExtractionError, PipelineError, Stage};
use crate::extract::{Abbreviation, Document};
use crate::fetch::RateFetcher;
use crate::matcher::merge;
use crate::model::{CodeRecord, MergeSummary, Report, ReportSummary, Unit, UnitTable};
use crate::report::{render_report, REPORT_FILE_NAME};

/// Everything the merge needs from the uploaded document.
#[derive(Debug)]
struct Extracted {
    abbreviations: Vec<Abbreviation>,
    units: Vec<Unit>,
    codes: Vec<CodeRecord>,
}

fn extract_document(bytes: &[u8]) -> Result<Extracted, ExtractionError> {
    let document = Document::from_docx(bytes)?;
    let abbreviations = document.abbreviations();
    let units = document.units();
    let codes = document.code_records()?.collect();
    Ok(Extracted {
        abbreviations,
        units,
        codes,
    })
}

fn joined_extraction(
    joined: Result<Result<Extracted, ExtractionError>, tokio::task::JoinError>,
) -> Result<Extracted, PipelineError> {
    joined
        .map_err(|e| PipelineError::Task(e.to_string()))?
        .map_err(PipelineError::from)
}

/// SHA-256 of the uploaded bytes, hex encoded.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct Pipeline {
    fetcher: RateFetcher,
}

impl Pipeline {
    pub fn new(fetcher: RateFetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &RateFetcher {
        &self.fetcher
    }

    /// Process one uploaded document against the rate table at `source_url`
    /// (the configured default when `None`).
    pub async fn run(&self, document: Vec<u8>, source_url: Option<&str>) -> Result<Report, PipelineError> {
        let source_url = source_url
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.fetcher.config().source_url.as_str())
            .to_string();
        let span = tracing::info_span!(
            "process",
            document = %fingerprint(&document),
            bytes = document.len(),
            source = %source_url,
        );

        async move {
            let result = self.process(document, &source_url).await;
            match &result {
                Ok(report) => info!(
                    stage = %Stage::Done,
                    total = report.summary.merge.total,
                    matched = report.summary.merge.matched,
                    "report ready"
                ),
                Err(e) => warn!(stage = %Stage::Failed, failed_at = %e.stage(), error = %e, "processing failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn process(&self, document: Vec<u8>, source_url: &str) -> Result<Report, PipelineError> {
        info!(stage = %Stage::Extracting, "reading document");
        info!(stage = %Stage::Fetching, "fetching duty rates");

        // A bad document outranks a failed fetch: whichever finishes first, the
        // extraction result is checked before the fetch result.
        let mut extraction = tokio::task::spawn_blocking(move || extract_document(&document));
        let fetch = self.fetcher.fetch(source_url);
        tokio::pin!(fetch);
        let (extracted, rates) = tokio::select! {
            joined = &mut extraction => {
                let extracted = joined_extraction(joined)?;
                (extracted, fetch.await?)
            }
            rates = &mut fetch => {
                let extracted = joined_extraction(extraction.await)?;
                (extracted, rates?)
            }
        };

        info!(
            stage = %Stage::Merging,
            codes = extracted.codes.len(),
            rates = rates.len(),
            units = extracted.units.len(),
            abbreviations = extracted.abbreviations.len(),
            "merging"
        );
        let units: UnitTable = extracted.units.iter().collect();
        let merged = merge(extracted.codes, &rates, &units);
        let merge_summary = MergeSummary::from_records(&merged);

        info!(stage = %Stage::Rendering, rows = merged.len(), "writing workbook");
        let bytes = render_report(&merged)?;

        Ok(Report {
            bytes,
            file_name: REPORT_FILE_NAME,
            summary: ReportSummary {
                merge: merge_summary,
                rate_pages: rates.pages().len(),
                rate_entries: rates.len(),
                source_url: source_url.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use axum::response::Html;
    use axum::routing::get;
    use axum::Router;
    use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};

    use super::*;
    use crate::error::FetchError;
    use crate::extract::fixture::sample_docx;
    use crate::fetch::fixture::rate_page;
    use crate::fetch::FetcherConfig;
    use crate::report::SHEET_NAME;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn pipeline(source_url: String) -> Pipeline {
        let config = FetcherConfig {
            source_url,
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            fetch_timeout: Duration::from_secs(10),
            referer: None,
            ..FetcherConfig::default()
        };
        Pipeline::new(RateFetcher::new(config).unwrap())
    }

    fn cell(data: Option<&Data>) -> String {
        match data {
            Some(Data::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let page = rate_page(&[("1234 56", "Widgets", "10"), ("0101", "Отлар", "5*")], None);
        let base = serve(Router::new().route("/rates", get(move || async move { Html(page) }))).await;
        let pipeline = pipeline(format!("{base}/rates"));

        let document = sample_docx(&[
            &["1", "1234.56.00", "Widgets", "шт"],
            &["2", "9999.99.99", "Unknown", "кг"],
            &["3", "из 0101", "Лошади", ""],
        ]);
        let report = pipeline.run(document, None).await.unwrap();

        assert_eq!(report.file_name, "tn_ved_processed.xlsx");
        assert_eq!(report.summary.merge.total, 3);
        assert_eq!(report.summary.merge.matched, 1);
        assert_eq!(report.summary.merge.rate_missing, 1);
        assert_eq!(report.summary.merge.code_malformed, 1);
        assert_eq!(report.summary.rate_pages, 1);
        assert_eq!(report.summary.rate_entries, 2);

        let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(report.bytes)).unwrap();
        let range = workbook.worksheet_range(SHEET_NAME).unwrap();
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|r| (0..6).map(|c| cell(r.get(c))).collect())
            .collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1], vec!["1234.56.00", "Widgets", "10", "matched", "шт", "796"]);
        assert_eq!(rows[2], vec!["9999.99.99", "Unknown", "", "rate-missing", "кг", "166"]);
        assert_eq!(rows[3][0], "из0101");
        assert_eq!(rows[3][3], "code-malformed");
    }

    #[tokio::test]
    async fn test_explicit_url_overrides_default() {
        let page = rate_page(&[("8703", "Автомобиллар", "30")], None);
        let base = serve(Router::new().route("/other", get(move || async move { Html(page) }))).await;
        let pipeline = pipeline("http://127.0.0.1:1/unused".to_string());

        let document = sample_docx(&[&["1", "8703 21", "Автомобили", "шт"]]);
        let url = format!("{base}/other");
        let report = pipeline.run(document, Some(&url)).await.unwrap();
        assert_eq!(report.summary.merge.matched, 1);
        assert_eq!(report.summary.source_url, url);
    }

    #[tokio::test]
    async fn test_fetch_failure_produces_no_report() {
        let pipeline = pipeline("http://127.0.0.1:1/rates".to_string());
        let document = sample_docx(&[&["1", "8703", "Автомобили", "шт"]]);

        let err = pipeline.run(document, None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Fetch(FetchError::Unreachable { attempts: 2, .. })), "{err:?}");
        assert_eq!(err.stage(), Stage::Fetching);
    }

    #[tokio::test]
    async fn test_extraction_failure() {
        let page = rate_page(&[("8703", "Автомобиллар", "30")], None);
        let base = serve(Router::new().route("/rates", get(move || async move { Html(page) }))).await;
        let pipeline = pipeline(format!("{base}/rates"));

        let err = pipeline.run(b"not a docx".to_vec(), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(ExtractionError::Archive(_))), "{err:?}");
        assert_eq!(err.stage(), Stage::Extracting);
    }

    #[tokio::test]
    async fn test_broken_document_reported_before_unreachable_source() {
        let pipeline = pipeline("http://127.0.0.1:1/rates".to_string());

        let err = pipeline.run(b"not a docx".to_vec(), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(ExtractionError::Archive(_))), "{err:?}");
        assert_eq!(err.stage(), Stage::Extracting);
    }

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
