/// Duty-rate fetcher for the legal portal.
///
/// Downloads the published tariff page (following pagination links when the table is
/// split), finds the rate table by its header markers and turns every row into
/// `RateRecord`s keyed by normalized code. Transient failures are retried with
/// exponential backoff; the whole fetch is bounded by an overall timeout. The caller
/// gets either the complete table or a terminal error, never a partial table.
use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use reqwest::{StatusCode, Url};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::code::CodeKey;
use crate::error::FetchError;
use crate::extract::normalize_text;
use crate::model::{DutyRate, RateRecord, RateTable};
use crate::rate_text::translate_rate;

pub const DEFAULT_SOURCE_URL: &str = "https://www.lex.uz/uz/docs/7533457";

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const DEFAULT_TABLE_MARKERS: &[&str] = &[
    "ТИФ ТНнинг 2022 йилги таҳрири",
    "Импорт божхона божи ставкаси",
];

#[derive(Clone, Debug)]
pub struct FetcherConfig {
    /// Default rate page, used when a request does not name one
    pub source_url: String,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub connect_timeout: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Bound on the whole fetch: every attempt of every page
    pub fetch_timeout: Duration,
    pub max_pages: usize,
    /// The portal has served incomplete certificate chains; off unless asked for.
    pub accept_invalid_certs: bool,
    pub referer: Option<String>,
    /// Texts that must all appear in a table for it to be read as the rate table
    pub table_markers: Vec<String>,
    /// CSS selector for the link to the next page of the table
    pub next_page_selector: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(5_000),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(20),
            fetch_timeout: Duration::from_secs(120),
            max_pages: 20,
            accept_invalid_certs: false,
            referer: Some("https://lex.uz/".to_string()),
            table_markers: DEFAULT_TABLE_MARKERS.iter().map(|m| m.to_string()).collect(),
            next_page_selector: r#"a[rel="next"]"#.to_string(),
        }
    }
}

impl FetcherConfig {
    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// - `DUTY_RATES_URL`: default rate page
    /// - `RATES_MAX_ATTEMPTS`, `RATES_RETRY_INITIAL_MS`, `RATES_RETRY_MAX_MS`
    /// - `RATES_CONNECT_TIMEOUT_SECS`, `RATES_REQUEST_TIMEOUT_SECS`, `RATES_FETCH_TIMEOUT_SECS`
    /// - `RATES_MAX_PAGES`
    /// - `RATES_ACCEPT_INVALID_CERTS`: `true`/`1` to skip certificate verification
    /// - `RATES_REFERER`: empty string disables the header
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let source_url = std::env::var("DUTY_RATES_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.source_url);

        let referer = match std::env::var("RATES_REFERER") {
            Ok(s) if s.trim().is_empty() => None,
            Ok(s) => Some(s),
            Err(_) => defaults.referer,
        };

        let accept_invalid_certs = std::env::var("RATES_ACCEPT_INVALID_CERTS")
            .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.accept_invalid_certs);

        Self {
            source_url,
            max_attempts: env_parse("RATES_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            initial_backoff: env_parse("RATES_RETRY_INITIAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: env_parse("RATES_RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            connect_timeout: env_parse("RATES_CONNECT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: env_parse("RATES_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            fetch_timeout: env_parse("RATES_FETCH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch_timeout),
            max_pages: env_parse("RATES_MAX_PAGES").unwrap_or(defaults.max_pages),
            accept_invalid_certs,
            referer,
            table_markers: defaults.table_markers,
            next_page_selector: defaults.next_page_selector,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    raw.trim()
        .parse::<T>()
        .inspect_err(|_| warn!(var = name, value = %raw, "ignoring unparseable value, using default"))
        .ok()
}

/// What the page parser needs to know about the source layout.
#[derive(Debug, Clone)]
pub struct PageLayout {
    pub table_markers: Vec<String>,
    pub next_page: Option<Selector>,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            table_markers: DEFAULT_TABLE_MARKERS.iter().map(|m| m.to_string()).collect(),
            next_page: Selector::parse(r#"a[rel="next"]"#).ok(),
        }
    }
}

/// One parsed rate row: the code as listed, its key and the translated rate.
#[derive(Debug, Clone, PartialEq)]
pub struct RateEntry {
    pub source_code: String,
    pub key: CodeKey,
    pub rate: DutyRate,
}

/// Result of parsing a single page.
#[derive(Debug, Clone)]
pub struct RatePage {
    pub entries: Vec<RateEntry>,
    pub next_page: Option<Url>,
}

pub struct RateFetcher {
    config: FetcherConfig,
    layout: PageLayout,
    http: reqwest::Client,
}

impl RateFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("uz,ru;q=0.9,en;q=0.8"));
        if let Some(referer) = &config.referer {
            let value = HeaderValue::from_str(referer)
                .map_err(|e| FetchError::Config(format!("invalid referer '{referer}': {e}")))?;
            headers.insert(REFERER, value);
        }

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(FetchError::Client)?;

        let next_page = Selector::parse(&config.next_page_selector).map_err(|e| {
            FetchError::Config(format!(
                "invalid next-page selector '{}': {e}",
                config.next_page_selector
            ))
        })?;
        let layout = PageLayout {
            table_markers: config.table_markers.clone(),
            next_page: Some(next_page),
        };

        Ok(Self {
            config,
            layout,
            http,
        })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetch the complete rate table starting at `source_url`.
    pub async fn fetch(&self, source_url: &str) -> Result<RateTable, FetchError> {
        let url = parse_source_url(source_url)?;
        let limit = self.config.fetch_timeout;
        tokio::time::timeout(limit, self.fetch_pages(url))
            .await
            .map_err(|_| FetchError::Timeout(limit))?
    }

    async fn fetch_pages(&self, first: Url) -> Result<RateTable, FetchError> {
        let retrieved_at = Utc::now();
        let source_url = first.to_string();
        let mut table = RateTable::new();
        let mut visited: HashSet<Url> = HashSet::new();
        let mut next = Some(first);

        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                warn!(url = %url, "next-page link points to a page already fetched, stopping");
                break;
            }
            if visited.len() > self.config.max_pages {
                return Err(FetchError::TooManyPages {
                    max_pages: self.config.max_pages,
                });
            }

            let html = self.get_page(&url).await?;
            let page = parse_rate_page(&html, &url, &self.layout)?;
            info!(
                url = %url,
                entries = page.entries.len(),
                has_next = page.next_page.is_some(),
                "parsed rate page"
            );

            for entry in page.entries {
                table.insert(RateRecord {
                    key: entry.key,
                    source_code: entry.source_code,
                    rate: entry.rate,
                    source_url: source_url.clone(),
                    retrieved_at,
                });
            }
            table.record_page(url.as_str());
            next = page.next_page;
        }

        if table.is_empty() {
            return Err(FetchError::UnexpectedStructure {
                url: source_url,
                reason: "rate table contains no usable rows".to_string(),
            });
        }

        info!(
            pages = table.pages().len(),
            rates = table.len(),
            "duty rate table fetched"
        );
        Ok(table)
    }

    async fn get_page(&self, url: &Url) -> Result<String, FetchError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            debug!(url = %url, attempt, max_attempts, "requesting rate page");
            let err = match self.try_get(url).await {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(match err {
                    AttemptError::Status(status) => FetchError::Status {
                        url: url.to_string(),
                        status,
                    },
                    AttemptError::Request(e) => FetchError::Unreachable {
                        attempts: attempt,
                        last_error: e.to_string(),
                    },
                });
            }
            if attempt >= max_attempts {
                return Err(FetchError::Unreachable {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay = backoff.next_delay();
            warn!(
                url = %url,
                attempt,
                delay_ms = delay.as_millis(),
                error = %err,
                "rate page request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn try_get(&self, url: &Url) -> Result<String, AttemptError> {
        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(AttemptError::Request)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AttemptError::Status(status));
        }
        resp.text().await.map_err(AttemptError::Request)
    }
}

#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("request failed: {0}")]
    Request(reqwest::Error),

    #[error("status {0}")]
    Status(StatusCode),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Request(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode()
            }
            AttemptError::Status(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
        }
    }
}

fn parse_source_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(FetchError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Retry delays for one page: doubling from `initial` up to `max`, each with up to a
/// quarter of itself added on top.
struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let base = self.next;
        self.next = base.saturating_mul(2).min(self.max);
        base + spread(base / 4)
    }
}

fn spread(limit: Duration) -> Duration {
    let limit_ms = limit.as_millis() as u64;
    if limit_ms == 0 {
        return Duration::ZERO;
    }
    let nanos = u64::from(Utc::now().timestamp_subsec_nanos());
    Duration::from_millis(nanos % (limit_ms + 1))
}

/// Parse one page of the rate source.
///
/// Reads every table containing all layout markers. Within those tables, rows of `td`
/// cells are `[code, name, rate]` or `[code, rate]`; a code cell may list several codes
/// separated by commas. Codes that do not normalize are skipped.
pub fn parse_rate_page(html: &str, page_url: &Url, layout: &PageLayout) -> Result<RatePage, FetchError> {
    let document = Html::parse_document(html);
    let table_sel = Selector::parse("table").expect("valid selector");
    let row_sel = Selector::parse("tr").expect("valid selector");
    let cell_sel = Selector::parse("th, td").expect("valid selector");
    let data_sel = Selector::parse("td").expect("valid selector");

    let mut entries = Vec::new();
    let mut found_table = false;

    for table in document.select(&table_sel) {
        let table_text = table
            .select(&cell_sel)
            .map(element_text)
            .collect::<Vec<_>>()
            .join(" ");
        if !layout.table_markers.iter().all(|m| table_text.contains(m.as_str())) {
            continue;
        }
        found_table = true;

        for row in table.select(&row_sel) {
            let cells: Vec<String> = row.select(&data_sel).map(element_text).collect();
            let (code_cell, rate_cell) = match cells.len() {
                0 | 1 => continue,
                2 => (&cells[0], &cells[1]),
                _ => (&cells[0], &cells[2]),
            };

            if layout.table_markers.iter().any(|m| code_cell.contains(m.as_str())) {
                continue;
            }
            if rate_cell.is_empty() {
                continue;
            }

            let rate = DutyRate::new(translate_rate(rate_cell));
            for part in code_cell.split(',') {
                let source_code = part.trim().to_string();
                match CodeKey::parse(&source_code) {
                    Ok(key) => entries.push(RateEntry {
                        source_code,
                        key,
                        rate: rate.clone(),
                    }),
                    Err(e) => debug!(code = %source_code, error = %e, "skipping rate row code"),
                }
            }
        }
    }

    if !found_table {
        return Err(FetchError::UnexpectedStructure {
            url: page_url.to_string(),
            reason: "no table with the expected rate header".to_string(),
        });
    }

    let next_page = layout.next_page.as_ref().and_then(|sel| {
        let href = document.select(sel).next()?.value().attr("href")?;
        let resolved = page_url.join(href.trim()).ok()?;
        let same_page = resolved.as_str().split('#').next() == page_url.as_str().split('#').next();
        (matches!(resolved.scheme(), "http" | "https") && !same_page).then_some(resolved)
    });

    Ok(RatePage { entries, next_page })
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<String>())
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use axum::http::StatusCode as AxumStatus;
    use axum::response::Html as AxumHtml;
    use axum::routing::get;
    use axum::Router;

    use super::fixture::rate_page;
    use super::*;

    fn test_config() -> FetcherConfig {
        FetcherConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            request_timeout: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(10),
            referer: None,
            ..FetcherConfig::default()
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn page_url() -> Url {
        Url::parse("https://lex.example/uz/docs/1").unwrap()
    }

    #[test]
    fn test_parse_rate_page() {
        let html = rate_page(
            &[
                ("0101 21 000 0", "Зотли", "5"),
                ("0102, 0103 10", "Қорамол", "10*"),
                ("8703 21", "Автомобиллар", "70 + 3 АҚШ доллари ҳар бир куб. см. учун"),
                ("Бошқалар", "-", "15"),
                ("0104", "Қўйлар", ""),
            ],
            None,
        );
        let page = parse_rate_page(&html, &page_url(), &PageLayout::default()).unwrap();
        let keys: Vec<&str> = page.entries.iter().map(|e| e.key.as_str()).collect();

        assert_eq!(keys, vec!["0101210000", "0102", "010310", "870321"]);
        assert_eq!(page.entries[0].source_code, "0101 21 000 0");
        assert_eq!(page.entries[1].rate.as_str(), "10*");
        assert_eq!(page.entries[2].rate.as_str(), "10*");
        assert_eq!(page.entries[3].rate.as_str(), "70 + 3 долл. США за куб. см.");
        assert!(page.next_page.is_none());
    }

    #[test]
    fn test_two_column_rows() {
        let html = "<table><tr><th>ТИФ ТНнинг 2022 йилги таҳрири</th>\
                    <th>Импорт божхона божи ставкаси</th></tr>\
                    <tr><td>9401</td><td>20</td></tr></table>";
        let page = parse_rate_page(html, &page_url(), &PageLayout::default()).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].key.as_str(), "9401");
        assert_eq!(page.entries[0].rate.as_str(), "20");
    }

    #[test]
    fn test_page_without_rate_table() {
        let html = "<html><body><table><tr><td>Мундарижа</td></tr></table></body></html>";
        let err = parse_rate_page(html, &page_url(), &PageLayout::default()).unwrap_err();
        assert!(matches!(err, FetchError::UnexpectedStructure { .. }));
    }

    #[test]
    fn test_next_page_resolved_relative() {
        let html = rate_page(&[("0101", "Отлар", "5")], Some("/uz/docs/1?page=2"));
        let page = parse_rate_page(&html, &page_url(), &PageLayout::default()).unwrap();
        assert_eq!(
            page.next_page.unwrap().as_str(),
            "https://lex.example/uz/docs/1?page=2"
        );

        let self_link = rate_page(&[("0101", "Отлар", "5")], Some("#top"));
        let page = parse_rate_page(&self_link, &page_url(), &PageLayout::default()).unwrap();
        assert!(page.next_page.is_none());
    }

    #[test]
    fn test_backoff_doubles() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        let first = backoff.next_delay();
        let second = backoff.next_delay();
        assert!((100..=125).contains(&first.as_millis()), "{first:?}");
        assert!((200..=250).contains(&second.as_millis()), "{second:?}");
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1_000));
        let last = (0..10).map(|_| backoff.next_delay()).last().unwrap();
        assert!((1_000..=1_250).contains(&last.as_millis()), "{last:?}");

        let mut over = Backoff::new(Duration::from_secs(5), Duration::from_millis(1_000));
        assert!(over.next_delay() <= Duration::from_millis(1_250));
    }

    #[test]
    fn test_rejects_non_http_source() {
        assert!(matches!(
            parse_source_url("ftp://lex.uz/docs"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_source_url("not a url"),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_aggregates_pages_last_seen_wins() {
        let router = Router::new()
            .route(
                "/rates",
                get(|| async {
                    AxumHtml(rate_page(
                        &[("0101", "Отлар", "5"), ("0102", "Қорамол", "10")],
                        Some("/rates/2"),
                    ))
                }),
            )
            .route(
                "/rates/2",
                get(|| async {
                    AxumHtml(rate_page(&[("0102", "Қорамол", "12"), ("0201", "Гўшт", "15")], None))
                }),
            );
        let base = serve(router).await;

        let fetcher = RateFetcher::new(test_config()).unwrap();
        let table = fetcher.fetch(&format!("{base}/rates")).await.unwrap();

        assert_eq!(table.pages().len(), 2);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get("0101").unwrap().rate.as_str(), "5");
        assert_eq!(table.get("0102").unwrap().rate.as_str(), "12");
        assert_eq!(table.get("0201").unwrap().source_url, format!("{base}/rates"));
    }

    #[tokio::test]
    async fn test_fetch_fails_whole_when_later_page_errors() {
        let router = Router::new()
            .route(
                "/rates",
                get(|| async { AxumHtml(rate_page(&[("0101", "Отлар", "5")], Some("/rates/2"))) }),
            )
            .route(
                "/rates/2",
                get(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, AxumHtml(String::new())) }),
            );
        let base = serve(router).await;

        let fetcher = RateFetcher::new(test_config()).unwrap();
        let result = fetcher.fetch(&format!("{base}/rates")).await;

        assert!(
            matches!(result, Err(FetchError::Unreachable { attempts: 3, .. })),
            "{result:?}"
        );
    }

    #[tokio::test]
    async fn test_fetch_fails_whole_when_later_page_lacks_table() {
        let router = Router::new()
            .route(
                "/rates",
                get(|| async { AxumHtml(rate_page(&[("0101", "Отлар", "5")], Some("/rates/2"))) }),
            )
            .route(
                "/rates/2",
                get(|| async { AxumHtml("<html><body><p>Техник ишлар</p></body></html>") }),
            );
        let base = serve(router).await;

        let fetcher = RateFetcher::new(test_config()).unwrap();
        let result = fetcher.fetch(&format!("{base}/rates")).await;

        match result {
            Err(FetchError::UnexpectedStructure { url, .. }) => assert!(url.ends_with("/rates/2"), "{url}"),
            other => panic!("expected UnexpectedStructure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_retries_transient_status() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/rates",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (AxumStatus::SERVICE_UNAVAILABLE, AxumHtml(String::new()))
                    } else {
                        (AxumStatus::OK, AxumHtml(rate_page(&[("0101", "Отлар", "5")], None)))
                    }
                }
            }),
        );
        let base = serve(router).await;

        let fetcher = RateFetcher::new(test_config()).unwrap();
        let table = fetcher.fetch(&format!("{base}/rates")).await.unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_not_found() {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().route(
            "/rates",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AxumStatus::NOT_FOUND
                }
            }),
        );
        let base = serve(router).await;

        let fetcher = RateFetcher::new(test_config()).unwrap();
        let err = fetcher.fetch(&format!("{base}/rates")).await.unwrap_err();

        assert!(matches!(err, FetchError::Status { status, .. } if status == StatusCode::NOT_FOUND));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_unreachable_after_retries() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = RateFetcher::new(test_config()).unwrap();
        let err = fetcher.fetch(&format!("http://{addr}/rates")).await.unwrap_err();

        assert!(matches!(err, FetchError::Unreachable { attempts: 3, .. }), "{err}");
    }

    #[tokio::test]
    async fn test_fetch_overall_timeout() {
        let router = Router::new().route(
            "/rates",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                AxumHtml(rate_page(&[("0101", "Отлар", "5")], None))
            }),
        );
        let base = serve(router).await;

        let config = FetcherConfig {
            fetch_timeout: Duration::from_millis(200),
            ..test_config()
        };
        let fetcher = RateFetcher::new(config).unwrap();
        let err = fetcher.fetch(&format!("{base}/rates")).await.unwrap_err();

        assert!(matches!(err, FetchError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_fetch_page_limit() {
        let router = Router::new()
            .route("/a", get(|| async { AxumHtml(rate_page(&[("0101", "x", "5")], Some("/b"))) }))
            .route("/b", get(|| async { AxumHtml(rate_page(&[("0102", "y", "5")], Some("/c"))) }))
            .route("/c", get(|| async { AxumHtml(rate_page(&[("0103", "z", "5")], None)) }));
        let base = serve(router).await;

        let config = FetcherConfig {
            max_pages: 2,
            ..test_config()
        };
        let fetcher = RateFetcher::new(config).unwrap();
        let err = fetcher.fetch(&format!("{base}/a")).await.unwrap_err();

        assert!(matches!(err, FetchError::TooManyPages { max_pages: 2 }));
    }

    #[tokio::test]
    async fn test_fetch_wrong_page_structure() {
        let router = Router::new().route(
            "/rates",
            get(|| async { AxumHtml("<html><body><p>Ҳужжат топилмади</p></body></html>") }),
        );
        let base = serve(router).await;

        let fetcher = RateFetcher::new(test_config()).unwrap();
        let err = fetcher.fetch(&format!("{base}/rates")).await.unwrap_err();

        assert!(matches!(err, FetchError::UnexpectedStructure { .. }));
    }
}
