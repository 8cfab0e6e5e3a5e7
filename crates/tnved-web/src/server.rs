/// HTTP front end: upload form, processing endpoint and health check.
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tnved_core::model::Report;
use tnved_core::pipeline::Pipeline;
use tnved_core::report::CONTENT_TYPE as XLSX_CONTENT_TYPE;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::AppError;

const SUMMARY_HEADER: &str = "x-report-summary";

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }

    fn default_url(&self) -> &str {
        &self.pipeline.fetcher().config().source_url
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route(
            "/",
            get(form)
                .post(upload)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// The upload page. `message` is shown above the form after a failed attempt.
pub struct FormPage {
    pub source_url: String,
    pub message: Option<String>,
}

impl IntoResponse for FormPage {
    fn into_response(self) -> Response {
        let message = self
            .message
            .map(|m| format!(r#"<p class="error">{}</p>"#, escape_html(&m)))
            .unwrap_or_default();
        Html(format!(
            r#"<!DOCTYPE html>
<html lang="ru">
<head>
<meta charset="utf-8">
<title>Ставки пошлин ТН ВЭД</title>
<style>
body {{ font-family: sans-serif; max-width: 40rem; margin: 3rem auto; }}
label {{ display: block; margin-top: 1rem; }}
input[type=url] {{ width: 100%; }}
.error {{ color: #b00020; }}
</style>
</head>
<body>
<h1>Ставки пошлин ТН ВЭД</h1>
{message}
<form method="post" action="/" enctype="multipart/form-data">
<label>Документ (.docx)
<input type="file" name="file" accept=".docx" required>
</label>
<label>Страница ставок (пусто: адрес по умолчанию)
<input type="url" name="url" value="{url}">
</label>
<p><button type="submit">Сформировать отчёт</button></p>
</form>
</body>
</html>
"#,
            url = escape_html(&self.source_url),
        ))
        .into_response()
    }
}

async fn form(State(state): State<AppState>) -> FormPage {
    FormPage {
        source_url: state.default_url().to_string(),
        message: None,
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// Fields of the upload form.
struct Upload {
    file_name: String,
    document: Vec<u8>,
    source_url: Option<String>,
}

async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut source_url = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Upload(format!("не удалось прочитать форму ({e})")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Upload(format!("не удалось прочитать файл ({e})")))?;
                file = Some((file_name, data.to_vec()));
            }
            "url" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Upload(format!("не удалось прочитать адрес ({e})")))?;
                source_url = Some(text.trim().to_string()).filter(|s| !s.is_empty());
            }
            other => warn!(field = other, "ignoring unexpected form field"),
        }
    }

    let Some((file_name, document)) = file else {
        return Err(AppError::Upload("файл не выбран".to_string()));
    };
    if document.is_empty() {
        return Err(AppError::Upload("файл пуст".to_string()));
    }
    if !file_name.to_lowercase().ends_with(".docx") {
        return Err(AppError::Upload("принимаются только документы .docx".to_string()));
    }

    Ok(Upload {
        file_name,
        document,
        source_url,
    })
}

async fn upload(State(state): State<AppState>, multipart: Multipart) -> Response {
    let upload = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(e) => return e.into_form(state.default_url()),
    };
    info!(
        file = %upload.file_name,
        bytes = upload.document.len(),
        custom_url = upload.source_url.is_some(),
        "document uploaded"
    );

    let source_url = upload.source_url.as_deref();
    match state.pipeline.run(upload.document, source_url).await {
        Ok(report) => download(report),
        Err(e) => AppError::from(e).into_form(source_url.unwrap_or(state.default_url())),
    }
}

fn download(report: Report) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(XLSX_CONTENT_TYPE));
    if let Ok(value) = HeaderValue::from_str(&format!(
        r#"attachment; filename="{}""#,
        report.file_name
    )) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    // read by the page script to stop its spinner
    headers.insert(SET_COOKIE, HeaderValue::from_static("fileDownload=true; Max-Age=20; Path=/"));

    match serde_json::to_string(&report.summary)
        .map_err(|e| e.to_string())
        .and_then(|json| HeaderValue::from_str(&json).map_err(|e| e.to_string()))
    {
        Ok(value) => {
            headers.insert(SUMMARY_HEADER, value);
        }
        Err(e) => warn!(error = %e, "report summary not sent"),
    }

    (StatusCode::OK, headers, report.bytes).into_response()
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
