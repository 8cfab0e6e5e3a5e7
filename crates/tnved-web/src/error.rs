use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tnved_core::error::{PipelineError, Stage};
use tracing::warn;

use crate::server::FormPage;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid upload: {0}")]
    Upload(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upload(_) => StatusCode::BAD_REQUEST,
            AppError::Pipeline(e) => match e {
                PipelineError::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
                PipelineError::Fetch(_) => StatusCode::BAD_GATEWAY,
                PipelineError::FetchTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                PipelineError::Render(_) | PipelineError::Task(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// One-line message for the form, naming the stage that failed.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Config(_) => "Сервис настроен неверно.".to_string(),
            AppError::Upload(reason) => format!("Файл не принят: {reason}."),
            AppError::Pipeline(e) => {
                let stage = match e.stage() {
                    Stage::Extracting => "чтение документа",
                    Stage::Fetching => "загрузка ставок пошлин",
                    Stage::Merging => "сопоставление кодов",
                    Stage::Rendering | Stage::Done | Stage::Failed => "формирование отчёта",
                };
                format!("Ошибка на этапе «{stage}»: {e}")
            }
        }
    }

    /// The upload form again, with the error above it and `source_url` left in the
    /// address field.
    pub fn into_form(self, source_url: &str) -> Response {
        let status = self.status();
        warn!(status = status.as_u16(), error = %self, "request failed");
        let page = FormPage {
            source_url: source_url.to_string(),
            message: Some(self.user_message()),
        };
        (status, page).into_response()
    }
}
