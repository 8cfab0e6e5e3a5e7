use std::net::SocketAddr;

use tnved_core::fetch::FetcherConfig;

use crate::error::AppError;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Server configuration loaded explicitly from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Request body limit for the upload endpoint.
    pub max_upload_bytes: usize,
    pub fetcher: FetcherConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional:
    /// - `BIND_ADDR`: listen address (default `127.0.0.1:8000`)
    /// - `MAX_UPLOAD_BYTES`: upload size limit in bytes (default 20 MiB)
    /// - `DUTY_RATES_URL` and `RATES_*`: see [`FetcherConfig::from_env`]
    pub fn from_env() -> Result<Self, AppError> {
        let bind_addr = std::env::var("BIND_ADDR")
            .unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("BIND_ADDR is not a socket address: {e}")))?;

        let max_upload_bytes = match std::env::var("MAX_UPLOAD_BYTES") {
            Ok(raw) => raw.trim().parse::<usize>().map_err(|e| {
                AppError::Config(format!("MAX_UPLOAD_BYTES must be a byte count: {e}"))
            })?,
            Err(_) => DEFAULT_MAX_UPLOAD_BYTES,
        };
        if max_upload_bytes == 0 {
            return Err(AppError::Config(
                "MAX_UPLOAD_BYTES must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            max_upload_bytes,
            fetcher: FetcherConfig::from_env(),
        })
    }
}
