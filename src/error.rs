use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{venue} returned status {status} for {url}")]
    Status {
        venue: &'static str,
        status: u16,
        url: String,
    },

    #[error("{venue} rate limit not lifted after {attempts} attempts")]
    RateLimited { venue: &'static str, attempts: u32 },

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Execution error: {0}")]
    Execution(String),
}

pub type Result<T> = std::result::Result<T, Error>;
