use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    #[error("address could not be geocoded: {0}")]
    PermanentGeocode(String),

    #[error("source table cannot be adapted: {0}")]
    SchemaMismatch(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error: {message}")]
    Api { message: String },

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

impl PipelineError {
    /// Whether a retry of the same operation could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::TransientNetwork(_) => true,
            PipelineError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
