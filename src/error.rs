use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
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

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Cannot union tables with different columns: {left:?} vs {right:?}")]
    SchemaMismatch {
        left: Vec<String>,
        right: Vec<String>,
    },

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

pub type Result<T> = std::result::Result<T, EtlError>;
