use thiserror::Error;

#[derive(Error, Debug)]
pub enum PassgateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("Mapping table error: {0}")]
    Mapping(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Passport error: {0}")]
    Passport(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PassgateError>;
