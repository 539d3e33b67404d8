use thiserror::Error;

/// Core errors shared across the engine and control plane.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("DynamoDB error: {0}")]
    Dynamo(#[from] aws_sdk_dynamodb::Error),

    #[error("DynamoDB SDK error: {0}")]
    DynamoSdk(Box<dyn std::error::Error + Send + Sync>),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_dynamo::Error),

    #[error("Invalid monitor config: {0}")]
    Config(#[from] crate::model::ConfigError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
