use std::error::Error;

use poem::error::ResponseError;
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum LabgateError {
    #[error("database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),
    #[error("user {0} not found")]
    UserNotFound(String),
    #[error("token not found: {0}")]
    TokenNotFound(Uuid),
    #[error("deserialization failed: {0}")]
    DeserializeJson(#[from] serde_json::Error),
    #[error("invalid password hash: {0}")]
    PasswordHash(String),
    #[error("inconsistent state error")]
    InconsistentState,
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl ResponseError for LabgateError {
    fn status(&self) -> poem::http::StatusCode {
        poem::http::StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl LabgateError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}
