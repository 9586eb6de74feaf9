use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{
    cache::CacheError, config::LoadError, infra::error::InfraError, infra::store::StoreError,
};

/// Diagnostics attached to an error response for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        Self::Infra(InfraError::Store(error))
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit code for the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) | AppError::Validation(_) => 2,
            AppError::Infra(InfraError::Store(_)) | AppError::Cache(CacheError::Store(_)) => 3,
            AppError::Infra(_) | AppError::Cache(_) | AppError::Unexpected(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_collects_source_chain() {
        let error = AppError::from(StoreError::rejected("GET", "connection refused"));
        let report = ErrorReport::from_error("test", StatusCode::SERVICE_UNAVAILABLE, &error);

        assert_eq!(report.messages[0], "store error: store rejected `GET`: connection refused");
        assert_eq!(report.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn exit_codes_separate_usage_from_store_failures() {
        assert_eq!(AppError::validation("no tags").exit_code(), 2);
        assert_eq!(
            AppError::from(StoreError::rejected("INCR", "down")).exit_code(),
            3
        );
        assert_eq!(AppError::unexpected("boom").exit_code(), 1);
    }
}
