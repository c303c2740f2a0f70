//! Error handling for the HTTP surface.
//!
//! Every failure leaves the server as a structured `ErrorResponse` with a machine-readable
//! code and the matching HTTP status.

use std::collections::HashMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use backtest_engine::BacktestError;
use market_data::MarketDataError;
use serde::{Deserialize, Serialize};
use strategy_engine::ValidationResult;
use thiserror::Error;
use tracing::{debug, error};

use crate::service::ServiceError;

/// Main API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Strategy code was rejected by the validator
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    /// Market data could not be loaded
    #[error("Market data error: {message}")]
    MarketData { message: String },

    /// Malformed or incomplete request
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    /// Not found errors
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    /// Internal server errors
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ApiError {
    pub fn validation(result: ValidationResult) -> Self {
        Self::Validation {
            message: format!(
                "strategy code rejected with {} error(s)",
                result.errors.len()
            ),
            errors: result.errors,
            warnings: result.warnings,
        }
    }

    pub fn market_data<S: Into<String>>(message: S) -> Self {
        Self::MarketData {
            message: message.into(),
        }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the appropriate HTTP status code for the error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::MarketData { .. } | ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::MarketData { .. } => "MARKET_DATA_ERROR",
            ApiError::BadRequest { .. } => "BAD_REQUEST",
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    pub fn log_error(&self) {
        match self {
            ApiError::Internal { message } => error!("Internal server error: {}", message),
            // Client errors are logged at debug level
            _ => debug!("Client error: {}", self),
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        self.log_error();

        let mut details = HashMap::new();
        if let ApiError::Validation {
            errors, warnings, ..
        } = self
        {
            details.insert("errors".to_string(), serde_json::json!(errors));
            details.insert("warnings".to_string(), serde_json::json!(warnings));
        }

        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details,
            },
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Structured error response for API clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details
    pub details: HashMap<String, serde_json::Value>,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = self.to_error_response();
        (status_code, Json(error_response)).into_response()
    }
}

impl From<BacktestError> for ApiError {
    fn from(err: BacktestError) -> Self {
        match err {
            BacktestError::Validation(result) => ApiError::validation(result),
            BacktestError::EmptyMarketData => ApiError::market_data(err.to_string()),
            BacktestError::Worker(message) => ApiError::internal(message),
        }
    }
}

impl From<MarketDataError> for ApiError {
    fn from(err: MarketDataError) -> Self {
        match err {
            MarketDataError::Io(_) => ApiError::internal(err.to_string()),
            MarketDataError::NotFound { .. } => ApiError::not_found(err.to_string()),
            _ => ApiError::market_data(err.to_string()),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NoAssets => ApiError::bad_request(err.to_string()),
            ServiceError::MarketData(inner) => inner.into(),
            ServiceError::Backtest(inner) => inner.into(),
        }
    }
}
