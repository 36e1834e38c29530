//! Error handling.

use axum::{
    extract::rejection::QueryRejection,
    http::header,
    http::header::InvalidHeaderValue,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tracing::{event, Level};

/// Metric value API error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum RefError {
    /// Error writing a CSV record
    #[error("failed to write CSV output")]
    CsvWrite(#[from] csv::Error),

    /// Unknown diagnostic, or a diagnostic of a provider outside the allow-list
    #[error("diagnostic {provider_slug}/{diagnostic_slug} not found")]
    DiagnosticNotFound {
        provider_slug: String,
        diagnostic_slug: String,
    },

    /// Unknown execution
    #[error("execution {execution_id} not found")]
    ExecutionNotFound { execution_id: i64 },

    /// Invalid dimension name in the configured vocabulary
    #[error("invalid dimension {name:?}: {reason}")]
    InvalidDimension { name: String, reason: &'static str },

    /// Response header could not be built
    #[error("invalid response header value")]
    InvalidHeader(#[from] InvalidHeaderValue),

    /// Malformed comma-separated id list
    #[error("invalid id in list")]
    InvalidIdList(#[from] std::num::ParseIntError),

    /// Invalid outlier detection configuration
    #[error("outlier detection configuration is not valid")]
    InvalidOutlierConfig(#[source] validator::ValidationErrors),

    /// Malformed source filters for a comparison
    #[error("invalid source_filters: {reason}")]
    InvalidSourceFilters { reason: String },

    /// Error deserialising query parameters
    #[error("query parameters are not valid")]
    QueryRejection(#[from] QueryRejection),

    /// Error validating query parameters
    #[error("query parameters are not valid")]
    QueryValidation(#[from] validator::ValidationErrors),

    /// Error parsing a metric value store snapshot
    #[error("failed to parse metric value store snapshot")]
    StoreFormat(#[source] serde_json::Error),

    /// Metric value store snapshot refers to missing records
    #[error("metric value store is inconsistent: {reason}")]
    StoreIntegrity { reason: String },

    /// Error reading a metric value store snapshot
    #[error("failed to read metric value store snapshot")]
    StoreIo(#[from] std::io::Error),
}

impl IntoResponse for RefError {
    /// Convert from a `RefError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    /// Return a new ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `status`: HTTP status of the response
    /// * `error`: The error that occurred. This will be formatted into a suitable `ErrorBody`
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 404 not found ErrorResponse
    fn not_found<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    /// Return a 500 internal server error ErrorResponse
    fn internal_server_error<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

impl From<RefError> for ErrorResponse {
    /// Convert from a `RefError` into an `ErrorResponse`.
    fn from(error: RefError) -> Self {
        let response = match &error {
            // Bad request
            RefError::InvalidIdList(_)
            | RefError::InvalidSourceFilters { reason: _ }
            | RefError::QueryRejection(_)
            | RefError::QueryValidation(_) => Self::bad_request(&error),

            // Not found
            RefError::DiagnosticNotFound {
                provider_slug: _,
                diagnostic_slug: _,
            }
            | RefError::ExecutionNotFound { execution_id: _ } => Self::not_found(&error),

            // Internal server error
            RefError::CsvWrite(_)
            | RefError::InvalidDimension { name: _, reason: _ }
            | RefError::InvalidHeader(_)
            | RefError::InvalidOutlierConfig(_)
            | RefError::StoreFormat(_)
            | RefError::StoreIntegrity { reason: _ }
            | RefError::StoreIo(_) => Self::internal_server_error(&error),
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hyper::HeaderMap;

    // Jump through the hoops to get the body as a string.
    async fn body_string(response: Response) -> String {
        String::from_utf8(
            hyper::body::to_bytes(response.into_body())
                .await
                .unwrap()
                .to_vec(),
        )
        .unwrap()
    }

    async fn test_ref_error(
        error: RefError,
        status: StatusCode,
        message: &str,
        caused_by: Option<Vec<&'static str>>,
    ) {
        let response = error.into_response();
        assert_eq!(status, response.status());
        let mut headers = HeaderMap::new();
        headers.insert(&header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(headers, *response.headers());
        let error_response: ErrorResponse =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(message.to_string(), error_response.error.message);
        // Map Vec items from str to String
        let caused_by = caused_by.map(|cb| cb.iter().map(|s| s.to_string()).collect());
        assert_eq!(caused_by, error_response.error.caused_by);
    }

    #[tokio::test]
    async fn invalid_header() {
        let header_error = header::HeaderValue::from_str("\n").unwrap_err();
        let error = RefError::InvalidHeader(header_error);
        let message = "invalid response header value";
        let caused_by = Some(vec!["failed to parse header value"]);
        test_ref_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }

    #[tokio::test]
    async fn diagnostic_not_found() {
        let error = RefError::DiagnosticNotFound {
            provider_slug: "pmp".to_string(),
            diagnostic_slug: "enso".to_string(),
        };
        let message = "diagnostic pmp/enso not found";
        test_ref_error(error, StatusCode::NOT_FOUND, message, None).await;
    }

    #[tokio::test]
    async fn execution_not_found() {
        let error = RefError::ExecutionNotFound { execution_id: 42 };
        let message = "execution 42 not found";
        test_ref_error(error, StatusCode::NOT_FOUND, message, None).await;
    }

    #[tokio::test]
    async fn invalid_id_list() {
        let error = RefError::InvalidIdList("a".parse::<i64>().unwrap_err());
        let message = "invalid id in list";
        let caused_by = Some(vec!["invalid digit found in string"]);
        test_ref_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn invalid_source_filters() {
        let error = RefError::InvalidSourceFilters {
            reason: "must not be empty".to_string(),
        };
        let message = "invalid source_filters: must not be empty";
        test_ref_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn query_validation() {
        let mut validation_errors = validator::ValidationErrors::new();
        let validation_error = validator::ValidationError::new("foo");
        validation_errors.add("bar", validation_error);
        let error = RefError::QueryValidation(validation_errors);
        let message = "query parameters are not valid";
        let caused_by = Some(vec!["bar: Validation error: foo [{}]"]);
        test_ref_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn invalid_dimension() {
        let error = RefError::InvalidDimension {
            name: "Source ID".to_string(),
            reason: "must match [a-z0-9_]+",
        };
        let message = "invalid dimension \"Source ID\": must match [a-z0-9_]+";
        test_ref_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, None).await;
    }

    #[tokio::test]
    async fn store_format_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = RefError::StoreFormat(json_error);
        let message = "failed to parse metric value store snapshot";
        let caused_by = Some(vec!["EOF while parsing an object at line 1 column 1"]);
        test_ref_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }

    #[tokio::test]
    async fn store_io_error() {
        let error = RefError::StoreIo(std::io::Error::from(std::io::ErrorKind::NotFound));
        let message = "failed to read metric value store snapshot";
        let caused_by = Some(vec!["entity not found"]);
        test_ref_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }
}
