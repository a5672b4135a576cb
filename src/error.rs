//! Error handling and JSON error responses for the gateway

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Header carrying the machine-readable error code
pub const X_GATEWAY_ERROR: &str = "x-gateway-error";

/// Error codes for responses produced by the gateway itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorCode {
    /// A required query parameter is absent or empty
    MissingParameter,
    /// No route for the requested path
    NotFound,
    /// Route exists but does not accept the request method
    MethodNotAllowed,
    /// The music service could not be reached
    UpstreamUnavailable,
    /// The music service did not answer in time
    UpstreamTimeout,
}

impl GatewayErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayErrorCode::MissingParameter => StatusCode::BAD_REQUEST,
            GatewayErrorCode::NotFound => StatusCode::NOT_FOUND,
            GatewayErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GatewayErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            GatewayErrorCode::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Get the error code as a string for the X-Gateway-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GatewayErrorCode::MissingParameter => "MISSING_PARAMETER",
            GatewayErrorCode::NotFound => "NOT_FOUND",
            GatewayErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            GatewayErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            GatewayErrorCode::UpstreamTimeout => "UPSTREAM_TIMEOUT",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: GatewayErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Gateway-Error header
pub fn json_error_response(code: GatewayErrorCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    let error = ErrorResponse::new(code, message);
    let body = error.to_json();

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = code.status_code();
    let headers = response.headers_mut();
    headers.insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json; charset=utf-8"),
    );
    headers.insert(
        X_GATEWAY_ERROR,
        hyper::header::HeaderValue::from_static(code.as_header_value()),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(
            GatewayErrorCode::MissingParameter.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(GatewayErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayErrorCode::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            GatewayErrorCode::UpstreamUnavailable.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayErrorCode::UpstreamTimeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_error_response_json() {
        let error = ErrorResponse::new(GatewayErrorCode::MissingParameter, "uid is required");
        let json = error.to_json();

        assert!(json.contains("\"code\":\"MISSING_PARAMETER\""));
        assert!(json.contains("\"message\":\"uid is required\""));
        assert!(json.contains("\"status\":400"));
    }

    #[test]
    fn test_json_error_response() {
        let response = json_error_response(GatewayErrorCode::MethodNotAllowed, "Method not allowed");

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json; charset=utf-8"
        );
        assert_eq!(
            response.headers().get(X_GATEWAY_ERROR).unwrap(),
            "METHOD_NOT_ALLOWED"
        );
    }

    #[test]
    fn test_error_code_header_values() {
        assert_eq!(
            GatewayErrorCode::UpstreamTimeout.as_header_value(),
            "UPSTREAM_TIMEOUT"
        );
        assert_eq!(
            GatewayErrorCode::MissingParameter.as_header_value(),
            "MISSING_PARAMETER"
        );
    }
}
