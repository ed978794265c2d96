//! Standardized mapping from HTTP and transport failures to [`PushError`]

use crate::error::PushError;
use reqwest::StatusCode;

/// Standard error handler for registry HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Handle a failed blob upload response
    pub fn handle_upload_error(status: StatusCode, error_text: &str, context: &str) -> PushError {
        match status.as_u16() {
            401 => PushError::Authorization(format!(
                "authentication failed during {}: {}",
                context, error_text
            )),
            403 => PushError::Authorization(format!(
                "permission denied for {}: {}",
                context, error_text
            )),
            code => {
                let message = match code {
                    400 if error_text.contains("DIGEST_INVALID") => format!(
                        "registry reports uploaded content does not match digest: {}",
                        error_text
                    ),
                    400 => format!("bad request during {}: {}", context, error_text),
                    404 => format!(
                        "repository not found or {} session expired: {}",
                        context, error_text
                    ),
                    413 => format!("blob too large for {}: {}", context, error_text),
                    416 => format!("upload range rejected for {}: {}", context, error_text),
                    429 => format!("rate limited during {}: {}", context, error_text),
                    500 => format!("registry server error during {}: {}", context, error_text),
                    502 | 503 => format!("registry unavailable during {}: {}", context, error_text),
                    507 => format!("registry out of storage during {}: {}", context, error_text),
                    _ => format!("{} failed: {}", context, error_text),
                };
                PushError::registry(code, message)
            }
        }
    }

    /// Handle a failed token request
    pub fn handle_auth_error(status: StatusCode, error_text: &str) -> PushError {
        let message = match status.as_u16() {
            400 => "invalid token request parameters".to_string(),
            401 => "invalid credentials provided".to_string(),
            403 => "access denied - insufficient permissions".to_string(),
            404 => "authentication endpoint not found".to_string(),
            _ => format!("authentication failed (status {}): {}", status, error_text),
        };

        PushError::Authorization(message)
    }

    /// Handle any other failed registry response
    pub fn handle_registry_error(
        status: StatusCode,
        error_text: &str,
        operation: &str,
    ) -> PushError {
        match status.as_u16() {
            401 => PushError::Authorization(format!(
                "unauthorized to perform {}: {}",
                operation, error_text
            )),
            403 => PushError::Authorization(format!(
                "insufficient permissions for {}: {}",
                operation, error_text
            )),
            code => PushError::registry(code, format!("{} failed: {}", operation, error_text)),
        }
    }
}

/// Network error categorization
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with helpful context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> PushError {
        if error.is_timeout() {
            PushError::Network(format!("{} timed out: {}", context, error))
        } else if error.is_connect() {
            PushError::Network(format!("connection error during {}: {}", context, error))
        } else if let Some(status) = error.status() {
            HttpErrorHandler::handle_registry_error(status, &error.to_string(), context)
        } else {
            PushError::Network(format!("{} network error: {}", context, error))
        }
    }
}
