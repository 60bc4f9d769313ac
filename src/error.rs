use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::models::ErrorResponse;

pub fn io_err(message: impl ToString) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message.to_string())
}

/// Errors answered by the gateway itself.
///
/// The display text is exactly what the caller sees in `{"error": ...}`, so
/// variants that wrap an underlying failure never include its details.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("FAL_KEY environment variable is not set")]
    MissingCredential,

    #[error("requestId is required")]
    MissingRequestId,

    #[error("Failed to fetch result")]
    ResultUnavailable,

    #[error("Missing the x-fal-target-url header")]
    MissingTargetUrl,

    #[error("Invalid x-fal-target-url header")]
    InvalidTargetUrl,

    #[error("Failed to reach provider")]
    Upstream(#[source] awc::error::SendRequestError),
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingCredential | GatewayError::ResultUnavailable => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::MissingRequestId | GatewayError::MissingTargetUrl => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::InvalidTargetUrl => StatusCode::PRECONDITION_FAILED,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_the_http_contract() {
        assert_eq!(
            GatewayError::MissingCredential.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::MissingRequestId.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::ResultUnavailable.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayError::InvalidTargetUrl.status_code(),
            StatusCode::PRECONDITION_FAILED
        );
    }
}
