use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use espipe::error::{ErrorKind, EtlError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::error;

/// Codes carried by every control surface response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    /// The request was rejected because of its own content.
    PublicError,
    InternalError,
}

impl ResultCode {
    pub fn code(&self) -> u32 {
        match self {
            ResultCode::Success => 10000,
            ResultCode::PublicError => 10001,
            ResultCode::InternalError => 10002,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::PublicError => "public error",
            ResultCode::InternalError => "internal error",
        }
    }
}

/// Response envelope of the control surface.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResultVo<T> {
    pub code: u32,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ResultVo<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: ResultCode::Success.code(),
            msg: ResultCode::Success.message().to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: ResultCode, msg: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            msg: msg.into(),
            data: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EtlError),

    #[error("control task failed: {0}")]
    Join(#[from] JoinError),
}

impl ApiError {
    fn result_code(&self) -> ResultCode {
        match self {
            ApiError::Engine(err)
                if matches!(
                    err.kind(),
                    ErrorKind::InvalidArgument | ErrorKind::InvalidDocument
                ) =>
            {
                ResultCode::PublicError
            }
            _ => ResultCode::InternalError,
        }
    }

    fn to_message(&self) -> String {
        match (self, self.result_code()) {
            (ApiError::Engine(err), ResultCode::PublicError) => err.summary(),
            // Internal failures are logged in full and only summarized to the caller.
            (ApiError::Engine(err), _) => {
                format!("{}: {}", ResultCode::InternalError.message(), err.description())
            }
            (ApiError::Join(_), _) => ResultCode::InternalError.message().to_string(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.result_code() {
            ResultCode::PublicError => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let code = self.result_code();
        if code == ResultCode::InternalError {
            error!(error = %self, "control surface request failed");
        }

        HttpResponse::build(self.status_code()).json(ResultVo::<()>::error(code, self.to_message()))
    }
}

#[cfg(test)]
mod tests {
    use espipe::etl_error;

    use super::*;

    #[test]
    fn invalid_arguments_are_public_errors() {
        let err = ApiError::from(etl_error!(
            ErrorKind::InvalidArgument,
            "Invalid fix request",
            "value abc is incorrect"
        ));

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.result_code(), ResultCode::PublicError);
        assert_eq!(
            err.to_message(),
            "Invalid fix request: value abc is incorrect"
        );
    }

    #[test]
    fn other_failures_are_internal_errors() {
        let err = ApiError::from(etl_error!(
            ErrorKind::DestinationUnavailable,
            "Search engine is unavailable",
            "connection refused"
        ));

        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            err.to_message(),
            "internal error: Search engine is unavailable"
        );
    }
}
