// Request failures and their HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use judgebox_common::store::StoreError;
use judgebox_engine::ExecError;
use tracing::{error, warn};

#[derive(Debug)]
pub enum ApiError {
    Exec(ExecError),
    Store(StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Exec(ExecError::Configuration(_)) => StatusCode::BAD_REQUEST,
            ApiError::Exec(ExecError::ResourceExhausted { .. }) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Exec(ExecError::Sandbox(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metric label
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Exec(ExecError::Configuration(_)) => "configuration",
            ApiError::Exec(ExecError::ResourceExhausted { .. }) => "resource_exhausted",
            ApiError::Exec(ExecError::Sandbox(_)) => "sandbox",
            ApiError::Store(StoreError::NotFound { .. }) => "not_found",
            ApiError::Store(_) => "store",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Exec(e) => e.to_string(),
            ApiError::Store(e) => e.to_string(),
        }
    }
}

impl From<ExecError> for ApiError {
    fn from(e: ExecError) -> Self {
        ApiError::Exec(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            error!(error = %message, kind = self.kind(), "request failed");
        } else {
            warn!(error = %message, kind = self.kind(), "request rejected");
        }

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use judgebox_engine::SandboxError;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::from(ExecError::configuration("bad limits")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(ExecError::ResourceExhausted { active: 4, queued: 64 }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ApiError::from(ExecError::from(SandboxError::Runtime("boom".into()))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::from(StoreError::NotFound {
                    kind: "question",
                    id: "9".into(),
                }),
                StatusCode::NOT_FOUND,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status(), expected);
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
