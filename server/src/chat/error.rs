use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use wanderchat_shared::ChatError;

/// HTTP face of [`ChatError`]: status code plus a JSON `ErrorBody`.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Auth(_) => StatusCode::UNAUTHORIZED,
            ChatError::Network(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(self.0.to_body())).into_response()
    }
}
