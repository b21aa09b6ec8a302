use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use tracing::error;

#[derive(Debug)]
pub enum AppError {
    InvalidRequest(String),
    NotFound(String),
    Forbidden(String),
    DatabaseError(String),
    InternalServerError(anyhow::Error),
}

impl AppError {
    pub fn invalid_request<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::InvalidRequest(t.to_string())
    }

    pub fn not_found<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::NotFound(t.to_string())
    }

    pub fn forbidden<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::Forbidden(t.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::DatabaseError(msg) => {
                error!("database error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database error".to_string(),
                )
            }
            AppError::InternalServerError(err) => {
                error!("internal error: {err:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(api::response::Error { error: message })).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError::InternalServerError(err.into())
    }
}
