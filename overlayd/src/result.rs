use crate::error::AppError;

/// Handler and registry result, failing with an HTTP-mappable [`AppError`].
pub type Result<T, E = AppError> = std::result::Result<T, E>;
