use warp::http::StatusCode;

use crate::core::intake::FieldErrors;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid registration: {0}")]
    Validation(FieldErrors),

    #[error("Failed to process profile picture: {0}")]
    Encoding(String),

    #[error("Registration not found")]
    NotFound(String),

    #[error("Failed to generate {artifact}, please try again: {reason}")]
    Artifact {
        artifact: &'static str,
        reason: String,
    },

    #[error("Storage error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn artifact(artifact: &'static str, reason: impl ToString) -> Self {
        Error::Artifact {
            artifact,
            reason: reason.to_string(),
        }
    }

    /// Status code reported by the web surface for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Encoding(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Artifact { .. }
            | Error::Persistence(_)
            | Error::Io(_)
            | Error::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<FieldErrors> for Error {
    fn from(errors: FieldErrors) -> Self {
        Error::Validation(errors)
    }
}

impl From<rust_xlsxwriter::XlsxError> for Error {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Error::artifact("spreadsheet", err)
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::artifact("ticket image", err)
    }
}

impl From<qrcode::types::QrError> for Error {
    fn from(err: qrcode::types::QrError) -> Self {
        Error::artifact("ticket QR code", err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
