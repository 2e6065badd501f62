use reqwest::StatusCode;

use crate::validate::ValidationError;

/// Errors that can end an avatar transaction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error emitted from the underlying [`reqwest`] client while sending a request or
    /// receiving its body.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// The service responded with an unexpected status code.
    #[error("invalid response code: {}", .0.as_u16())]
    InvalidStatus(StatusCode),
    /// The service responded with an unexpected `Content-Type`.
    #[error("invalid content-type: {0}")]
    InvalidContentType(String),
    /// The downloaded image did not pass validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The upload response did not carry a download URL.
    ///
    /// If the body could not be parsed as JSON, the parse error is attached as the source.
    #[error("upload response did not contain a download url")]
    MissingUrl {
        /// The JSON error embedded in the upload body, if any.
        #[source]
        cause: Option<serde_json::Error>,
    },
    /// The client could not be built from the given configuration.
    #[error("invalid client configuration")]
    Configuration(#[source] reqwest::Error),
    /// The bearer credential cannot be sent as an HTTP header.
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
