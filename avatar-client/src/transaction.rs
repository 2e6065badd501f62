//! Typed results of avatar operations.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;

use crate::validate::Dimensions;
use crate::{Error, Result};

/// Identifies one upload and its paired download.
///
/// Rendered as eight lowercase hex digits.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TransactionId(u32);

impl TransactionId {
    /// Creates an identifier from a raw value.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Creates a new random identifier.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// The result of a single upload or download.
///
/// Exactly one outcome is ever populated: the typed success value or the error that ended the
/// transaction.
#[derive(Debug)]
pub struct Transaction<T> {
    /// The transaction this result belongs to.
    pub id: TransactionId,
    /// Wall-clock time from issuing the request until the response was fully processed.
    pub elapsed: Duration,
    /// The outcome of the operation.
    pub outcome: Result<T>,
}

/// A successful upload.
#[derive(Debug)]
pub struct Uploaded {
    /// The response status, always `201 Created`.
    pub status: StatusCode,
    /// Number of bytes sent, taken from the outbound `Content-Length`.
    pub bytes: u64,
    /// The leniently parsed response body.
    pub body: UploadBody,
}

/// The body of an upload response.
///
/// Malformed JSON does not fail the upload. Instead, the parse error is kept in
/// [`UploadBody::Invalid`] and callers have to check for it, for instance via
/// [`UploadBody::into_url`].
#[derive(Debug)]
pub enum UploadBody {
    /// The body parsed as JSON.
    Json(serde_json::Value),
    /// The body could not be parsed as JSON.
    Invalid(serde_json::Error),
}

impl UploadBody {
    /// Parses a response body without failing.
    pub fn parse(body: &[u8]) -> Self {
        match serde_json::from_slice(body) {
            Ok(value) => Self::Json(value),
            Err(err) => Self::Invalid(err),
        }
    }

    /// Returns the download URL, if the body contains a string `url` field.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Json(value) => value.get("url")?.as_str(),
            Self::Invalid(_) => None,
        }
    }

    /// Consumes the body and returns the download URL.
    ///
    /// Fails with [`Error::MissingUrl`] if the body has no `url` field, carrying the embedded
    /// parse error if the body was not JSON at all.
    pub fn into_url(self) -> Result<String> {
        match self {
            Self::Json(value) => match value.get("url").and_then(|url| url.as_str()) {
                Some(url) => Ok(url.to_owned()),
                None => Err(Error::MissingUrl { cause: None }),
            },
            Self::Invalid(err) => Err(Error::MissingUrl { cause: Some(err) }),
        }
    }
}

/// A successful download.
#[derive(Debug)]
pub struct Downloaded {
    /// The response status, always `200 OK`.
    pub status: StatusCode,
    /// Length of the decoded response body.
    pub bytes: u64,
    /// Dimensions of the validated image.
    pub dimensions: Dimensions,
}
