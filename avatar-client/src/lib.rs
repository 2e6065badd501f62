//! Client for the avatar upload/download service.
//!
//! A [`Client`] owns a fixed image payload and a bearer credential. Each call to
//! [`Avatar::upload`] or [`Avatar::download`] performs exactly one HTTP request and resolves to
//! exactly one [`Transaction`], whose outcome is either the typed success value or an [`Error`].
//!
//! ```no_run
//! use avatar_client::{Avatar, Client, TransactionId};
//!
//! # async fn example() -> avatar_client::Result<()> {
//! let client = Client::builder("profile.stage.mozaws.net", "<token>").build()?;
//!
//! let id = TransactionId::random();
//! let upload = client.upload(id).await.outcome?;
//! let url = upload.body.into_url()?;
//! let download = client.download(id, &url).await.outcome?;
//! assert_eq!(download.dimensions.width, 600);
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod client;
mod error;
mod transaction;
pub mod validate;

pub use client::{Avatar, Client, ClientBuilder, UPLOAD_PATH};
pub use error::{Error, Result};
pub use reqwest::StatusCode;
pub use transaction::{Downloaded, Transaction, TransactionId, UploadBody, Uploaded};
pub use validate::{Dimensions, ValidationError};
