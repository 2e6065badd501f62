use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{IntoUrl, StatusCode, Url};

use crate::transaction::{Downloaded, Transaction, TransactionId, UploadBody, Uploaded};
use crate::{Error, Result, validate};

/// Path of the upload endpoint, relative to the service host.
pub const UPLOAD_PATH: &str = "/v1/avatar/upload";

const USER_AGENT: &str = concat!("avatar-client/", env!("CARGO_PKG_VERSION"));

/// The image uploaded unless [`ClientBuilder::image`] overrides it.
pub(crate) static DEFAULT_IMAGE: &[u8] = include_bytes!("../assets/avatar.png");

/// The two operations of an avatar transaction.
///
/// Both operations always resolve to a [`Transaction`], even if the request fails on the
/// transport level. There is no cancellation once an operation has been issued.
#[async_trait::async_trait]
pub trait Avatar: Send + Sync + 'static {
    /// Uploads the configured image.
    async fn upload(&self, id: TransactionId) -> Transaction<Uploaded>;

    /// Downloads and validates the image at `url`.
    async fn download(&self, id: TransactionId, url: &str) -> Transaction<Downloaded>;
}

struct ClientBuilderInner {
    scheme: String,
    host: String,
    bearer: String,
    image: Bytes,
    reqwest_builder: reqwest::ClientBuilder,
}

impl fmt::Debug for ClientBuilderInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilderInner")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("bearer", &"[redacted]")
            .field("image", &format_args!("[{} bytes]", self.image.len()))
            .finish_non_exhaustive()
    }
}

/// Builder to create a [`Client`].
#[must_use]
#[derive(Debug)]
pub struct ClientBuilder(ClientBuilderInner);

impl ClientBuilder {
    /// Creates a new [`ClientBuilder`] for the service at `host`, authenticating with the given
    /// bearer token.
    ///
    /// Requests go to `https://<host>` unless changed with [`Self::scheme`].
    pub fn new(host: impl Into<String>, bearer: impl Into<String>) -> Self {
        let reqwest_builder = reqwest::Client::builder().user_agent(USER_AGENT);

        Self(ClientBuilderInner {
            scheme: "https".to_owned(),
            host: host.into(),
            bearer: bearer.into(),
            image: Bytes::from_static(DEFAULT_IMAGE),
            reqwest_builder,
        })
    }

    /// Changes the URL scheme used for uploads, `https` by default.
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.0.scheme = scheme.into();
        self
    }

    /// Replaces the bundled sample image with a custom payload.
    pub fn image(mut self, image: impl Into<Bytes>) -> Self {
        self.0.image = image.into();
        self
    }

    /// Sets a total timeout for every request, including reading the response body.
    ///
    /// By default, requests run to completion without a deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.0.reqwest_builder = self.0.reqwest_builder.timeout(timeout);
        self
    }

    /// Calls the closure with the underlying [`reqwest::ClientBuilder`].
    pub fn configure_reqwest<F>(mut self, closure: F) -> Self
    where
        F: FnOnce(reqwest::ClientBuilder) -> reqwest::ClientBuilder,
    {
        self.0.reqwest_builder = closure(self.0.reqwest_builder);
        self
    }

    /// Returns a [`Client`] that uses this [`ClientBuilder`] configuration.
    ///
    /// # Errors
    ///
    /// This method fails if:
    /// - the scheme and host do not form a valid URL
    /// - the bearer token contains characters not allowed in HTTP headers
    /// - the [`reqwest::Client`] fails to build
    pub fn build(self) -> Result<Client> {
        let ClientBuilderInner {
            scheme,
            host,
            bearer,
            image,
            reqwest_builder,
        } = self.0;

        let upload_url =
            parse_url(format!("{scheme}://{host}{UPLOAD_PATH}")).map_err(Error::Configuration)?;

        let mut authorization = HeaderValue::try_from(format!("Bearer {bearer}"))?;
        authorization.set_sensitive(true);

        let reqwest = reqwest_builder.build().map_err(Error::Configuration)?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                reqwest,
                upload_url,
                authorization,
                image,
            }),
        })
    }
}

struct ClientInner {
    reqwest: reqwest::Client,
    upload_url: Url,
    authorization: HeaderValue,
    image: Bytes,
}

impl fmt::Debug for ClientInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientInner")
            .field("upload_url", &self.upload_url.as_str())
            .field("image", &format_args!("[{} bytes]", self.image.len()))
            .finish_non_exhaustive()
    }
}

/// An HTTP client for the avatar service.
///
/// The client holds the outbound image and credentials, and is cheap to clone. It does not keep
/// any state about transactions beyond the single request it performs per call.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Convenience function to create a [`ClientBuilder`].
    pub fn builder(host: impl Into<String>, bearer: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(host, bearer)
    }

    /// The image sent with every upload.
    pub fn image(&self) -> &Bytes {
        &self.inner.image
    }

    async fn send_upload(&self) -> Result<Uploaded> {
        let inner = &self.inner;
        // reqwest derives `Content-Length` from the buffered body.
        let response = inner
            .reqwest
            .post(inner.upload_url.clone())
            .header(CONTENT_TYPE, "image/png")
            .header(AUTHORIZATION, inner.authorization.clone())
            .body(inner.image.clone())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(Error::InvalidStatus(status));
        }
        expect_content_type(&response, "application/json")?;

        let body = response.bytes().await?;
        Ok(Uploaded {
            status,
            bytes: inner.image.len() as u64,
            body: UploadBody::parse(&body),
        })
    }

    async fn send_download(&self, url: &str) -> Result<Downloaded> {
        let response = self.inner.reqwest.get(url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::InvalidStatus(status));
        }
        expect_content_type(&response, "image/png")?;

        let body = response.bytes().await?;
        let dimensions = validate::validate(&body)?;
        Ok(Downloaded {
            status,
            bytes: body.len() as u64,
            dimensions,
        })
    }
}

#[async_trait::async_trait]
impl Avatar for Client {
    async fn upload(&self, id: TransactionId) -> Transaction<Uploaded> {
        tracing::debug!(transaction = %id, url = %self.inner.upload_url, "start:upload");

        let start = Instant::now();
        let outcome = self.send_upload().await;
        Transaction {
            id,
            elapsed: start.elapsed(),
            outcome,
        }
    }

    async fn download(&self, id: TransactionId, url: &str) -> Transaction<Downloaded> {
        tracing::debug!(transaction = %id, url, "start:download");

        let start = Instant::now();
        let outcome = self.send_download(url).await;
        Transaction {
            id,
            elapsed: start.elapsed(),
            outcome,
        }
    }
}

fn parse_url(url: impl IntoUrl) -> reqwest::Result<Url> {
    url.into_url()
}

/// Checks that the response `Content-Type` starts with `expected`.
///
/// A missing or non-ASCII header counts as a mismatch.
fn expect_content_type(response: &reqwest::Response, expected: &str) -> Result<()> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with(expected) {
        Ok(())
    } else {
        Err(Error::InvalidContentType(content_type.to_owned()))
    }
}
