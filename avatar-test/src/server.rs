//! Exposes an in-process stand-in for the avatar service.
//!
//! ```
//! use avatar_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let host = server.host();
//!    // point a client at `http://{host}`...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

use async_compression::tokio::bufread::GzipEncoder;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tokio::io::AsyncReadExt;

use crate::fixtures;

/// How the [`TestServer`] answers requests.
#[derive(Clone, Debug)]
pub struct Behavior {
    /// Status of upload responses.
    pub upload_status: StatusCode,
    /// `Content-Type` of upload responses.
    pub upload_content_type: String,
    /// Body of upload responses.
    ///
    /// Defaults to a JSON object whose `url` points back at this server.
    pub upload_body: Option<String>,
    /// Status of download responses.
    pub download_status: StatusCode,
    /// `Content-Type` of download responses.
    pub download_content_type: String,
    /// The image served by downloads.
    pub image: Vec<u8>,
    /// Serve downloads with `Content-Encoding: gzip`.
    pub gzip_downloads: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            upload_status: StatusCode::CREATED,
            upload_content_type: "application/json; charset=utf-8".into(),
            upload_body: None,
            download_status: StatusCode::OK,
            download_content_type: "image/png".into(),
            image: fixtures::png(600, 600),
            gzip_downloads: false,
        }
    }
}

/// An upload request as seen by the [`TestServer`].
#[derive(Clone, Debug)]
pub struct RecordedUpload {
    /// The `Authorization` header.
    pub authorization: Option<String>,
    /// The `Content-Type` header.
    pub content_type: Option<String>,
    /// The `Content-Length` header.
    pub content_length: Option<u64>,
    /// The request body.
    pub body: Bytes,
}

/// A download request as seen by the [`TestServer`].
#[derive(Clone, Debug)]
pub struct RecordedDownload {
    /// The requested path.
    pub path: String,
    /// The `Accept-Encoding` header.
    pub accept_encoding: Option<String>,
}

#[derive(Debug)]
struct Shared {
    base_url: String,
    behavior: Behavior,
    uploads: Mutex<Vec<RecordedUpload>>,
    downloads: Mutex<Vec<RecordedDownload>>,
}

/// An in-process avatar service for use in integration tests.
///
/// The server listens on a random available port on localhost and is shut down when dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    shared: Arc<Shared>,
}

impl TestServer {
    /// Starts a server that behaves like a healthy avatar service.
    pub async fn new() -> Self {
        Self::with_behavior(Behavior::default()).await
    }

    /// Starts a server that answers according to `behavior`.
    pub async fn with_behavior(behavior: Behavior) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let shared = Arc::new(Shared {
            base_url: format!("http://localhost:{}", socket.port()),
            behavior,
            uploads: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
        });

        let router = Router::new()
            .route("/v1/avatar/upload", post(upload))
            .route("/images/{name}", get(download))
            .with_state(Arc::clone(&shared));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            handle,
            socket,
            shared,
        }
    }

    /// Returns the `host:port` authority of this server.
    pub fn host(&self) -> String {
        format!("localhost:{}", self.socket.port())
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.shared.base_url, path)
    }

    /// Returns all upload requests received so far.
    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.shared.uploads.lock().unwrap().clone()
    }

    /// Returns all download requests received so far.
    pub fn downloads(&self) -> Vec<RecordedDownload> {
        self.shared.downloads.lock().unwrap().clone()
    }

    /// Returns the number of download requests received so far.
    pub fn download_count(&self) -> usize {
        self.shared.downloads.lock().unwrap().len()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

async fn upload(State(shared): State<Arc<Shared>>, headers: HeaderMap, body: Bytes) -> Response {
    shared.uploads.lock().unwrap().push(RecordedUpload {
        authorization: header_string(&headers, header::AUTHORIZATION),
        content_type: header_string(&headers, header::CONTENT_TYPE),
        content_length: header_string(&headers, header::CONTENT_LENGTH)
            .and_then(|len| len.parse().ok()),
        body,
    });

    let behavior = &shared.behavior;
    let body = behavior.upload_body.clone().unwrap_or_else(|| {
        let url = format!("{}/images/avatar.png", shared.base_url);
        serde_json::json!({ "url": url }).to_string()
    });

    (
        behavior.upload_status,
        [(header::CONTENT_TYPE, behavior.upload_content_type.clone())],
        body,
    )
        .into_response()
}

async fn download(
    State(shared): State<Arc<Shared>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    shared.downloads.lock().unwrap().push(RecordedDownload {
        path: format!("/images/{name}"),
        accept_encoding: header_string(&headers, header::ACCEPT_ENCODING),
    });

    let behavior = &shared.behavior;
    let content_type = (header::CONTENT_TYPE, behavior.download_content_type.clone());
    if behavior.gzip_downloads {
        let body = gzip(&behavior.image).await;
        let encoding = (header::CONTENT_ENCODING, "gzip".to_owned());
        return (behavior.download_status, [content_type, encoding], body).into_response();
    }

    (behavior.download_status, [content_type], behavior.image.clone()).into_response()
}

async fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzipEncoder::new(data);
    let mut encoded = Vec::new();
    encoder.read_to_end(&mut encoded).await.unwrap();
    encoded
}
