//! Google Cloud Storage over the JSON API.
//!
//! Uploads use a single streaming `uploadType=media` request: bytes pushed
//! into the writer flow through a channel into the request body, and the
//! object only exists once the server answers the completed request.

use std::sync::Arc;

use bucketdrop_auth::{AccessTokenSource, AuthContext, token_source};
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, StatusCode, Url};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{ObjectRef, ObjectStore, ObjectWriter, StoreConnector, StoreError, StoreFuture};

/// Public GCS endpoint.
pub const GCS_BASE_URL: &str = "https://storage.googleapis.com";

/// Header naming the project billed for the request.
const USER_PROJECT_HEADER: &str = "x-goog-user-project";

/// Chunks buffered between the writer and the request body.
const BODY_CHANNEL_CAPACITY: usize = 8;

type BodyChunk = Result<Bytes, std::io::Error>;

/// Builds [`GcsStore`] handles with per-attempt credentials.
pub struct GcsConnector {
    http: reqwest::Client,
    project: Option<String>,
    base_url: String,
}

impl GcsConnector {
    pub fn new(http: reqwest::Client, project: Option<String>) -> Self {
        Self {
            http,
            project,
            base_url: GCS_BASE_URL.to_string(),
        }
    }

    /// Overrides the endpoint (emulators, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// A store that authenticates with `tokens`.
    pub fn store(&self, tokens: Arc<dyn AccessTokenSource>) -> GcsStore {
        GcsStore {
            http: self.http.clone(),
            tokens,
            project: self.project.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

impl StoreConnector for GcsConnector {
    fn connect<'a>(&'a self, auth: &'a AuthContext) -> StoreFuture<'a, Arc<dyn ObjectStore>> {
        Box::pin(async move {
            let tokens = token_source(auth, &self.http).await?;
            Ok(Arc::new(self.store(tokens)) as Arc<dyn ObjectStore>)
        })
    }
}

/// A GCS client bound to one set of credentials.
pub struct GcsStore {
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
    project: Option<String>,
    base_url: String,
}

impl GcsStore {
    /// `{base}/storage/v1/b/{bucket}/o/{name}`
    fn object_url(&self, object: &ObjectRef) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend([
                "storage",
                "v1",
                "b",
                object.bucket.as_str(),
                "o",
                object.name.as_str(),
            ]);
        Ok(url)
    }

    /// `{base}/upload/storage/v1/b/{bucket}/o?uploadType=media&name={name}`
    fn upload_url(&self, object: &ObjectRef) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", object.bucket.as_str(), "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", &object.name);
        Ok(url)
    }

    /// Adds credentials and the quota-project header.
    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        let mut request = request;
        if let Some(token) = self.tokens.access_token().await? {
            request = request.bearer_auth(token);
        }
        if let Some(project) = &self.project {
            request = request.header(USER_PROJECT_HEADER, project);
        }
        Ok(request)
    }
}

async fn status_error(response: reqwest::Response) -> StoreError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    StoreError::Status { status, message }
}

impl ObjectStore for GcsStore {
    fn exists<'a>(&'a self, object: &'a ObjectRef) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut url = self.object_url(object)?;
            url.query_pairs_mut().append_pair("fields", "name");

            let response = self.authorize(self.http.get(url)).await?.send().await?;
            match response.status() {
                StatusCode::OK => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                _ => Err(status_error(response).await),
            }
        })
    }

    fn open_writer<'a>(&'a self, object: &'a ObjectRef) -> StoreFuture<'a, Box<dyn ObjectWriter>> {
        Box::pin(async move {
            let url = self.upload_url(object)?;
            let request = self
                .authorize(self.http.post(url))
                .await?
                .header(CONTENT_TYPE, "application/octet-stream");

            let (tx, mut rx) = mpsc::channel::<BodyChunk>(BODY_CHANNEL_CAPACITY);
            let body = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
            let request = request.body(reqwest::Body::wrap_stream(body));

            let name = object.to_string();
            let upload = tokio::spawn(async move {
                let response = request.send().await?;
                if !response.status().is_success() {
                    return Err(status_error(response).await);
                }
                tracing::debug!(object = %name, "upload request completed");
                Ok(())
            });

            Ok(Box::new(GcsWriter {
                tx: Some(tx),
                upload: Some(upload),
            }) as Box<dyn ObjectWriter>)
        })
    }
}

/// Streams bytes into an in-flight upload request.
struct GcsWriter {
    tx: Option<mpsc::Sender<BodyChunk>>,
    upload: Option<JoinHandle<Result<(), StoreError>>>,
}

impl GcsWriter {
    async fn finish(upload: Option<JoinHandle<Result<(), StoreError>>>) -> Result<(), StoreError> {
        match upload {
            Some(handle) => handle.await.map_err(|e| StoreError::Task(e.to_string()))?,
            None => Err(StoreError::Interrupted),
        }
    }
}

impl ObjectWriter for GcsWriter {
    fn write<'a>(&'a mut self, chunk: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let tx = self.tx.as_ref().ok_or(StoreError::Interrupted)?;
            if tx.send(Ok(Bytes::copy_from_slice(chunk))).await.is_err() {
                // The request ended early; surface its error instead.
                self.tx = None;
                Self::finish(self.upload.take()).await?;
                return Err(StoreError::Interrupted);
            }
            Ok(())
        })
    }

    fn close(mut self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            // Dropping the sender ends the body stream.
            drop(self.tx.take());
            Self::finish(self.upload.take()).await
        })
    }

    fn abort(mut self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            if let Some(tx) = self.tx.take() {
                // A body error makes the request fail instead of finalizing.
                let _ = tx
                    .send(Err(std::io::Error::other("upload aborted")))
                    .await;
            }
            if let Err(e) = Self::finish(self.upload.take()).await {
                tracing::debug!(error = %e, "aborted upload request ended");
            }
            Ok(())
        })
    }
}
