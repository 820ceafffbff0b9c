//! Bucket served over HTTP at `{endpoint}/{bucket}/{key}`.
//!
//! Uploads stream the body in `part_size` chunks; downloads stream the
//! response body. Neither holds a whole object in memory.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tokio_util::io::{ReaderStream, StreamReader};

use super::{BackendError, ObjectReader, ObjectStore, StoreError};
use crate::sanitize::redact_url;

pub struct HttpBucket {
    client: Client,
    endpoint: String,
    bucket: String,
    token: Option<SecretString>,
    part_size: usize,
}

impl HttpBucket {
    pub fn new(
        endpoint: &str,
        bucket: &str,
        token: Option<SecretString>,
        part_size: u64,
    ) -> Result<Self, StoreError> {
        let endpoint = endpoint.trim_end_matches('/');
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(StoreError::InvalidEndpoint(redact_url(endpoint)));
        }

        let client = Client::builder()
            .build()
            .map_err(|e| StoreError::Transport {
                op: "connect",
                key: String::new(),
                source: e.into(),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            bucket: bucket.to_string(),
            token,
            part_size: usize::try_from(part_size).unwrap_or(usize::MAX),
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpBucket {
    async fn put(
        &self,
        key: &str,
        body: ObjectReader,
        size: Option<u64>,
        content_type: &str,
    ) -> Result<(), BackendError> {
        let stream = ReaderStream::with_capacity(body, self.part_size);
        let mut request = self
            .client
            .put(self.url(key))
            .header(CONTENT_TYPE, content_type)
            .body(Body::wrap_stream(stream));
        if let Some(len) = size {
            request = request.header(CONTENT_LENGTH, len);
        }

        self.authorize(request).send().await?.error_for_status()?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let response = self.authorize(self.client.head(self.url(key))).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }

    async fn open_read(&self, key: &str) -> Result<ObjectReader, BackendError> {
        let response = self
            .authorize(self.client.get(self.url(key)))
            .send()
            .await?
            .error_for_status()?;

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    fn describe(&self) -> String {
        format!("http:{}/{}", redact_url(&self.endpoint), self.bucket)
    }
}
