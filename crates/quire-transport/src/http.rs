//! HTTP transports: storage mirrors and key servers.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tracing::debug;

use quire_access::{FetchKeyRequest, FetchKeyResponse, KeyServer, KeyServerError};
use quire_core::{BlobHandle, ObjectId};

use crate::error::MirrorError;
use crate::retriever::Mirror;

fn trim_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

/// A mirror serving `GET {base}/v1/blobs/{handle}`.
pub struct HttpMirror {
    base: String,
    client: Client,
}

impl HttpMirror {
    pub fn new(base: &str) -> Self {
        Self::with_client(base, Client::new())
    }

    /// Share a client (and its connection pool) across mirrors.
    pub fn with_client(base: &str, client: Client) -> Self {
        Self {
            base: trim_base(base),
            client,
        }
    }

    pub fn blob_url(&self, handle: &BlobHandle) -> String {
        format!("{}/v1/blobs/{}", self.base, handle)
    }
}

#[async_trait]
impl Mirror for HttpMirror {
    fn name(&self) -> &str {
        &self.base
    }

    async fn get(&self, handle: &BlobHandle) -> Result<Bytes, MirrorError> {
        let response = self
            .client
            .get(self.blob_url(handle))
            .send()
            .await
            .map_err(|e| MirrorError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MirrorError::Status(response.status().as_u16()));
        }

        response
            .bytes()
            .await
            .map_err(|e| MirrorError::Transport(e.to_string()))
    }
}

/// A key server reached at `POST {base}/v1/fetch_key` with a JSON body.
pub struct HttpKeyServer {
    id: ObjectId,
    base: String,
    client: Client,
}

impl HttpKeyServer {
    pub fn new(id: ObjectId, base: &str) -> Self {
        Self::with_client(id, base, Client::new())
    }

    pub fn with_client(id: ObjectId, base: &str, client: Client) -> Self {
        Self {
            id,
            base: trim_base(base),
            client,
        }
    }

    pub fn fetch_key_url(&self) -> String {
        format!("{}/v1/fetch_key", self.base)
    }
}

#[async_trait]
impl KeyServer for HttpKeyServer {
    fn id(&self) -> ObjectId {
        self.id
    }

    async fn fetch_keys(
        &self,
        request: &FetchKeyRequest,
    ) -> Result<FetchKeyResponse, KeyServerError> {
        let response = self
            .client
            .post(self.fetch_key_url())
            .json(request)
            .send()
            .await
            .map_err(|e| KeyServerError::Transport(e.to_string()))?;

        let status = response.status();
        debug!(server = %self.id, %status, "key server answered");
        if status.is_success() {
            return response
                .json::<FetchKeyResponse>()
                .await
                .map_err(|e| KeyServerError::Transport(format!("unreadable response: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::FORBIDDEN => KeyServerError::Denied(body),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                KeyServerError::InvalidRequest(body)
            }
            other => KeyServerError::Transport(format!("status {other}: {body}")),
        })
    }
}
