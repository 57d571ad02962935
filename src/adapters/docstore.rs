//! Minimal REST client for the document sync backend.
//!
//! The backend is expected to expose:
//! - `POST {base}/documents` / `PUT {base}/documents/{id}` returning
//!   `{"id": ..., "revision": ...}`
//! - `GET {base}/documents/{id}` returning
//!   `{"content": ..., "revision": ...}`
//! - `GET {base}/documents/{id}/revision` returning `{"revision": ...}`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{DocumentStore, RemoteDoc, SyncApiError};

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    id: String,
    revision: String,
}

#[derive(Debug, Deserialize)]
struct RevisionResponse {
    revision: String,
}

#[derive(Debug, Deserialize)]
struct DocumentResponse {
    content: String,
    revision: String,
}

/// JSON REST document store client.
pub struct RestDocumentStore {
    client: reqwest::Client,
    base_url: String,
}

impl RestDocumentStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check(
        response: Result<reqwest::Response, reqwest::Error>,
        remote_id: &str,
    ) -> Result<reqwest::Response, SyncApiError> {
        let response = response.map_err(|e| SyncApiError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SyncApiError::NotFound(remote_id.to_string()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SyncApiError::Auth(format!("backend returned {}", status)));
        }
        if !status.is_success() {
            return Err(SyncApiError::Request(format!("backend returned {}", status)));
        }

        Ok(response)
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    fn name(&self) -> &str {
        "rest"
    }

    async fn upsert(
        &self,
        remote_id: Option<&str>,
        content: &str,
    ) -> Result<RemoteDoc, SyncApiError> {
        let body = json!({ "content": content });

        let request = match remote_id {
            Some(id) => self.client.put(self.url(&format!("documents/{}", id))),
            None => self.client.post(self.url("documents")),
        };

        let response =
            Self::check(request.json(&body).send().await, remote_id.unwrap_or("")).await?;

        let parsed: UpsertResponse = response
            .json()
            .await
            .map_err(|e| SyncApiError::Request(format!("invalid upsert response: {}", e)))?;

        Ok(RemoteDoc {
            remote_id: parsed.id,
            revision: parsed.revision,
        })
    }

    async fn get_revision(&self, remote_id: &str) -> Result<String, SyncApiError> {
        let response = Self::check(
            self.client
                .get(self.url(&format!("documents/{}/revision", remote_id)))
                .send()
                .await,
            remote_id,
        )
        .await?;

        let parsed: RevisionResponse = response
            .json()
            .await
            .map_err(|e| SyncApiError::Request(format!("invalid revision response: {}", e)))?;

        Ok(parsed.revision)
    }

    async fn fetch(&self, remote_id: &str) -> Result<(String, String), SyncApiError> {
        let response = Self::check(
            self.client
                .get(self.url(&format!("documents/{}", remote_id)))
                .send()
                .await,
            remote_id,
        )
        .await?;

        let parsed: DocumentResponse = response
            .json()
            .await
            .map_err(|e| SyncApiError::Request(format!("invalid document response: {}", e)))?;

        Ok((parsed.content, parsed.revision))
    }
}
