//! HTTP remote store
//!
//! JSON over HTTP against a plain record service:
//!
//! - `GET  {base}/records/{type}/changes?since=<token>&limit=<n>` -> [`ChangePage`]
//! - `POST {base}/records` with `{"records": [...]}` -> [`SaveReport`]
//!
//! `410 Gone` on a change feed means the token expired.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;

use super::{ChangePage, RemoteError, RemoteRecord, RemoteStore, SaveReport};
use crate::models::RecordKind;
use crate::sync::cursor::ChangeToken;

/// Request timeout in seconds
const REQUEST_TIMEOUT: u64 = 30;

#[derive(Serialize)]
struct SaveRequest<'a> {
    records: &'a [RemoteRecord],
}

#[derive(Debug)]
pub struct HttpRemote {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT))
            .user_agent(concat!("quire/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Rejected(format!("invalid HTTP client setup: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl RemoteStore for HttpRemote {
    async fn fetch_changes(
        &self,
        kind: RecordKind,
        since: Option<ChangeToken>,
        limit: usize,
    ) -> Result<ChangePage, RemoteError> {
        let url = format!("{}/records/{}/changes", self.base_url, kind.record_type());
        let mut query = vec![("limit", limit.to_string())];
        if let Some(token) = since {
            query.push(("since", token.0));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::GONE {
            return Err(RemoteError::InvalidCursor { kind });
        }
        let response = check_status(response).await?;
        response
            .json::<ChangePage>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn save_records(&self, records: Vec<RemoteRecord>) -> Result<SaveReport, RemoteError> {
        let url = format!("{}/records", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&SaveRequest { records: &records })
            .send()
            .await
            .map_err(transport_error)?;

        let response = check_status(response).await?;
        response
            .json::<SaveReport>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::Transient(e.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("{} {}", status, body.trim());
    Err(classify_status(status, message))
}

/// Server-side trouble and throttling are worth retrying; other failures are not
fn classify_status(status: StatusCode, message: String) -> RemoteError {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::Rejected(message)
    }
}
