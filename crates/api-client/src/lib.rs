//! # EMR API Client
//!
//! HTTP implementation of the engine's [`RecordEndpoint`] seam, speaking
//! the record service's REST surface:
//!
//! - `GET  {base}/records/{identity}` - load, where 404 means "no record
//!   yet" rather than an error
//! - `POST {base}/records/{identity}` - save, carrying the draft and
//!   force flags
//! - `POST {base}/records/{identity}/sign` - sign
//! - `POST {base}/records/{identity}/amend` - amend
//! - `GET  {base}/records/{identity}/diff`, `.../history` - read paths
//!
//! **No engine concerns**: versioning, dirty tracking, autosave, and
//! conflict handling all live in `emr-core`. This crate moves bytes and
//! classifies status codes, nothing more.

mod wire;

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use emr_core::{ApiError, RecordEndpoint, SaveOutcome, WriteRequest};
use emr_types::{AmendmentReason, DiffReport, Record, RecordId, RevisionHistory};

use crate::wire::{AmendBody, SignBody, WriteBody};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound for any single request, autosave traffic included. Long
/// enough for a slow clinic uplink, short enough that the scheduler's
/// backoff stays meaningful.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a client could not be constructed. Distinct from [`ApiError`]
/// because nothing has been sent yet.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("invalid base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

/// [`RecordEndpoint`] over HTTP.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpRecordEndpoint {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpRecordEndpoint {
    /// Builds a client for the record service at `base_url`.
    ///
    /// Trailing slashes are trimmed and the scheme must be http or
    /// https; anything else is refused before the first request goes
    /// out.
    pub fn new(base_url: &str) -> Result<Self, ClientBuildError> {
        let trimmed = base_url.trim_end_matches('/');
        let parsed =
            reqwest::Url::parse(trimmed).map_err(|err| ClientBuildError::InvalidBaseUrl {
                url: base_url.to_owned(),
                reason: err.to_string(),
            })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientBuildError::InvalidBaseUrl {
                url: base_url.to_owned(),
                reason: format!("scheme must be http or https, not {}", parsed.scheme()),
            });
        }

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        debug!(base_url = trimmed, "record endpoint client ready");
        Ok(Self {
            http,
            base_url: trimmed.to_owned(),
            bearer_token: None,
        })
    }

    /// Attaches a bearer token sent with every request.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Service URL this client talks to, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn record_url(&self, identity: &RecordId) -> String {
        format!("{}/records/{}", self.base_url, identity)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends a write body and classifies the answer.
    async fn post_write<B>(&self, url: String, body: &B) -> Result<SaveOutcome, ApiError>
    where
        B: serde::Serialize + Sync,
    {
        let response = self
            .authorize(self.http.post(&url))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport)?;
        wire::classify_write(status, &text)
    }

    /// GETs `url` and decodes a `T`, funnelling failures through the
    /// shared status mapping.
    async fn get_json<T>(&self, url: String, query: &[(&str, u64)]) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self
            .authorize(self.http.get(&url).query(query))
            .send()
            .await
            .map_err(transport)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport)?;
        if !(200..300).contains(&status) {
            return Err(wire::classify_failure(status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn transport(err: reqwest::Error) -> ApiError {
    ApiError::Transport(Box::new(err))
}

#[async_trait]
impl RecordEndpoint for HttpRecordEndpoint {
    async fn load(&self, identity: &RecordId) -> Result<Option<Record>, ApiError> {
        debug!(%identity, "loading record");
        let response = self
            .authorize(self.http.get(self.record_url(identity)))
            .send()
            .await
            .map_err(transport)?;
        let status = response.status().as_u16();
        if status == 404 {
            return Ok(None);
        }
        let text = response.text().await.map_err(transport)?;
        if !(200..300).contains(&status) {
            return Err(wire::classify_failure(status, &text));
        }
        let record: Record = serde_json::from_str(&text)?;
        Ok(Some(record))
    }

    async fn save(
        &self,
        identity: &RecordId,
        request: WriteRequest,
        force: bool,
    ) -> Result<SaveOutcome, ApiError> {
        debug!(%identity, row_version = request.row_version, force, "saving record");
        let body = WriteBody {
            data: &request.data,
            row_version: request.row_version,
            client_session_id: request.client_session_id,
            is_draft: true,
            force,
        };
        self.post_write(self.record_url(identity), &body).await
    }

    async fn sign(
        &self,
        identity: &RecordId,
        request: WriteRequest,
    ) -> Result<SaveOutcome, ApiError> {
        debug!(%identity, row_version = request.row_version, "signing record");
        let body = SignBody {
            data: &request.data,
            row_version: request.row_version,
            client_session_id: request.client_session_id,
        };
        self.post_write(format!("{}/sign", self.record_url(identity)), &body)
            .await
    }

    async fn amend(
        &self,
        identity: &RecordId,
        request: WriteRequest,
        reason: &AmendmentReason,
    ) -> Result<Record, ApiError> {
        debug!(%identity, "recording amendment");
        let body = AmendBody {
            data: &request.data,
            reason: reason.as_str(),
            row_version: request.row_version,
            client_session_id: request.client_session_id,
        };
        let url = format!("{}/amend", self.record_url(identity));
        let response = self
            .authorize(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(transport)?;
        if !(200..300).contains(&status) {
            return Err(wire::classify_failure(status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn diff(&self, identity: &RecordId, from: u64, to: u64) -> Result<DiffReport, ApiError> {
        self.get_json(
            format!("{}/diff", self.record_url(identity)),
            &[("from", from), ("to", to)],
        )
        .await
    }

    async fn history(&self, identity: &RecordId) -> Result<RevisionHistory, ApiError> {
        self.get_json(format!("{}/history", self.record_url(identity)), &[])
            .await
    }
}
