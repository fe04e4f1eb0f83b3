//! Gemini `cachedContents` REST client.
//!
//! See: <https://ai.google.dev/api/caching>
//!
//! This is the only place that inspects remote error wording. The API has
//! no dedicated code for undersized content (it answers `INVALID_ARGUMENT`),
//! so the message is matched here and translated into
//! [`RemoteCacheError::BelowMinimumSize`] before it leaves the adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CacheDescriptor, RemoteCacheError, RemoteCacheService};
use crate::types::ContentPart;
use crate::{MimirError, Result};

/// Default base URL for the Generative Language API
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Phrases the API uses when content is under the minimum token count.
const BELOW_MINIMUM_MARKERS: &[&str] = &[
    "min_total_token_count",
    "too few tokens",
    "too small",
    "minimum token count",
];

/// Client for Gemini context caching.
#[derive(Clone)]
pub struct GeminiCacheClient {
    api_key: String,
    http: Client,
    base_url: String,
}

impl GeminiCacheClient {
    /// Create a client against the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| MimirError::Http(e.to_string()))?;

        Ok(Self {
            api_key: api_key.into(),
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn resource_url(&self, handle: &str) -> String {
        format!("{}/v1beta/{}", self.base_url, handle)
    }

    async fn read_descriptor(
        response: Response,
    ) -> std::result::Result<CacheDescriptor, RemoteCacheError> {
        let response = check_status(response).await?;
        let body: CachedContentResponse = response
            .json()
            .await
            .map_err(|e| RemoteCacheError::Transient(e.to_string()))?;
        Ok(CacheDescriptor {
            name: body.name,
            model: body.model,
            expire_time: body.expire_time,
        })
    }
}

#[async_trait]
impl RemoteCacheService for GeminiCacheClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn create(
        &self,
        model: &str,
        parts: &[ContentPart],
        ttl: Duration,
    ) -> std::result::Result<CacheDescriptor, RemoteCacheError> {
        let url = format!("{}/v1beta/cachedContents", self.base_url);
        let request = CreateCachedContentRequest {
            model: qualified_model(model),
            contents: vec![WireContent {
                role: "user",
                parts: parts.iter().map(WirePart::from).collect(),
            }],
            ttl: ttl_string(ttl),
        };
        debug!(model, parts = parts.len(), "creating cached content");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RemoteCacheError::Transient(e.to_string()))?;

        Self::read_descriptor(response).await
    }

    async fn get(&self, handle: &str) -> std::result::Result<CacheDescriptor, RemoteCacheError> {
        let response = self
            .http
            .get(self.resource_url(handle))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| RemoteCacheError::Transient(e.to_string()))?;

        Self::read_descriptor(response).await
    }

    async fn update(
        &self,
        handle: &str,
        ttl: Duration,
    ) -> std::result::Result<(), RemoteCacheError> {
        let response = self
            .http
            .patch(self.resource_url(handle))
            .query(&[("updateMask", "ttl")])
            .header("x-goog-api-key", &self.api_key)
            .json(&UpdateTtlRequest {
                ttl: ttl_string(ttl),
            })
            .send()
            .await
            .map_err(|e| RemoteCacheError::Transient(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }

    async fn delete(&self, handle: &str) -> std::result::Result<(), RemoteCacheError> {
        let response = self
            .http
            .delete(self.resource_url(handle))
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| RemoteCacheError::Transient(e.to_string()))?;

        check_status(response).await.map(|_| ())
    }
}

/// Pass successful responses through; classify everything else.
async fn check_status(response: Response) -> std::result::Result<Response, RemoteCacheError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let (api_status, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => (envelope.error.status, envelope.error.message),
        Err(_) => (None, body),
    };
    Err(classify_error(status, api_status.as_deref(), &message))
}

/// Map an HTTP failure onto the typed error set.
pub(crate) fn classify_error(
    status: StatusCode,
    api_status: Option<&str>,
    message: &str,
) -> RemoteCacheError {
    if status == StatusCode::NOT_FOUND || api_status == Some("NOT_FOUND") {
        return RemoteCacheError::NotFound(message.to_string());
    }
    let lowered = message.to_lowercase();
    if status == StatusCode::BAD_REQUEST
        && BELOW_MINIMUM_MARKERS.iter().any(|m| lowered.contains(m))
    {
        return RemoteCacheError::BelowMinimumSize(message.to_string());
    }
    RemoteCacheError::Transient(format!("HTTP {}: {message}", status.as_u16()))
}

/// The API wants `models/<name>`; callers usually pass the bare name.
fn qualified_model(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

fn ttl_string(ttl: Duration) -> String {
    format!("{}s", ttl.as_secs())
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct CreateCachedContentRequest {
    model: String,
    contents: Vec<WireContent>,
    ttl: String,
}

#[derive(Serialize)]
struct UpdateTtlRequest {
    ttl: String,
}

#[derive(Serialize)]
struct WireContent {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart {
    Text {
        text: String,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: WireFileData,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireFileData {
    file_uri: String,
    mime_type: String,
}

impl From<&ContentPart> for WirePart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => WirePart::Text { text: text.clone() },
            ContentPart::File { uri, mime_type } => WirePart::File {
                file_data: WireFileData {
                    file_uri: uri.clone(),
                    mime_type: mime_type.clone(),
                },
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedContentResponse {
    name: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    expire_time: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}
