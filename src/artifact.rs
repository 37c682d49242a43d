// =============================================================================
// Model artifacts — loading opaque model blobs from a URI
// =============================================================================
//
// Supported locations:
//   http:// and https://   fetched with reqwest (404 maps to ArtifactNotFound)
//   file:// or a bare path read from local disk
//   runs:/ models:/ s3://  tracking-server URIs; these need an external
//                          resolver and are reported as unreadable
//
// Artifacts are JSON documents tagged by "kind". A well-formed JSON document
// with an unknown shape is kept as an opaque model so that a custom
// `InferenceRunner` can still interpret it.
// =============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};

/// Logistic-regression style model: `sigmoid(bias + Σ wᵢ·xᵢ)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub bias: f64,
    /// Squash the linear term through a sigmoid. Disable to get raw output.
    #[serde(default = "default_logistic")]
    pub logistic: bool,
}

fn default_logistic() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelBody {
    Linear(LinearModel),
    /// Always predicts the stored value, numeric or not.
    Constant(serde_json::Value),
    Opaque(serde_json::Value),
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ArtifactDocument {
    Linear(LinearModel),
    Constant { score: serde_json::Value },
}

impl ModelBody {
    /// Parse artifact bytes.
    pub fn parse(uri: &str, bytes: &[u8]) -> CoreResult<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| CoreError::ArtifactUnreadable {
                uri: uri.to_string(),
                reason: format!("not a JSON document: {e}"),
            })?;
        match serde_json::from_value::<ArtifactDocument>(value.clone()) {
            Ok(ArtifactDocument::Linear(m)) => Ok(Self::Linear(m)),
            Ok(ArtifactDocument::Constant { score }) => Ok(Self::Constant(score)),
            Err(e) => {
                debug!(uri, error = %e, "artifact has no known kind, keeping as opaque");
                Ok(Self::Opaque(value))
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Linear(_) => "linear",
            Self::Constant(_) => "constant",
            Self::Opaque(_) => "opaque",
        }
    }
}

/// A deserialised model, shared read-only by every user on the same URI.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModel {
    pub uri: String,
    pub loaded_at: DateTime<Utc>,
    pub body: ModelBody,
}

pub type ModelHandle = Arc<LoadedModel>;

#[async_trait]
pub trait ArtifactLoader: Send + Sync {
    async fn load(&self, uri: &str) -> CoreResult<LoadedModel>;
}

// ---------------------------------------------------------------------------
// Default loader
// ---------------------------------------------------------------------------

enum Location {
    Http(String),
    File(PathBuf),
    Tracking,
}

fn locate(uri: &str) -> Location {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        Location::Http(uri.to_string())
    } else if let Some(path) = uri.strip_prefix("file://") {
        Location::File(PathBuf::from(path))
    } else if uri.starts_with("runs:/") || uri.starts_with("models:/") || uri.starts_with("s3://") {
        Location::Tracking
    } else {
        Location::File(PathBuf::from(uri))
    }
}

pub struct DefaultArtifactLoader {
    http: reqwest::Client,
}

impl DefaultArtifactLoader {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for artifact loader")?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn fetch(&self, uri: &str, url: &str) -> CoreResult<Vec<u8>> {
        let unreadable = |reason: String| CoreError::ArtifactUnreadable {
            uri: uri.to_string(),
            reason,
        };
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::ArtifactNotFound {
                uri: uri.to_string(),
            });
        }
        if !resp.status().is_success() {
            return Err(unreadable(format!("HTTP {}", resp.status())));
        }
        let bytes = resp.bytes().await.map_err(|e| unreadable(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ArtifactLoader for DefaultArtifactLoader {
    async fn load(&self, uri: &str) -> CoreResult<LoadedModel> {
        let bytes = match locate(uri) {
            Location::Http(url) => self.fetch(uri, &url).await?,
            Location::File(path) => match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(CoreError::ArtifactNotFound {
                        uri: uri.to_string(),
                    })
                }
                Err(e) => {
                    return Err(CoreError::ArtifactUnreadable {
                        uri: uri.to_string(),
                        reason: e.to_string(),
                    })
                }
            },
            Location::Tracking => {
                return Err(CoreError::ArtifactUnreadable {
                    uri: uri.to_string(),
                    reason: "tracking-server URIs require an external resolver".into(),
                })
            }
        };

        let body = ModelBody::parse(uri, &bytes)?;
        info!(uri, kind = body.kind(), bytes = bytes.len(), "model artifact loaded");
        Ok(LoadedModel {
            uri: uri.to_string(),
            loaded_at: Utc::now(),
            body,
        })
    }
}
