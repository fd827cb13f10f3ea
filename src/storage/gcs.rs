//! Google Cloud Storage client over the JSON API.
//!
//! Auth is deliberately thin: a pre-issued bearer token from `STORAGE_TOKEN`,
//! or the Cloud Run / GCE metadata server. Anything fancier (service-account
//! key exchange) belongs to the deployment environment, not this job.

use super::{BlobStore, StoreError};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

pub const ENV_STORAGE_TOKEN: &str = "STORAGE_TOKEN";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

/// GCS-backed blob store scoped to one bucket.
pub struct GcsStore {
    http: reqwest::Client,
    bucket: String,
    token: String,
}

impl GcsStore {
    /// Resolve credentials and build the client.
    ///
    /// Token resolution: `STORAGE_TOKEN` env var, then the instance metadata
    /// server (the Cloud Run default identity). Failure of both is the
    /// fatal-before-crawl auth case.
    pub async fn authenticate(bucket: impl Into<String>) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        if let Ok(token) = std::env::var(ENV_STORAGE_TOKEN) {
            let token = token.trim().to_string();
            if !token.is_empty() {
                info!("✅ Authenticated with {} token", ENV_STORAGE_TOKEN);
                return Ok(Self {
                    http,
                    bucket: bucket.into(),
                    token,
                });
            }
        }

        match Self::metadata_token(&http).await {
            Ok(token) => {
                info!("✅ Authenticated with instance default identity");
                Ok(Self {
                    http,
                    bucket: bucket.into(),
                    token,
                })
            }
            Err(e) => Err(StoreError::Auth(format!(
                "no {} set and metadata server unreachable: {}",
                ENV_STORAGE_TOKEN, e
            ))),
        }
    }

    async fn metadata_token(http: &reqwest::Client) -> Result<String, StoreError> {
        let resp = http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StoreError::Auth(format!(
                "metadata server returned {}",
                resp.status()
            )));
        }
        let token: MetadataToken = resp.json().await?;
        Ok(token.access_token)
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "https://storage.googleapis.com/storage/v1/b/{}/o/{}",
            self.bucket,
            utf8_percent_encode(name, NON_ALPHANUMERIC)
        )
    }

    fn upload_url(&self, name: &str) -> String {
        format!(
            "https://storage.googleapis.com/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.bucket,
            utf8_percent_encode(name, NON_ALPHANUMERIC)
        )
    }
}

#[async_trait]
impl BlobStore for GcsStore {
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        let resp = self
            .http
            .get(self.object_url(name))
            .bearer_auth(&self.token)
            .send()
            .await?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(StoreError::UnexpectedStatus {
                status,
                object: name.to_string(),
            }),
        }
    }

    async fn put(&self, name: &str, content: &str) -> Result<(), StoreError> {
        let resp = self
            .http
            .post(self.upload_url(name))
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "text/html")
            .body(content.to_string())
            .send()
            .await?;
        let status = resp.status().as_u16();
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(StoreError::UnexpectedStatus {
                status,
                object: name.to_string(),
            })
        }
    }
}
