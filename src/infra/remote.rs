//! HTTP client for the remote search backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use tracing::debug;
use url::Url;

use spola_api_types::{DeltaPayload, TaxonomyNotification};

use crate::application::delivery::{DeliveryError, RemoteBackend};
use crate::config::RemoteSettings;

use super::error::InfraError;

pub struct RemoteBackendClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl RemoteBackendClient {
    pub fn new(settings: &RemoteSettings) -> Result<Self, InfraError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|err| InfraError::configuration(format!("invalid remote base url: {err}")))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|err| InfraError::remote(err.to_string()))?;

        Ok(Self {
            http,
            base_url,
            api_key: settings.api_key.clone(),
        })
    }

    pub fn into_backend(self) -> Arc<dyn RemoteBackend> {
        Arc::new(self)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DeliveryError> {
        self.base_url
            .join(path)
            .map_err(|err| DeliveryError::Remote(format!("invalid endpoint `{path}`: {err}")))
    }

    async fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<(), DeliveryError> {
        let url = self.endpoint(path)?;
        let mut request = self.http.post(url.clone()).json(body);
        if let Some(key) = &self.api_key {
            request = request.header(header::AUTHORIZATION, format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|err| DeliveryError::Remote(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Remote(format!(
                "{path} returned {status}: {body}"
            )));
        }

        debug!(%url, "remote backend accepted payload");
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for RemoteBackendClient {
    async fn push_delta(&self, delta: &DeltaPayload) -> Result<(), DeliveryError> {
        self.post_json("sync/deltas", delta).await
    }

    async fn notify_taxonomy(
        &self,
        notification: &TaxonomyNotification,
    ) -> Result<(), DeliveryError> {
        self.post_json("sync/taxonomy", notification).await
    }
}
