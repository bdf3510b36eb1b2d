use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::types::{
  CardPosition, DecisionRequest, DecisionResponse, PublicKeyResponse, ReorderRequest,
  TablePayload,
};
use super::RemoteApi;
use crate::cache::RecordId;
use crate::config::ApiConfig;
use crate::error::{CacheError, Result};

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 500;

/// REST client for the task-management API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpApi {
  client: Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpApi {
  pub fn new(config: &ApiConfig, token: Option<String>) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| CacheError::Config(format!("Failed to build HTTP client: {}", e)))?;

    // A trailing slash keeps `join` from dropping the last path segment.
    let mut base = config.url.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url = Url::parse(&base)
      .map_err(|e| CacheError::Config(format!("Invalid API url {}: {}", config.url, e)))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| CacheError::Config(format!("Invalid endpoint {}: {}", path, e)))
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  /// Send a request, backing off and retrying while the server answers 429.
  async fn send<F>(&self, build: F) -> Result<Response>
  where
    F: Fn() -> RequestBuilder,
  {
    let mut retries = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
      let response = self.authorize(build()).send().await?;
      let status = response.status();

      if status.is_success() {
        return Ok(response);
      }

      if status == StatusCode::TOO_MANY_REQUESTS && retries < MAX_RATE_LIMIT_RETRIES {
        retries += 1;
        warn!(retry = retries, backoff_ms, "Rate limited, backing off");
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms *= 2;
        continue;
      }

      let body = response.text().await.unwrap_or_default();
      return Err(CacheError::from_status(status, &body));
    }
  }

  async fn json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
  }
}

#[async_trait]
impl RemoteApi for HttpApi {
  async fn fetch_table(&self, resource: &str, since: Option<&str>) -> Result<Vec<Value>> {
    let mut url = self.endpoint(resource)?;
    if let Some(since) = since {
      url.query_pairs_mut().append_pair("updated_since", since);
    }

    debug!(url = %url, "Fetching table");
    let response = self.send(|| self.client.get(url.clone())).await?;
    let payload: TablePayload = Self::json(response).await?;
    Ok(payload.into_rows())
  }

  async fn decide_approval(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
    let url = self.endpoint("approvals/decide")?;
    let response = self
      .send(|| self.client.post(url.clone()).json(request))
      .await?;
    Self::json(response).await
  }

  async fn reorder_kpi_cards(&self, cards: &[CardPosition]) -> Result<()> {
    let url = self.endpoint("kpi-cards/reorder")?;
    let body = ReorderRequest { cards };
    self
      .send(|| self.client.post(url.clone()).json(&body))
      .await?;
    Ok(())
  }

  async fn delete_task(&self, id: &RecordId) -> Result<()> {
    let url = self.endpoint(&format!("tasks/{}", id))?;
    self.send(|| self.client.delete(url.clone())).await?;
    Ok(())
  }

  async fn restore_task(&self, task: &Value) -> Result<Value> {
    let url = self.endpoint("tasks/restore")?;
    let response = self
      .send(|| self.client.post(url.clone()).json(task))
      .await?;
    Self::json(response).await
  }

  async fn fetch_public_key(&self) -> Result<String> {
    let url = self.endpoint("crypto/public-key")?;
    let response = self.send(|| self.client.get(url.clone())).await?;
    let key: PublicKeyResponse = Self::json(response).await?;
    Ok(key.public_key)
  }
}
