//! HTTP implementation of the remote service contract.
//!
//! Each entity type maps to one REST resource named after `Entity::NAME`:
//!
//! - `GET    {base}/{name}`        fetch every entity
//! - `PUT    {base}/{name}`        upsert one entity (JSON body)
//! - `DELETE {base}/{name}/{key}`  delete one entity

use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use super::{RemoteError, RemoteService};
use crate::reader::Entity;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// REST client for a remote entity service. Clones share one connection pool.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    initial_backoff: Duration,
}

impl RestClient {
    /// Create a new client for the service rooted at `base_url`
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Create a new client with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: Some(token),
            initial_backoff: self.initial_backoff,
        }
    }

    /// Override the first rate-limit backoff delay; it doubles on each retry.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url<E: Entity>(&self) -> String {
        format!("{}/{}", self.base_url, E::NAME)
    }

    fn entity_url<E: Entity>(&self, key: &E::Key) -> String {
        format!("{}/{}/{}", self.base_url, E::NAME, key)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// `Ok(None)` means rate limited; any other failure becomes a `RemoteError`.
    async fn accept(response: Response) -> Result<Option<Response>, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(Some(response));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(None);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status, &body))
    }

    /// Send a request, retrying with exponential backoff while rate limited.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<Response, RemoteError> {
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            let mut builder = self.request(method.clone(), url);
            if let Some(body) = body {
                builder = builder.json(body);
            }
            let response = builder.send().await?;

            match Self::accept(response).await? {
                Some(response) => return Ok(response),
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(RemoteError::RateLimited);
                    }
                    warn!(
                        url = url,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

impl<E: Entity> RemoteService<E> for RestClient {
    async fn put_entity(&self, entity: &E) -> Result<(), RemoteError> {
        let url = self.collection_url::<E>();
        debug!(url = %url, "PUT entity");
        self.send(Method::PUT, &url, Some(entity)).await?;
        Ok(())
    }

    async fn delete_by_id(&self, key: &E::Key) -> Result<(), RemoteError> {
        let url = self.entity_url::<E>(key);
        debug!(url = %url, "DELETE entity");
        self.send::<()>(Method::DELETE, &url, None).await?;
        Ok(())
    }

    async fn get_all_entities(&self) -> Result<Vec<E>, RemoteError> {
        let url = self.collection_url::<E>();
        debug!(url = %url, "GET entities");
        let response = self.send::<()>(Method::GET, &url, None).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e)))
    }
}
