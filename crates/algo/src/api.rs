//! REST client for the worker's unary HTTP endpoints.
//!
//! Single attempts only; retry, admission and health tracking are layered
//! on top by [`crate::client::AlgoClient`].

use epdd_core::scheme::Scheme;

use crate::error::RpcError;
use crate::messages::{Ack, CancelResponse, CancelTask, HealthStatus, SchemeList, SubmitTask};

/// HTTP client for a single worker.
#[derive(Clone)]
pub struct AlgoApi {
    client: reqwest::Client,
    api_url: String,
}

impl AlgoApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:50051`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// `GET /schemes`
    pub async fn list_schemes(&self) -> Result<Vec<Scheme>, RpcError> {
        let response = self
            .client
            .get(format!("{}/schemes", self.api_url))
            .send()
            .await?;

        let list: SchemeList = Self::parse_response(response).await?;
        Ok(list.schemes)
    }

    /// `POST /tasks`
    pub async fn submit_task(&self, task: &SubmitTask) -> Result<Ack, RpcError> {
        let response = self
            .client
            .post(format!("{}/tasks", self.api_url))
            .json(task)
            .send()
            .await?;

        let ack: Ack = Self::parse_response(response).await?;
        if !ack.success {
            return Err(RpcError::Permanent {
                status: 200,
                message: format!("worker refused task: {}", ack.message),
            });
        }
        Ok(ack)
    }

    /// `POST /tasks/{id}/cancel`
    pub async fn cancel_task(&self, task_id: &str, force: bool) -> Result<CancelResponse, RpcError> {
        let response = self
            .client
            .post(format!("{}/tasks/{}/cancel", self.api_url, task_id))
            .json(&CancelTask { force })
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// `GET /health`
    pub async fn check_health(&self) -> Result<HealthStatus, RpcError> {
        let response = self
            .client
            .get(format!("{}/health", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Map a non-2xx status to [`RpcError`], keeping the body for debugging.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RpcError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RpcError::from_status(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RpcError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
