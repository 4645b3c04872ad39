use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    error::QueryError,
    protocol::{PageResult, QueryRequest},
};
use tracing::debug;
use url::Url;

pub const QUERY_PATH: &str = "/api/query";

/// The backend query endpoint, seen as a plain request/response service.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> std::result::Result<PageResult, QueryError>;
}

pub struct HttpQueryService {
    http: Client,
    endpoint: Url,
}

impl HttpQueryService {
    pub fn new(server_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), server_url)
    }

    pub fn with_client(http: Client, server_url: &str) -> Result<Self> {
        let base = Url::parse(server_url.trim())
            .with_context(|| format!("invalid server url '{server_url}'"))?;
        let endpoint = base
            .join(QUERY_PATH)
            .with_context(|| format!("failed to build query endpoint from '{server_url}'"))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl QueryService for HttpQueryService {
    async fn query(&self, request: &QueryRequest) -> std::result::Result<PageResult, QueryError> {
        debug!(
            "query: POST {} page={} limit={}",
            self.endpoint, request.page, request.limit
        );
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|err| QueryError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| QueryError::Transport(err.to_string()))?;
        serde_json::from_slice(&body).map_err(|err| QueryError::Decode(err.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/service_tests.rs"]
mod tests;
