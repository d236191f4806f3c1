use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{KnowledgeStore, RetrievalRequest};
use crate::config::{connect_timeout, KnowledgeStoreConfig};
use crate::types::{ProgramSummary, RetrievalCandidate};

/// PostgREST-style client: hybrid matching runs as a stored procedure under
/// `/rpc/{function}`, the program catalogue is a plain table or view.
pub struct RpcKnowledgeStore {
    base_url: String,
    rpc_function: String,
    programs_view: String,
    api_key: Option<String>,
    client: Client,
}

impl RpcKnowledgeStore {
    pub fn new(config: &KnowledgeStoreConfig, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout(Duration::from_secs(config.timeout_secs)))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rpc_function: config.rpc_function.clone(),
            programs_view: config.programs_view.clone(),
            api_key,
            client,
        })
    }

    pub fn from_config(config: &KnowledgeStoreConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        Self::new(config, api_key)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("apikey", key).bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl KnowledgeStore for RpcKnowledgeStore {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<RetrievalCandidate>> {
        let url = format!("{}/rpc/{}", self.base_url, self.rpc_function);
        let response = self
            .authorize(self.client.post(&url).json(request))
            .send()
            .await
            .with_context(|| format!("Knowledge store RPC {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Knowledge store error ({}): {}", status, body));
        }

        let rows: Vec<RetrievalCandidate> = response
            .json()
            .await
            .context("Failed to parse knowledge store rows")?;
        tracing::debug!(rows = rows.len(), match_count = request.match_count, "Knowledge store RPC returned");
        Ok(rows)
    }

    async fn list_programs(&self) -> Result<Vec<ProgramSummary>> {
        let url = format!(
            "{}/{}?select=degree,degree_level,university",
            self.base_url, self.programs_view
        );
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .with_context(|| format!("Program listing {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Program listing error ({}): {}", status, body));
        }

        response
            .json()
            .await
            .context("Failed to parse program listing")
    }
}
