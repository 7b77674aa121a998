use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{utils, ContractArtifact};
use crate::config::ArtifactConfig;
use crate::error::{InteractionError, InteractionResult};

/// Where deployed contract addresses and ABIs come from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, contract_name: &str) -> InteractionResult<ContractArtifact>;
}

/// Record shape served by the contract registry: `{id, name, address, artifact}`,
/// where `artifact` is the Hardhat build output.
#[derive(Debug, Deserialize)]
struct ContractRecord {
    address: String,
    #[serde(default)]
    artifact: Option<BuildArtifact>,
}

#[derive(Debug, Deserialize)]
struct BuildArtifact {
    #[serde(default)]
    abi: Option<Vec<Value>>,
}

impl ContractRecord {
    fn into_artifact(self, contract_name: &str) -> ContractArtifact {
        let abi = self.artifact.and_then(|artifact| artifact.abi);
        if abi.is_none() {
            warn!(
                "Artifact for {} carries no ABI; its catalogs will be empty",
                contract_name
            );
        }

        ContractArtifact {
            name: contract_name.to_string(),
            address: self.address,
            abi: abi.unwrap_or_default(),
        }
    }
}

/// Fetches artifacts from the contract registry over HTTP
#[derive(Debug, Clone)]
pub struct HttpArtifactSource {
    client: Client,
    api_url: String,
}

impl HttpArtifactSource {
    pub fn new(config: &ArtifactConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
        })
    }

    fn endpoint(&self, contract_name: &str) -> String {
        format!("{}/{}", self.api_url.trim_end_matches('/'), contract_name)
    }

    fn unavailable(contract_name: &str, error: impl ToString) -> InteractionError {
        InteractionError::ArtifactUnavailable {
            contract: contract_name.to_string(),
            reason: utils::interpret_artifact_error(&error.to_string(), contract_name),
        }
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn fetch(&self, contract_name: &str) -> InteractionResult<ContractArtifact> {
        let url = self.endpoint(contract_name);
        info!("Fetching artifact for {} from {}", contract_name, url);

        let record: ContractRecord = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| Self::unavailable(contract_name, e))?
            .json()
            .await
            .map_err(|e| Self::unavailable(contract_name, e))?;

        let artifact = record.into_artifact(contract_name);
        debug!(
            "Artifact for {} at {} with {} ABI entries",
            contract_name,
            artifact.address,
            artifact.abi.len()
        );
        Ok(artifact)
    }
}
