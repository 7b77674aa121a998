use anyhow::Result;
use rmcp::{
    model::{ServerCapabilities, ServerInfo},
    tool,
    transport::stdio,
    ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    ethereum::{
        artifact::{ArtifactSource, HttpArtifactSource},
        contract::ContractSession,
        params::{AccountContext, ParameterStore},
        provider::{AlloyTransport, ChainTransport},
    },
};

#[derive(Clone)]
pub struct AbiConsoleServer {
    config: Arc<Config>,
    artifacts: Arc<dyn ArtifactSource>,
    transport: Arc<dyn ChainTransport>,
    account: Arc<AccountContext>,
    params: Arc<ParameterStore>,
    session: Arc<RwLock<Option<Arc<ContractSession>>>>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct SelectContractRequest {
    name: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct SetParamRequest {
    function: String,
    parameter: String,
    value: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct InvokeRequest {
    function: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct EventRequest {
    event: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct ReadLogRequest {
    since: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct SetAccountRequest {
    account: Option<String>,
}

const NO_CONTRACT: &str = "Error: No contract selected. Use select_contract first.";

impl AbiConsoleServer {
    pub async fn new(config: Config) -> Result<Self> {
        let transport = AlloyTransport::new(&config.chain)?;
        if !transport.check_connection().await {
            warn!(
                "RPC endpoint {} is not reachable yet; calls will fail until it is",
                config.chain.rpc_url
            );
        }
        let artifacts = HttpArtifactSource::new(&config.artifacts)?;
        Ok(Self::with_backends(
            config,
            Arc::new(artifacts),
            Arc::new(transport),
        ))
    }

    fn with_backends(
        config: Config,
        artifacts: Arc<dyn ArtifactSource>,
        transport: Arc<dyn ChainTransport>,
    ) -> Self {
        let account = Arc::new(AccountContext::new(config.session.account.clone()));

        Self {
            config: Arc::new(config),
            artifacts,
            transport,
            account,
            params: Arc::new(ParameterStore::new()),
            session: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!("Starting ABI console server");

        if let Some(name) = self.config.session.default_contract.clone() {
            if let Err(e) = self.open_contract(&name).await {
                warn!("Could not open default contract {}: {}", name, e);
            }
        }

        let service = self.clone().serve(stdio()).await?;

        info!("ABI console server started successfully");
        let _ = service.waiting().await;

        if let Some(session) = self.session.write().await.take() {
            session.shutdown().await;
        }
        Ok(())
    }

    /// Opens `name` and, once that succeeds, shuts the previous session down.
    async fn open_contract(&self, name: &str) -> Result<Arc<ContractSession>> {
        let session = Arc::new(
            ContractSession::open(
                name,
                self.artifacts.as_ref(),
                self.transport.clone(),
                self.account.clone(),
                self.params.clone(),
                self.config.session.log_capacity,
            )
            .await?,
        );

        let previous = self.session.write().await.replace(session.clone());
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
        Ok(session)
    }

    async fn current(&self) -> Option<Arc<ContractSession>> {
        self.session.read().await.clone()
    }
}

fn to_pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "Failed to serialize result".to_string())
}

#[tool(tool_box)]
impl AbiConsoleServer {
    #[tool(description = "Load a contract by name from the artifact service and list its interface")]
    async fn select_contract(&self, #[tool(aggr)] request: SelectContractRequest) -> String {
        match self.open_contract(&request.name).await {
            Ok(session) => to_pretty(&json!({
                "name": session.contract().name,
                "address": session.contract().address,
                "functions": session.catalog().functions().len(),
                "events": session.catalog().events().len(),
            })),
            Err(e) => {
                error!("Failed to select contract {}: {}", request.name, e);
                format!("Error: {}", e)
            }
        }
    }

    #[tool(description = "List the contract's functions with their inputs and stored parameter values")]
    async fn list_functions(&self) -> String {
        let Some(session) = self.current().await else {
            return NO_CONTRACT.to_string();
        };

        let functions: Vec<Value> = session
            .catalog()
            .functions()
            .iter()
            .map(|function| {
                json!({
                    "name": function.name,
                    "signature": function.signature(),
                    "mutability": function.mutability,
                    "inputs": function.inputs,
                    "outputs": function.outputs,
                    "values": self.params.values_for(&function.name),
                })
            })
            .collect();
        to_pretty(&functions)
    }

    #[tool(description = "List the contract's events and whether each is subscribed")]
    async fn list_events(&self) -> String {
        let Some(session) = self.current().await else {
            return NO_CONTRACT.to_string();
        };

        let mut events = Vec::new();
        for event in session.catalog().events() {
            events.push(json!({
                "name": event.name,
                "signature": event.signature(),
                "anonymous": event.anonymous,
                "inputs": event.inputs,
                "subscribed": session.is_subscribed(&event.signature()).await,
            }));
        }
        to_pretty(&events)
    }

    #[tool(description = "Store the raw text for one function parameter")]
    async fn set_param(&self, #[tool(aggr)] request: SetParamRequest) -> String {
        match self.current().await {
            Some(session) => session.set_param(&request.function, &request.parameter, &request.value),
            None => self
                .params
                .set(&request.function, &request.parameter, request.value.clone()),
        }
        format!("Set {}.{}", request.function, request.parameter)
    }

    #[tool(description = "Call a contract function with its stored parameter values")]
    async fn invoke(&self, #[tool(aggr)] request: InvokeRequest) -> String {
        let Some(session) = self.current().await else {
            return NO_CONTRACT.to_string();
        };

        let mark = session.log().next_seq();
        match session.invoke(&request.function).await {
            Ok(()) => to_pretty(&session.log().entries_since(mark)),
            Err(e) => format!("Error: {}", e),
        }
    }

    #[tool(description = "Subscribe to a contract event; deliveries are appended to the log")]
    async fn subscribe(&self, #[tool(aggr)] request: EventRequest) -> String {
        let Some(session) = self.current().await else {
            return NO_CONTRACT.to_string();
        };

        match session.subscribe(&request.event).await {
            Ok(true) => format!("Subscribed to {}", request.event),
            Ok(false) => format!("Already subscribed to {}", request.event),
            Err(e) => format!("Error: {}", e),
        }
    }

    #[tool(description = "Cancel a contract event subscription")]
    async fn unsubscribe(&self, #[tool(aggr)] request: EventRequest) -> String {
        let Some(session) = self.current().await else {
            return NO_CONTRACT.to_string();
        };

        if session.unsubscribe(&request.event).await {
            format!("Unsubscribed from {}", request.event)
        } else {
            format!("Not subscribed to {}", request.event)
        }
    }

    #[tool(description = "Read interaction log entries, optionally only those with seq >= since")]
    async fn read_log(&self, #[tool(aggr)] request: ReadLogRequest) -> String {
        let Some(session) = self.current().await else {
            return NO_CONTRACT.to_string();
        };

        let entries = session.log().entries_since(request.since.unwrap_or(0));
        to_pretty(&json!({
            "next_seq": session.log().next_seq(),
            "subscriptions": session.subscriptions().await,
            "entries": entries,
        }))
    }

    #[tool(description = "List the tokens the connected account owns on an enumerable token contract")]
    async fn list_owned_tokens(&self) -> String {
        let Some(session) = self.current().await else {
            return NO_CONTRACT.to_string();
        };

        match session.owned_tokens().await {
            Ok(tokens) => to_pretty(&tokens),
            Err(e) => format!("Error: {}", e),
        }
    }

    #[tool(description = "Set or clear the account used as sender for calls")]
    async fn set_account(&self, #[tool(aggr)] request: SetAccountRequest) -> String {
        self.account.set(request.account);
        match self.account.current() {
            Some(account) => format!("Account set to {}", account),
            None => "Account cleared".to_string(),
        }
    }
}

#[tool(tool_box)]
impl ServerHandler for AbiConsoleServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some("ABI-driven contract console. Select a contract, set parameter values, invoke functions (view/pure via eth_call, others via estimate + send), subscribe to events and list owned tokens; results accumulate in the interaction log.".into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
