use alloy::primitives::U256;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{
    abi::{parse_descriptor, InterfaceCatalog},
    artifact::ArtifactSource,
    convert::{convert_arguments, TypedArgument},
    events::SubscriptionManager,
    log::InteractionLog,
    params::{AccountContext, ParameterStore},
    provider::ChainTransport,
    utils, ContractArtifact,
};
use crate::error::{InteractionError, InteractionResult};

/// Enumerating more tokens than this is refused rather than issuing that many reads.
const MAX_ENUMERATED_TOKENS: u64 = 10_000;

/// One token held by the connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnedToken {
    pub id: String,
    pub uri: String,
}

/// Everything the console holds for the currently selected contract.
///
/// Opened on contract selection; `shutdown` cancels every live subscription
/// and must run before the session is replaced.
pub struct ContractSession {
    contract: Arc<ContractArtifact>,
    catalog: Arc<InterfaceCatalog>,
    transport: Arc<dyn ChainTransport>,
    account: Arc<AccountContext>,
    params: Arc<ParameterStore>,
    log: Arc<InteractionLog>,
    subscriptions: SubscriptionManager,
}

impl ContractSession {
    pub async fn open(
        contract_name: &str,
        artifacts: &dyn ArtifactSource,
        transport: Arc<dyn ChainTransport>,
        account: Arc<AccountContext>,
        params: Arc<ParameterStore>,
        log_capacity: usize,
    ) -> InteractionResult<Self> {
        let artifact = artifacts.fetch(contract_name).await?;
        Self::from_artifact(artifact, transport, account, params, log_capacity)
    }

    pub fn from_artifact(
        artifact: ContractArtifact,
        transport: Arc<dyn ChainTransport>,
        account: Arc<AccountContext>,
        params: Arc<ParameterStore>,
        log_capacity: usize,
    ) -> InteractionResult<Self> {
        let catalog = Arc::new(parse_descriptor(&artifact.abi)?);
        let contract = Arc::new(artifact);
        let log = Arc::new(InteractionLog::new(log_capacity));

        info!(
            "Opened {} at {}: {} functions, {} events",
            contract.name,
            contract.address,
            catalog.functions().len(),
            catalog.events().len()
        );

        let subscriptions = SubscriptionManager::new(
            contract.clone(),
            catalog.clone(),
            transport.clone(),
            log.clone(),
        );

        Ok(Self {
            contract,
            catalog,
            transport,
            account,
            params,
            log,
            subscriptions,
        })
    }

    pub fn contract(&self) -> &ContractArtifact {
        &self.contract
    }

    pub fn catalog(&self) -> &InterfaceCatalog {
        &self.catalog
    }

    pub fn log(&self) -> &InteractionLog {
        &self.log
    }

    pub fn set_param(&self, function: &str, parameter: &str, text: &str) {
        self.params.set(function, parameter, text);
    }

    /// Runs `function` with the stored parameter values.
    ///
    /// Every failure is written to the log as well as returned.
    pub async fn invoke(&self, function: &str) -> InteractionResult<()> {
        let outcome = self.dispatch(function).await;
        if let Err(e) = &outcome {
            error!("Call to {} failed: {}", function, e);
            self.log.error(format!("invoke {}", function), e);
        }
        outcome
    }

    async fn dispatch(&self, key: &str) -> InteractionResult<()> {
        let function = self.catalog.find_function(key)?;
        let args = convert_arguments(&self.params.values_for(&function.name), function)?;
        let account = self.account.current();

        debug!(
            "Invoking {} with {}",
            function.signature(),
            serde_json::Value::Array(args.iter().map(TypedArgument::to_json).collect())
        );

        if function.mutability.is_read_only() {
            let result = self
                .transport
                .read(&self.contract, function, &args, account.as_deref())
                .await?;
            self.log.text(format!(
                "{} Result: {}",
                function.name,
                utils::display_value(&result)
            ));
        } else {
            let from = account.ok_or(InteractionError::AccountUnavailable)?;
            let gas = self
                .transport
                .estimate_gas(&self.contract, function, &args, &from)
                .await?;

            info!("Sending {} from {} with gas {}", function.signature(), from, gas);
            let receipt = self
                .transport
                .send(&self.contract, function, &args, &from, gas)
                .await?;
            self.log.result(receipt);
        }

        Ok(())
    }

    /// Lists the connected account's tokens through the enumerable
    /// `balanceOf`, `tokenOfOwnerByIndex` and `tokenURI` reads.
    ///
    /// The listing is logged as one result; failures are logged and returned.
    pub async fn owned_tokens(&self) -> InteractionResult<Vec<OwnedToken>> {
        match self.enumerate_tokens().await {
            Ok((owner, tokens)) => {
                self.log.result(json!({"owner": owner, "tokens": tokens}));
                Ok(tokens)
            }
            Err(e) => {
                error!("Listing owned tokens failed: {}", e);
                self.log.error("list owned tokens", &e);
                Err(e)
            }
        }
    }

    async fn enumerate_tokens(&self) -> InteractionResult<(String, Vec<OwnedToken>)> {
        let balance_of = self.catalog.find_function("balanceOf(address)")?;
        let by_index = self
            .catalog
            .find_function("tokenOfOwnerByIndex(address,uint256)")?;
        let token_uri = self.catalog.find_function("tokenURI(uint256)")?;
        let owner = self
            .account
            .current()
            .ok_or(InteractionError::AccountUnavailable)?;
        let from = Some(owner.as_str());

        let balance = self
            .transport
            .read(
                &self.contract,
                balance_of,
                &[TypedArgument::Address(owner.clone())],
                from,
            )
            .await?;
        let balance = uint_result(&balance, "balanceOf")?;
        if balance > U256::from(MAX_ENUMERATED_TOKENS) {
            return Err(InteractionError::transport(
                "balanceOf",
                format!(
                    "{} holds {} tokens, more than the {} that can be listed",
                    owner, balance, MAX_ENUMERATED_TOKENS
                ),
            ));
        }
        let count = balance.as_limbs()[0];
        debug!("{} holds {} tokens on {}", owner, count, self.contract.name);

        let mut tokens = Vec::new();
        for index in 0..count {
            let id = self
                .transport
                .read(
                    &self.contract,
                    by_index,
                    &[
                        TypedArgument::Address(owner.clone()),
                        TypedArgument::Uint(U256::from(index), 256),
                    ],
                    from,
                )
                .await?;
            let id = uint_result(&id, "tokenOfOwnerByIndex")?;

            let uri = self
                .transport
                .read(
                    &self.contract,
                    token_uri,
                    &[TypedArgument::Uint(id, 256)],
                    from,
                )
                .await?;

            tokens.push(OwnedToken {
                id: id.to_string(),
                uri: utils::display_value(&uri),
            });
        }

        Ok((owner, tokens))
    }

    /// Failures are logged as well as returned.
    pub async fn subscribe(&self, event: &str) -> InteractionResult<bool> {
        let outcome = self.subscriptions.subscribe(event).await;
        if let Err(e) = &outcome {
            error!("Subscribing to {} failed: {}", event, e);
            self.log.error(format!("subscribe {}", event), e);
        }
        outcome
    }

    pub async fn unsubscribe(&self, event: &str) -> bool {
        self.subscriptions.unsubscribe(event).await
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.active().await
    }

    pub async fn is_subscribed(&self, event: &str) -> bool {
        self.subscriptions.is_subscribed(event).await
    }

    pub async fn shutdown(&self) {
        info!("Closing session for {}", self.contract.name);
        self.subscriptions.shutdown().await;
    }
}

/// Decoded unsigned results arrive as decimal strings.
fn uint_result(value: &Value, function: &str) -> InteractionResult<U256> {
    let parsed = match value {
        Value::String(text) => text.trim().parse::<U256>().ok(),
        Value::Number(n) => n.as_u64().map(U256::from),
        _ => None,
    };
    parsed.ok_or_else(|| {
        InteractionError::transport(
            "decode",
            format!("{} returned {}, not an unsigned integer", function, value),
        )
    })
}
