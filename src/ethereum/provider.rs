use alloy::{
    dyn_abi::{DynSolValue, EventExt, FunctionExt, JsonAbiExt},
    json_abi::{Event, EventParam, Function, Param, StateMutability},
    network::TransactionBuilder,
    primitives::{Address, Bytes, U256},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Filter, Log, TransactionRequest},
    transports::{
        http::{Client, Http},
        TransportResult,
    },
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use super::{
    abi::{EventEntry, FunctionEntry, Mutability, Parameter},
    convert::TypedArgument,
    utils, ContractArtifact, EventDelivery,
};
use crate::config::ChainConfig;
use crate::error::{InteractionError, InteractionResult};

const DELIVERY_BUFFER: usize = 256;

/// Cancels one live event stream.
#[async_trait]
pub trait SubscriptionHandle: Send + Sync {
    /// Stops delivery. Calling it again after the first call is a no-op.
    async fn cancel(&mut self) -> InteractionResult<()>;
}

pub struct EventStream {
    pub deliveries: mpsc::Receiver<EventDelivery>,
    pub handle: Box<dyn SubscriptionHandle>,
}

/// The chain operations the console needs. It never manages connections itself.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    async fn read(
        &self,
        contract: &ContractArtifact,
        function: &FunctionEntry,
        args: &[TypedArgument],
        from: Option<&str>,
    ) -> InteractionResult<Value>;

    async fn estimate_gas(
        &self,
        contract: &ContractArtifact,
        function: &FunctionEntry,
        args: &[TypedArgument],
        from: &str,
    ) -> InteractionResult<u64>;

    /// Broadcasts the call and waits for its receipt.
    async fn send(
        &self,
        contract: &ContractArtifact,
        function: &FunctionEntry,
        args: &[TypedArgument],
        from: &str,
        gas: u64,
    ) -> InteractionResult<Value>;

    async fn subscribe_event(
        &self,
        contract: &ContractArtifact,
        event: &EventEntry,
    ) -> InteractionResult<EventStream>;
}

/// JSON-RPC transport over HTTP. Events are delivered by polling an installed log filter.
#[derive(Debug, Clone)]
pub struct AlloyTransport {
    provider: RootProvider<Http<Client>>,
    poll_interval: Duration,
}

impl AlloyTransport {
    pub fn new(config: &ChainConfig) -> anyhow::Result<Self> {
        let provider = ProviderBuilder::new().on_http(config.rpc_url.parse()?);

        Ok(Self {
            provider,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        })
    }

    pub async fn check_connection(&self) -> bool {
        match self.provider.get_block_number().await {
            Ok(block) => {
                debug!("RPC endpoint reachable at block {}", block);
                true
            }
            Err(e) => {
                debug!("Connection check failed: {}", e);
                false
            }
        }
    }

    fn request(
        contract: &ContractArtifact,
        function: &Function,
        args: &[TypedArgument],
    ) -> InteractionResult<TransactionRequest> {
        let address = contract_address(contract)?;
        let calldata = encode_call(function, args)?;

        Ok(TransactionRequest::default()
            .to(address)
            .input(calldata.into()))
    }
}

#[async_trait]
impl ChainTransport for AlloyTransport {
    async fn read(
        &self,
        contract: &ContractArtifact,
        function: &FunctionEntry,
        args: &[TypedArgument],
        from: Option<&str>,
    ) -> InteractionResult<Value> {
        let abi_function = to_abi_function(function);
        let mut request = Self::request(contract, &abi_function, args)?;
        if let Some(from) = from {
            request = request.from(sender_address(from)?);
        }

        debug!("eth_call {} on {}", abi_function.signature(), contract.address);
        let result_bytes = self
            .provider
            .call(&request)
            .await
            .map_err(|e| rpc_failure("call", e))?;

        decode_output(&abi_function, &result_bytes)
    }

    async fn estimate_gas(
        &self,
        contract: &ContractArtifact,
        function: &FunctionEntry,
        args: &[TypedArgument],
        from: &str,
    ) -> InteractionResult<u64> {
        let abi_function = to_abi_function(function);
        let request = Self::request(contract, &abi_function, args)?.from(sender_address(from)?);

        let gas = self
            .provider
            .estimate_gas(&request)
            .await
            .map_err(|e| rpc_failure("estimateGas", e))?;

        debug!("Estimated {} gas for {}", gas, abi_function.signature());
        Ok(gas)
    }

    async fn send(
        &self,
        contract: &ContractArtifact,
        function: &FunctionEntry,
        args: &[TypedArgument],
        from: &str,
        gas: u64,
    ) -> InteractionResult<Value> {
        let abi_function = to_abi_function(function);
        let request = Self::request(contract, &abi_function, args)?
            .from(sender_address(from)?)
            .with_gas_limit(gas);

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(|e| rpc_failure("sendTransaction", e))?;

        let tx_hash = *pending.tx_hash();
        info!("Transaction sent with hash: {:?}", tx_hash);

        let receipt = pending.get_receipt().await.map_err(|e| {
            InteractionError::transport(
                "getReceipt",
                format!(
                    "Transaction was sent but confirmation failed: {}. Transaction hash: {:?}",
                    e, tx_hash
                ),
            )
        })?;

        serde_json::to_value(&receipt).map_err(|e| InteractionError::transport("getReceipt", e))
    }

    async fn subscribe_event(
        &self,
        contract: &ContractArtifact,
        event: &EventEntry,
    ) -> InteractionResult<EventStream> {
        let address = contract_address(contract)?;
        let abi_event = to_abi_event(event);

        let mut filter = Filter::new().address(address);
        if !event.anonymous {
            filter = filter.event_signature(abi_event.selector());
        }

        let filter_id = self
            .provider
            .new_filter(&filter)
            .await
            .map_err(|e| rpc_failure("newFilter", e))?;
        info!(
            "Installed filter {} for {} on {}",
            filter_id, event.name, contract.address
        );

        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(poll_filter(
            self.provider.clone(),
            filter_id,
            abi_event,
            self.poll_interval,
            tx,
            cancel_rx,
        ));

        Ok(EventStream {
            deliveries: rx,
            handle: Box::new(FilterSubscription {
                filter_id,
                cancel: Some(cancel_tx),
                task: Some(task),
            }),
        })
    }
}

async fn poll_filter(
    provider: RootProvider<Http<Client>>,
    filter_id: U256,
    event: Event,
    poll_interval: Duration,
    tx: mpsc::Sender<EventDelivery>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> TransportResult<bool> {
    let mut ticker = tokio::time::interval(poll_interval);

    'poll: loop {
        tokio::select! {
            // a dropped handle counts as a cancel
            _ = &mut cancel_rx => break 'poll,
            _ = ticker.tick() => {
                let deliveries = match provider.get_filter_changes::<Log>(filter_id).await {
                    Ok(logs) => logs
                        .iter()
                        .filter_map(|log| decode_log(&event, log))
                        .collect::<Vec<_>>(),
                    Err(e) => {
                        warn!("Polling filter {} for {} failed: {}", filter_id, event.name, e);
                        vec![EventDelivery::Error(utils::interpret_rpc_error(&e.to_string()))]
                    }
                };

                for delivery in deliveries {
                    if tx.send(delivery).await.is_err() {
                        debug!("Receiver for {} dropped, stopping poller", event.name);
                        break 'poll;
                    }
                }
            }
        }
    }

    provider
        .raw_request::<_, bool>("eth_uninstallFilter".into(), (filter_id,))
        .await
}

struct FilterSubscription {
    filter_id: U256,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<TransportResult<bool>>>,
}

#[async_trait]
impl SubscriptionHandle for FilterSubscription {
    async fn cancel(&mut self) -> InteractionResult<()> {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        match task.await {
            Ok(Ok(true)) => {
                debug!("Uninstalled filter {}", self.filter_id);
                Ok(())
            }
            Ok(Ok(false)) => Err(InteractionError::transport(
                "uninstallFilter",
                format!("node no longer knew filter {}", self.filter_id),
            )),
            Ok(Err(e)) => Err(rpc_failure("uninstallFilter", e)),
            Err(e) => Err(InteractionError::transport("uninstallFilter", e)),
        }
    }
}

fn rpc_failure(operation: &'static str, error: impl ToString) -> InteractionError {
    InteractionError::transport(operation, utils::interpret_rpc_error(&error.to_string()))
}

fn contract_address(contract: &ContractArtifact) -> InteractionResult<Address> {
    utils::validate_address(&contract.address).map_err(|e| {
        InteractionError::transport(
            "resolveContract",
            format!("contract '{}': {}", contract.name, e),
        )
    })
}

fn sender_address(from: &str) -> InteractionResult<Address> {
    utils::validate_address(from)
        .map_err(|e| InteractionError::transport("resolveSender", format!("{}", e)))
}

fn to_abi_param(param: &Parameter) -> Param {
    Param {
        ty: param.declared_type.clone(),
        name: param.name.clone(),
        components: param.components.iter().map(to_abi_param).collect(),
        internal_type: None,
    }
}

fn to_abi_function(function: &FunctionEntry) -> Function {
    Function {
        name: function.name.clone(),
        inputs: function.inputs.iter().map(to_abi_param).collect(),
        outputs: function.outputs.iter().map(to_abi_param).collect(),
        state_mutability: match function.mutability {
            Mutability::Pure => StateMutability::Pure,
            Mutability::View => StateMutability::View,
            Mutability::Nonpayable => StateMutability::NonPayable,
            Mutability::Payable => StateMutability::Payable,
        },
    }
}

fn to_abi_event(event: &EventEntry) -> Event {
    Event {
        name: event.name.clone(),
        inputs: event
            .inputs
            .iter()
            .map(|param| EventParam {
                ty: param.declared_type.clone(),
                name: param.name.clone(),
                indexed: param.indexed,
                components: param.components.iter().map(to_abi_param).collect(),
                internal_type: None,
            })
            .collect(),
        anonymous: event.anonymous,
    }
}

/// Address text is checked here, at encode time.
fn to_dyn_sol_value(arg: &TypedArgument) -> InteractionResult<DynSolValue> {
    Ok(match arg {
        TypedArgument::Address(text) => DynSolValue::Address(
            utils::validate_address(text).map_err(|e| InteractionError::transport("encode", e))?,
        ),
        TypedArgument::String(s) => DynSolValue::String(s.clone()),
        TypedArgument::Uint(n, bits) => DynSolValue::Uint(*n, *bits),
        TypedArgument::Int(n, bits) => DynSolValue::Int(*n, *bits),
        TypedArgument::Array(items) => DynSolValue::Array(
            items
                .iter()
                .map(to_dyn_sol_value)
                .collect::<InteractionResult<Vec<_>>>()?,
        ),
    })
}

fn encode_call(function: &Function, args: &[TypedArgument]) -> InteractionResult<Bytes> {
    let values = args
        .iter()
        .map(to_dyn_sol_value)
        .collect::<InteractionResult<Vec<_>>>()?;

    let encoded = function
        .abi_encode_input(&values)
        .map_err(|e| InteractionError::transport("encode", e))?;

    Ok(encoded.into())
}

fn decode_output(function: &Function, result_bytes: &Bytes) -> InteractionResult<Value> {
    if result_bytes.is_empty() {
        return Ok(Value::Null);
    }

    let decoded = function.abi_decode_output(result_bytes, false).map_err(|e| {
        InteractionError::transport(
            "decode",
            format!(
                "{} (raw result 0x{})",
                e,
                hex::encode(result_bytes)
            ),
        )
    })?;

    Ok(utils::dyn_sol_values_to_json(&decoded))
}

/// Decodes one filter log. Anonymous events carry no topic to filter on, so
/// logs that do not decode against them are skipped instead of reported.
fn decode_log(event: &Event, log: &Log) -> Option<EventDelivery> {
    let decoded = match event.decode_log(log.data(), true) {
        Ok(decoded) => decoded,
        Err(e) if event.anonymous => {
            debug!("Skipping log that does not match anonymous {}: {}", event.name, e);
            return None;
        }
        Err(e) => {
            return Some(EventDelivery::Error(format!(
                "Failed to decode {} log: {}",
                event.name, e
            )))
        }
    };

    let mut indexed = decoded.indexed.iter();
    let mut body = decoded.body.iter();
    let mut values = Map::new();

    for (position, input) in event.inputs.iter().enumerate() {
        let value = if input.indexed {
            indexed.next()
        } else {
            body.next()
        };
        let key = if input.name.is_empty() {
            position.to_string()
        } else {
            input.name.clone()
        };
        values.insert(
            key,
            value.map(utils::dyn_sol_value_to_json).unwrap_or(Value::Null),
        );
    }

    Some(EventDelivery::Data(json!({
        "event": event.name,
        "address": log.address().to_checksum(None),
        "blockNumber": log.block_number,
        "transactionHash": log.transaction_hash.map(|hash| format!("{:?}", hash)),
        "logIndex": log.log_index,
        "returnValues": values,
    })))
}
