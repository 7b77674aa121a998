//! Recording stand-ins for the chain transport and artifact service.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

use super::{
    abi::{EventEntry, FunctionEntry},
    artifact::ArtifactSource,
    convert::TypedArgument,
    provider::{ChainTransport, EventStream, SubscriptionHandle},
    ContractArtifact, EventDelivery,
};
use crate::error::{InteractionError, InteractionResult};

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Read {
        function: String,
        args: Vec<Value>,
        from: Option<String>,
    },
    EstimateGas {
        function: String,
        from: String,
    },
    Send {
        function: String,
        from: String,
        gas: u64,
    },
    Subscribe {
        event: String,
    },
}

#[derive(Default)]
pub struct StubTransport {
    pub calls: Mutex<Vec<TransportCall>>,
    pub read_result: Mutex<Option<Value>>,
    scripted_reads: Mutex<HashMap<String, VecDeque<Value>>>,
    pub fail_estimate: Mutex<Option<String>>,
    pub fail_cancel: Mutex<bool>,
    pub cancellations: Arc<Mutex<Vec<String>>>,
    subscribe_gate: Mutex<Option<Arc<Notify>>>,
    streams: Mutex<HashMap<String, mpsc::Sender<EventDelivery>>>,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_read_result(&self, value: Value) {
        *self.read_result.lock().unwrap() = Some(value);
    }

    /// Queues results returned, in order, by reads of `function`.
    pub fn script_reads(&self, function: &str, values: Vec<Value>) {
        self.scripted_reads
            .lock()
            .unwrap()
            .insert(function.to_string(), values.into());
    }

    pub fn cancellations(&self) -> Vec<String> {
        self.cancellations.lock().unwrap().clone()
    }

    /// Makes every later `subscribe_event` wait until the returned gate is notified.
    pub fn hold_subscribes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.subscribe_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Pushes a delivery into the most recent stream opened for `event`.
    pub async fn emit(&self, event: &str, delivery: EventDelivery) {
        let sender = self.streams.lock().unwrap().get(event).cloned();
        sender
            .expect("no stream open for event")
            .send(delivery)
            .await
            .expect("stream receiver dropped");
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ChainTransport for StubTransport {
    async fn read(
        &self,
        _contract: &ContractArtifact,
        function: &FunctionEntry,
        args: &[TypedArgument],
        from: Option<&str>,
    ) -> InteractionResult<Value> {
        self.record(TransportCall::Read {
            function: function.name.clone(),
            args: args.iter().map(TypedArgument::to_json).collect(),
            from: from.map(str::to_string),
        });
        let scripted = self
            .scripted_reads
            .lock()
            .unwrap()
            .get_mut(&function.name)
            .and_then(VecDeque::pop_front);
        Ok(scripted
            .or_else(|| self.read_result.lock().unwrap().clone())
            .unwrap_or(Value::Null))
    }

    async fn estimate_gas(
        &self,
        _contract: &ContractArtifact,
        function: &FunctionEntry,
        _args: &[TypedArgument],
        from: &str,
    ) -> InteractionResult<u64> {
        self.record(TransportCall::EstimateGas {
            function: function.name.clone(),
            from: from.to_string(),
        });
        match self.fail_estimate.lock().unwrap().clone() {
            Some(reason) => Err(InteractionError::transport("estimateGas", reason)),
            None => Ok(21_000),
        }
    }

    async fn send(
        &self,
        _contract: &ContractArtifact,
        function: &FunctionEntry,
        _args: &[TypedArgument],
        from: &str,
        gas: u64,
    ) -> InteractionResult<Value> {
        self.record(TransportCall::Send {
            function: function.name.clone(),
            from: from.to_string(),
            gas,
        });
        Ok(json!({"status": true, "from": from, "gasUsed": gas}))
    }

    async fn subscribe_event(
        &self,
        _contract: &ContractArtifact,
        event: &EventEntry,
    ) -> InteractionResult<EventStream> {
        self.record(TransportCall::Subscribe {
            event: event.name.clone(),
        });
        let gate = self.subscribe_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let (tx, rx) = mpsc::channel(16);
        self.streams.lock().unwrap().insert(event.name.clone(), tx);

        Ok(EventStream {
            deliveries: rx,
            handle: Box::new(StubHandle {
                event: event.name.clone(),
                fail: *self.fail_cancel.lock().unwrap(),
                cancellations: self.cancellations.clone(),
            }),
        })
    }
}

struct StubHandle {
    event: String,
    fail: bool,
    cancellations: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SubscriptionHandle for StubHandle {
    async fn cancel(&mut self) -> InteractionResult<()> {
        self.cancellations.lock().unwrap().push(self.event.clone());
        if self.fail {
            Err(InteractionError::transport("uninstallFilter", "filter not found"))
        } else {
            Ok(())
        }
    }
}

pub struct StubArtifacts {
    pub artifacts: HashMap<String, ContractArtifact>,
}

impl StubArtifacts {
    pub fn with(artifact: ContractArtifact) -> Self {
        let mut artifacts = HashMap::new();
        artifacts.insert(artifact.name.clone(), artifact);
        Self { artifacts }
    }
}

#[async_trait]
impl ArtifactSource for StubArtifacts {
    async fn fetch(&self, contract_name: &str) -> InteractionResult<ContractArtifact> {
        self.artifacts
            .get(contract_name)
            .cloned()
            .ok_or_else(|| InteractionError::ArtifactUnavailable {
                contract: contract_name.to_string(),
                reason: "not registered".to_string(),
            })
    }
}

pub fn artifact(name: &str, abi: Vec<Value>) -> ContractArtifact {
    ContractArtifact {
        name: name.to_string(),
        address: "0x742d35Cc6435C9c1c72c5E7b18BaB7e1DB7a5d6e".to_string(),
        abi,
    }
}
