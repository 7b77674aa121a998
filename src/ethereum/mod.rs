pub mod abi;
pub mod artifact;
pub mod contract;
pub mod convert;
pub mod events;
pub mod log;
pub mod params;
pub mod provider;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A deployed contract as handed out by the artifact service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractArtifact {
    pub name: String,
    pub address: String,
    pub abi: Vec<Value>,
}

/// One item received on a live event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EventDelivery {
    Data(Value),
    Error(String),
}
