use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{InteractionError, InteractionResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub declared_type: String,
    #[serde(skip_serializing_if = "is_false")]
    pub indexed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Parameter>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    Pure,
    View,
    Nonpayable,
    Payable,
}

impl Mutability {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "pure" => Some(Self::Pure),
            "view" => Some(Self::View),
            "nonpayable" => Some(Self::Nonpayable),
            "payable" => Some(Self::Payable),
            _ => None,
        }
    }

    /// `pure` and `view` functions go through `eth_call`, everything else is a transaction.
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::Pure | Self::View)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionEntry {
    pub name: String,
    pub inputs: Vec<Parameter>,
    pub outputs: Vec<Parameter>,
    pub mutability: Mutability,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventEntry {
    pub name: String,
    pub inputs: Vec<Parameter>,
    pub anonymous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceEntry {
    Function(FunctionEntry),
    Event(EventEntry),
}

impl FunctionEntry {
    pub fn signature(&self) -> String {
        signature(&self.name, &self.inputs)
    }
}

impl EventEntry {
    pub fn signature(&self) -> String {
        signature(&self.name, &self.inputs)
    }
}

/// Canonical `name(type,...)` form, with tuples expanded to their components.
fn signature(name: &str, inputs: &[Parameter]) -> String {
    format!("{}({})", name, canonical_types(inputs))
}

fn canonical_types(params: &[Parameter]) -> String {
    params
        .iter()
        .map(canonical_type)
        .collect::<Vec<_>>()
        .join(",")
}

fn canonical_type(param: &Parameter) -> String {
    match param.declared_type.strip_prefix("tuple") {
        Some(suffix) => format!("({}){}", canonical_types(&param.components), suffix),
        None => param.declared_type.clone(),
    }
}

/// Functions and events of one contract, each sorted by name.
#[derive(Debug, Clone, Default)]
pub struct InterfaceCatalog {
    functions: Vec<FunctionEntry>,
    events: Vec<EventEntry>,
    dropped: usize,
}

impl InterfaceCatalog {
    pub fn functions(&self) -> &[FunctionEntry] {
        &self.functions
    }

    pub fn events(&self) -> &[EventEntry] {
        &self.events
    }

    /// Descriptor entries that were neither functions nor events.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Looks a function up by bare name or by full signature.
    ///
    /// A bare name that is overloaded resolves to the first entry in catalog
    /// order, which is declaration order among equal names.
    pub fn find_function(&self, key: &str) -> InteractionResult<&FunctionEntry> {
        self.functions
            .iter()
            .find(|f| matches_key(&f.name, || f.signature(), key))
            .ok_or_else(|| InteractionError::FunctionNotFound(key.to_string()))
    }

    pub fn find_event(&self, key: &str) -> InteractionResult<&EventEntry> {
        self.events
            .iter()
            .find(|e| matches_key(&e.name, || e.signature(), key))
            .ok_or_else(|| InteractionError::UnknownEvent(key.to_string()))
    }
}

fn matches_key(name: &str, signature: impl FnOnce() -> String, key: &str) -> bool {
    if key.contains('(') {
        signature() == key
    } else {
        name == key
    }
}

/// Parses a raw ABI descriptor list into sorted function and event catalogs.
///
/// Constructors, fallbacks and receive entries are dropped. Any malformed
/// entry fails the whole parse.
pub fn parse_descriptor(raw: &[Value]) -> InteractionResult<InterfaceCatalog> {
    let mut catalog = InterfaceCatalog::default();

    for (index, item) in raw.iter().enumerate() {
        match parse_entry(index, item)? {
            Some(InterfaceEntry::Function(function)) => catalog.functions.push(function),
            Some(InterfaceEntry::Event(event)) => catalog.events.push(event),
            None => catalog.dropped += 1,
        }
    }

    // sort_by is stable, so overloads keep their declaration order
    catalog.functions.sort_by(|a, b| a.name.cmp(&b.name));
    catalog.events.sort_by(|a, b| a.name.cmp(&b.name));

    warn_on_overloads("function", catalog.functions.iter().map(|f| f.name.as_str()));
    warn_on_overloads("event", catalog.events.iter().map(|e| e.name.as_str()));

    debug!(
        "Parsed descriptor: {} functions, {} events, {} dropped",
        catalog.functions.len(),
        catalog.events.len(),
        catalog.dropped
    );

    Ok(catalog)
}

fn warn_on_overloads<'a>(kind: &str, names: impl Iterator<Item = &'a str>) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in names {
        *counts.entry(name).or_default() += 1;
    }
    for (name, count) in counts.into_iter().filter(|(_, count)| *count > 1) {
        warn!(
            "{} '{}' is overloaded {} times; bare-name lookups resolve to the first declaration",
            kind, name, count
        );
    }
}

fn parse_entry(index: usize, item: &Value) -> InteractionResult<Option<InterfaceEntry>> {
    let obj = item
        .as_object()
        .ok_or_else(|| InteractionError::malformed(index, "entry is not an object"))?;

    let kind = required_str(index, obj, "type")?;
    if kind != "function" && kind != "event" {
        // constructor, fallback and receive entries carry no name
        debug!("Dropping descriptor entry #{} of type '{}'", index, kind);
        return Ok(None);
    }

    let name = required_str(index, obj, "name")?;
    if name.is_empty() {
        return Err(InteractionError::malformed(index, "entry has an empty 'name'"));
    }

    let entry = match kind {
        "function" => {
            let inputs = parse_params(index, obj, "inputs")?
                .ok_or_else(|| InteractionError::malformed(index, "function has no 'inputs'"))?;
            let outputs = parse_params(index, obj, "outputs")?.unwrap_or_default();
            let mutability = parse_mutability(index, obj)?;

            InterfaceEntry::Function(FunctionEntry {
                name: name.to_string(),
                inputs,
                outputs,
                mutability,
            })
        }
        "event" => {
            let inputs = parse_params(index, obj, "inputs")?
                .ok_or_else(|| InteractionError::malformed(index, "event has no 'inputs'"))?;
            let anonymous = obj
                .get("anonymous")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            InterfaceEntry::Event(EventEntry {
                name: name.to_string(),
                inputs,
                anonymous,
            })
        }
        _ => return Ok(None),
    };

    Ok(Some(entry))
}

fn required_str<'a>(
    index: usize,
    obj: &'a Map<String, Value>,
    field: &str,
) -> InteractionResult<&'a str> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| InteractionError::malformed(index, format!("entry has no '{}'", field)))
}

fn parse_mutability(index: usize, obj: &Map<String, Value>) -> InteractionResult<Mutability> {
    if let Some(value) = obj.get("stateMutability") {
        let text = value.as_str().unwrap_or_default();
        return Mutability::parse(text).ok_or_else(|| {
            InteractionError::malformed(index, format!("unknown stateMutability '{}'", value))
        });
    }

    // Pre-0.4.16 descriptors only carry `constant` and `payable`
    let flag = |field: &str| obj.get(field).and_then(Value::as_bool).unwrap_or(false);
    Ok(if flag("constant") {
        Mutability::View
    } else if flag("payable") {
        Mutability::Payable
    } else {
        Mutability::Nonpayable
    })
}

fn parse_params(
    index: usize,
    obj: &Map<String, Value>,
    field: &str,
) -> InteractionResult<Option<Vec<Parameter>>> {
    let Some(value) = obj.get(field) else {
        return Ok(None);
    };
    let items = value
        .as_array()
        .ok_or_else(|| InteractionError::malformed(index, format!("'{}' is not a list", field)))?;

    items
        .iter()
        .map(|item| parse_param(index, item))
        .collect::<InteractionResult<Vec<_>>>()
        .map(Some)
}

fn parse_param(index: usize, item: &Value) -> InteractionResult<Parameter> {
    let obj = item
        .as_object()
        .ok_or_else(|| InteractionError::malformed(index, "parameter is not an object"))?;

    let declared_type = required_str(index, obj, "type")?.to_string();
    let components = parse_params(index, obj, "components")?.unwrap_or_default();

    Ok(Parameter {
        // unnamed parameters are legal in descriptors
        name: obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        declared_type,
        indexed: obj.get("indexed").and_then(Value::as_bool).unwrap_or(false),
        components,
    })
}
