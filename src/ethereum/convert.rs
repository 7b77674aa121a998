use alloy::primitives::{Sign, I256, U256};
use serde_json::Value;
use std::collections::HashMap;

use super::abi::FunctionEntry;
use crate::error::{InteractionError, InteractionResult};

/// The closed set of declared parameter types the console can fill from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    Address,
    String,
    Uint(usize),
    Int(usize),
    Array(Box<ParamKind>),
}

impl ParamKind {
    pub fn parse(declared_type: &str) -> InteractionResult<Self> {
        Self::parse_inner(declared_type)
            .ok_or_else(|| InteractionError::UnsupportedParameterType(declared_type.to_string()))
    }

    fn parse_inner(ty: &str) -> Option<Self> {
        if let Some(element) = ty.strip_suffix("[]") {
            return Self::parse_inner(element).map(|kind| Self::Array(Box::new(kind)));
        }

        match ty {
            "address" => Some(Self::Address),
            "string" => Some(Self::String),
            "uint" => Some(Self::Uint(256)),
            "int" => Some(Self::Int(256)),
            _ => {
                if let Some(bits) = ty.strip_prefix("uint") {
                    parse_bits(bits).map(Self::Uint)
                } else if let Some(bits) = ty.strip_prefix("int") {
                    parse_bits(bits).map(Self::Int)
                } else {
                    None
                }
            }
        }
    }
}

fn parse_bits(bits: &str) -> Option<usize> {
    if bits.is_empty() || !bits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let bits: usize = bits.parse().ok()?;
    (bits > 0 && bits <= 256 && bits % 8 == 0).then_some(bits)
}

/// A call argument converted from operator text.
///
/// Addresses stay as raw text; the transport validates them when encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypedArgument {
    Address(String),
    String(String),
    Uint(U256, usize),
    Int(I256, usize),
    Array(Vec<TypedArgument>),
}

impl TypedArgument {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Address(s) | Self::String(s) => Value::String(s.clone()),
            Self::Uint(n, _) => Value::String(n.to_string()),
            Self::Int(n, _) => Value::String(n.to_string()),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

/// Converts stored parameter text into typed arguments in declared input order.
///
/// Either every input converts or the whole call fails; `values` is only read.
pub fn convert_arguments(
    values: &HashMap<String, String>,
    function: &FunctionEntry,
) -> InteractionResult<Vec<TypedArgument>> {
    function
        .inputs
        .iter()
        .map(|input| {
            let kind = ParamKind::parse(&input.declared_type)?;
            let text = values.get(&input.name).ok_or_else(|| {
                InteractionError::MissingArgument {
                    function: function.name.clone(),
                    parameter: input.name.clone(),
                }
            })?;
            convert_value(text, &kind, &input.declared_type)
        })
        .collect()
}

fn convert_value(
    text: &str,
    kind: &ParamKind,
    declared_type: &str,
) -> InteractionResult<TypedArgument> {
    match kind {
        ParamKind::Address => Ok(TypedArgument::Address(text.to_string())),
        ParamKind::String => Ok(TypedArgument::String(text.to_string())),
        ParamKind::Uint(bits) => parse_uint(text.trim(), *bits)
            .map(|n| TypedArgument::Uint(n, *bits))
            .ok_or_else(|| invalid_literal(text, declared_type)),
        ParamKind::Int(bits) => parse_int(text.trim(), *bits)
            .map(|n| TypedArgument::Int(n, *bits))
            .ok_or_else(|| invalid_literal(text, declared_type)),
        ParamKind::Array(element) => {
            if text.trim().is_empty() {
                return Ok(TypedArgument::Array(Vec::new()));
            }
            let element_type = &declared_type[..declared_type.len() - 2];
            text.split(',')
                .map(|piece| convert_value(piece.trim(), element, element_type))
                .collect::<InteractionResult<Vec<_>>>()
                .map(TypedArgument::Array)
        }
    }
}

fn invalid_literal(text: &str, declared_type: &str) -> InteractionError {
    InteractionError::InvalidNumericLiteral {
        literal: text.to_string(),
        declared_type: declared_type.to_string(),
    }
}

fn parse_magnitude(digits: &str) -> Option<U256> {
    // plain decimal digits only
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    U256::from_str_radix(digits, 10).ok()
}

fn parse_uint(text: &str, bits: usize) -> Option<U256> {
    let value = parse_magnitude(text)?;
    (value.bit_len() <= bits).then_some(value)
}

fn parse_int(text: &str, bits: usize) -> Option<I256> {
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (Sign::Negative, rest),
        None => (Sign::Positive, text),
    };
    let magnitude = parse_magnitude(digits)?;
    let limit = U256::from(1u8) << (bits - 1);

    let in_range = match sign {
        Sign::Negative => magnitude <= limit,
        Sign::Positive => magnitude < limit,
    };
    if !in_range {
        return None;
    }

    if magnitude.is_zero() {
        return Some(I256::ZERO);
    }
    I256::checked_from_sign_and_abs(sign, magnitude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::abi::{Mutability, Parameter};

    fn function(inputs: &[(&str, &str)]) -> FunctionEntry {
        FunctionEntry {
            name: "f".to_string(),
            inputs: inputs
                .iter()
                .map(|(name, ty)| Parameter {
                    name: name.to_string(),
                    declared_type: ty.to_string(),
                    indexed: false,
                    components: vec![],
                })
                .collect(),
            outputs: vec![],
            mutability: Mutability::Nonpayable,
        }
    }

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn uint(n: u64) -> TypedArgument {
        TypedArgument::Uint(U256::from(n), 256)
    }

    #[test]
    fn test_array_split_and_trim() {
        let args = convert_arguments(&values(&[("x", "1, 2,3")]), &function(&[("x", "uint256[]")]))
            .unwrap();
        assert_eq!(args, vec![TypedArgument::Array(vec![uint(1), uint(2), uint(3)])]);
    }

    #[test]
    fn test_declared_order_not_map_order() {
        let f = function(&[("to", "address"), ("memo", "string"), ("amount", "uint256")]);
        let args = convert_arguments(
            &values(&[("amount", "10"), ("memo", " hi "), ("to", "0xabc")]),
            &f,
        )
        .unwrap();

        assert_eq!(
            args,
            vec![
                TypedArgument::Address("0xabc".to_string()),
                TypedArgument::String(" hi ".to_string()),
                uint(10),
            ]
        );
    }

    #[test]
    fn test_conversion_is_pure() {
        let f = function(&[("ids", "uint256[]"), ("who", "address")]);
        let input = values(&[("ids", "4,5"), ("who", "0x1")]);
        let snapshot = input.clone();

        let first = convert_arguments(&input, &f).unwrap();
        let second = convert_arguments(&input, &f).unwrap();

        assert_eq!(first, second);
        assert_eq!(input, snapshot);
    }

    #[test]
    fn test_unsupported_types() {
        for ty in ["tuple", "bool", "bytes32", "uint256[2]", "fixed128x18", "uint7", "uint264"] {
            let result = convert_arguments(&values(&[("x", "1")]), &function(&[("x", ty)]));
            match result {
                Err(InteractionError::UnsupportedParameterType(name)) => assert_eq!(name, ty),
                other => panic!("expected unsupported type for {}, got {:?}", ty, other),
            }
        }
    }

    #[test]
    fn test_invalid_numeric_literals() {
        for (ty, text) in [
            ("uint256", "0x10"),
            ("uint256", "1e3"),
            ("uint256", ""),
            ("uint256", "-1"),
            ("uint256", "1_000"),
            ("uint8", "256"),
            ("int8", "128"),
            ("int8", "-129"),
            ("uint256[]", "1,,2"),
        ] {
            let result = convert_arguments(&values(&[("x", text)]), &function(&[("x", ty)]));
            assert!(
                matches!(result, Err(InteractionError::InvalidNumericLiteral { .. })),
                "{} '{}' should be rejected, got {:?}",
                ty,
                text,
                result
            );
        }
    }

    #[test]
    fn test_integer_bounds() {
        let f = function(&[("a", "uint8"), ("b", "int8"), ("c", "int"), ("d", "uint")]);
        let args = convert_arguments(
            &values(&[("a", "255"), ("b", "-128"), ("c", "-0"), ("d", " 42 ")]),
            &f,
        )
        .unwrap();

        assert_eq!(args[0], TypedArgument::Uint(U256::from(255u64), 8));
        assert_eq!(args[1], TypedArgument::Int(I256::from_dec_str("-128").unwrap(), 8));
        assert_eq!(args[2], TypedArgument::Int(I256::ZERO, 256));
        assert_eq!(args[3], uint(42));
    }

    #[test]
    fn test_nested_and_empty_arrays() {
        let f = function(&[("names", "string[]"), ("grid", "uint8[][]"), ("none", "address[]")]);
        let args = convert_arguments(
            &values(&[("names", "alice, bob"), ("grid", "1,2"), ("none", "  ")]),
            &f,
        )
        .unwrap();

        assert_eq!(
            args[0],
            TypedArgument::Array(vec![
                TypedArgument::String("alice".to_string()),
                TypedArgument::String("bob".to_string()),
            ])
        );
        assert_eq!(
            args[1],
            TypedArgument::Array(vec![
                TypedArgument::Array(vec![TypedArgument::Uint(U256::from(1u64), 8)]),
                TypedArgument::Array(vec![TypedArgument::Uint(U256::from(2u64), 8)]),
            ])
        );
        assert_eq!(args[2], TypedArgument::Array(vec![]));
    }

    #[test]
    fn test_missing_argument() {
        let result = convert_arguments(&values(&[("to", "0x1")]), &function(&[("to", "address"), ("amount", "uint256")]));
        assert!(matches!(
            result,
            Err(InteractionError::MissingArgument { ref parameter, .. }) if parameter == "amount"
        ));
    }

    #[test]
    fn test_to_json() {
        let arg = TypedArgument::Array(vec![
            TypedArgument::Int(I256::from_dec_str("-5").unwrap(), 32),
            TypedArgument::Address("0xabc".to_string()),
        ]);
        assert_eq!(arg.to_json(), serde_json::json!(["-5", "0xabc"]));
    }
}
