//! Paymaster request payloads
//!
//! The paymaster API has drifted between field names (`contractAddress`
//! vs `to`, `entrypoint` vs `selector`, `transaction_hash` vs
//! `transactionHash`). All of that is absorbed here so callers only ever
//! see one shape.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::intake::QueuedAction;

use super::SponsorError;

/// Felt addresses are at most 64 hex digits
const MAX_ADDRESS_DIGITS: usize = 64;

/// One contract call inside a sponsored transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    pub contract_address: String,
    pub entrypoint: String,
    pub calldata: Vec<String>,
}

/// Body of a sponsor request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsorPayload {
    pub user_address: String,
    pub calls: Vec<Call>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_token_address: Option<String>,
}

/// Body of an account deployment request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDeployment {
    pub class_hash: String,
    pub constructor_calldata: Vec<String>,
    pub contract_address: String,
    pub address_salt: String,
}

impl AccountDeployment {
    /// Canonicalize every address-like field, failing on malformed input
    pub fn normalized(&self) -> Result<Self, SponsorError> {
        Ok(Self {
            class_hash: canonical_address(&self.class_hash)?,
            constructor_calldata: self.constructor_calldata.clone(),
            contract_address: canonical_address(&self.contract_address)?,
            address_salt: self.address_salt.clone(),
        })
    }
}

/// Successful paymaster response
#[derive(Debug, Clone, PartialEq)]
pub struct SponsorResponse {
    pub transaction_hash: Option<String>,
    pub body: JsonValue,
}

impl SponsorResponse {
    pub fn from_body(body: JsonValue) -> Self {
        let transaction_hash = ["transaction_hash", "transactionHash", "hash"]
            .iter()
            .find_map(|field| body.get(*field).and_then(JsonValue::as_str))
            .filter(|hash| !hash.is_empty())
            .map(str::to_string);

        Self {
            transaction_hash,
            body,
        }
    }
}

/// Validate a hex felt and pad it to `0x` + 64 lowercase digits
pub fn canonical_address(raw: &str) -> Result<String, SponsorError> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| SponsorError::InvalidPayload(format!("address {:?} must start with 0x", raw)))?;

    if digits.is_empty() || digits.len() > MAX_ADDRESS_DIGITS {
        return Err(SponsorError::InvalidPayload(format!(
            "address {:?} must have 1 to {} hex digits",
            raw, MAX_ADDRESS_DIGITS
        )));
    }

    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SponsorError::InvalidPayload(format!(
            "address {:?} is not hexadecimal",
            raw
        )));
    }

    Ok(format!(
        "0x{:0>width$}",
        digits.to_ascii_lowercase(),
        width = MAX_ADDRESS_DIGITS
    ))
}

/// Build the paymaster payload for one user's actions
pub fn build_payload(
    actions: &[QueuedAction],
    default_contract: Option<&str>,
    gas_token: Option<&str>,
) -> Result<SponsorPayload, SponsorError> {
    let first = actions
        .first()
        .ok_or_else(|| SponsorError::InvalidPayload("no actions to sponsor".into()))?;

    if let Some(other) = actions
        .iter()
        .find(|a| a.account_address != first.account_address)
    {
        return Err(SponsorError::InvalidPayload(format!(
            "actions for {} span accounts {} and {}",
            first.user_id, first.account_address, other.account_address
        )));
    }

    let calls = actions
        .iter()
        .map(|a| build_call(a, default_contract))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SponsorPayload {
        user_address: canonical_address(&first.account_address)?,
        calls,
        gas_token_address: gas_token.map(canonical_address).transpose()?,
    })
}

fn build_call(queued: &QueuedAction, default_contract: Option<&str>) -> Result<Call, SponsorError> {
    let action = &queued.action;
    let params = &action.parameters;

    let target = string_field(params, &["contractAddress", "to"])
        .or(default_contract)
        .ok_or_else(|| {
            SponsorError::InvalidPayload(format!("action {} has no call target", action.id))
        })?;

    let entrypoint = string_field(params, &["entrypoint", "selector"])
        .unwrap_or(action.method.as_str())
        .to_string();

    let calldata = match params.get("calldata") {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|item| match item {
                JsonValue::String(s) => Ok(s.clone()),
                JsonValue::Number(n) => Ok(n.to_string()),
                other => Err(SponsorError::InvalidPayload(format!(
                    "action {} has non-scalar calldata element {}",
                    action.id, other
                ))),
            })
            .collect::<Result<_, _>>()?,
        Some(other) => {
            return Err(SponsorError::InvalidPayload(format!(
                "action {} calldata must be a list, got {}",
                action.id, other
            )))
        }
    };

    Ok(Call {
        contract_address: canonical_address(target)?,
        entrypoint,
        calldata,
    })
}

fn string_field<'a>(params: &'a JsonValue, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| params.get(*name).and_then(JsonValue::as_str))
}
