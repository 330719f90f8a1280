//! Extrinsic/event correlation.
//!
//! Attaches every `ApplyExtrinsic` event to the extrinsic that emitted it,
//! derives the success and fee flags, and turns the tracked extrinsics into
//! [`TransactionRecord`]s.

use heck::ToLowerCamelCase;
use serde_json::Value;
use tracing::{debug, warn};

use crate::metrics::record_orphan_event;
use crate::models::{BlockRecord, EventRef, TransactionRecord};
use crate::ports::{EventPhase, RawEvent};

use super::decoder::render_args;
use super::fetcher::{CorrelatedEvent, DecodedExtrinsic};

/// Methods stored as transactions. Everything else is discarded after
/// correlation.
pub const TRACKED_METHODS: &[&str] = &[
    "balances.transfer",
    "balances.transferKeepAlive",
    "balances.transferAllowDeath",
    "contracts.instantiate",
    "contracts.putCode",
    "contracts.call",
    "utility.batch",
    "cereDdcModule.sendData",
    "session.setKeys",
    "staking.bond",
    "staking.validate",
    "staking.nominate",
    BRIDGE_ACKNOWLEDGE,
];

const BRIDGE_ACKNOWLEDGE: &str = "chainBridge.acknowledgeProposal";

const SUCCESS_EVENT: (&str, &str) = ("system", "ExtrinsicSuccess");
const FAILURE_EVENT: (&str, &str) = ("system", "ExtrinsicFailed");
const TRANSFER_EVENT: (&str, &str) = ("balances", "Transfer");

/// Events that are not attached to any extrinsic.
#[derive(Debug, Default)]
pub struct PhaseEvents {
    pub on_initialize: Vec<RawEvent>,
    pub on_finalize: Vec<RawEvent>,
    /// Number of `ApplyExtrinsic` events whose extrinsic was missing.
    pub dropped: usize,
}

/// Attach events to their extrinsics.
///
/// Events pointing at an extrinsic index that does not exist in the block are
/// logged and dropped.
pub fn correlate(
    extrinsics: &mut [DecodedExtrinsic],
    events: Vec<RawEvent>,
    network: &str,
    block_number: u64,
) -> PhaseEvents {
    let mut phases = PhaseEvents::default();

    for event in events {
        let idx = match event.phase {
            EventPhase::ApplyExtrinsic(idx) => idx,
            EventPhase::Initialization => {
                phases.on_initialize.push(event);
                continue;
            }
            EventPhase::Finalization => {
                phases.on_finalize.push(event);
                continue;
            }
        };

        let Some(extrinsic) = extrinsics.iter_mut().find(|ext| ext.index == idx) else {
            warn!(
                network,
                block = block_number,
                event = event.index,
                extrinsic = idx,
                "⚠️  Event references a missing extrinsic, dropping"
            );
            record_orphan_event(network);
            phases.dropped += 1;
            continue;
        };

        let module = event.pallet.to_lower_camel_case();
        let key = (module.as_str(), event.name.as_str());
        if key == SUCCESS_EVENT {
            extrinsic.success = true;
        }
        if key == SUCCESS_EVENT || key == FAILURE_EVENT {
            extrinsic.pays_fee = extract_pays_fee(&event.data);
        }

        extrinsic.events.push(CorrelatedEvent {
            index: event.index,
            module,
            method: event.name,
            data: event.data,
        });
    }

    phases
}

/// Find the fee flag in a dispatch-info payload.
///
/// Looks at the top level and one level deep, under `paysFee` or `pays_fee`.
/// Accepts `true`, `"Yes"` and `{"Yes": ..}` as paying.
pub fn extract_pays_fee(data: &Value) -> Option<bool> {
    if let Some(flag) = pays_fee_field(data) {
        return Some(flag);
    }
    let children: Box<dyn Iterator<Item = &Value>> = match data {
        Value::Object(map) => Box::new(map.values()),
        Value::Array(items) => Box::new(items.iter()),
        _ => return None,
    };
    children.filter_map(pays_fee_field).next()
}

fn pays_fee_field(value: &Value) -> Option<bool> {
    let map = value.as_object()?;
    let flag = map.get("paysFee").or_else(|| map.get("pays_fee"))?;
    match flag {
        Value::Bool(b) => Some(*b),
        Value::String(s) => Some(s == "Yes"),
        Value::Object(variant) => Some(variant.contains_key("Yes")),
        _ => None,
    }
}

/// Build transaction records for the tracked extrinsics of a block.
pub fn build_transactions(
    extrinsics: &[DecodedExtrinsic],
    block: &BlockRecord,
) -> Vec<TransactionRecord> {
    extrinsics
        .iter()
        .filter(|ext| TRACKED_METHODS.contains(&ext.method.as_str()))
        .filter_map(|ext| {
            let (sender_id, args) = if ext.method == BRIDGE_ACKNOWLEDGE {
                match bridge_transfer(ext) {
                    Some(pair) => pair,
                    None => {
                        debug!(
                            block = block.block_number,
                            extrinsic = ext.index,
                            "Bridge acknowledgement without transfer, skipping"
                        );
                        return None;
                    }
                }
            } else {
                (ext.signer.clone(), render_args(&ext.call))
            };

            Some(TransactionRecord {
                transaction_hash: ext.hash,
                events: ext
                    .events
                    .iter()
                    .map(|ev| EventRef {
                        id: format!("{}-{}", block.block_number, ev.index),
                        module: ev.module.clone(),
                        method: ev.method.clone(),
                    })
                    .collect(),
                nonce: ext.nonce,
                transaction_index: ext.index,
                success: ext.success,
                pays_fee: ext.pays_fee,
                signature: ext.signature.clone(),
                sender_id,
                args,
                method: ext.method.clone(),
                timestamp: block.timestamp,
                network_type: block.network_type.clone(),
                block: block.id(),
            })
        })
        .collect()
}

/// Sender and `"to, amount"` of the transfer emitted by a bridge acknowledgement.
fn bridge_transfer(ext: &DecodedExtrinsic) -> Option<(Option<String>, String)> {
    let event = ext
        .events
        .iter()
        .find(|ev| (ev.module.as_str(), ev.method.as_str()) == TRANSFER_EVENT)?;

    let field = |name: &str, position: usize| -> Option<String> {
        let value = match &event.data {
            Value::Object(map) => map.get(name),
            Value::Array(items) => items.get(position),
            _ => None,
        }?;
        Some(match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    };

    let from = field("from", 0)?;
    let to = field("to", 1)?;
    let amount = field("amount", 2)?;
    Some((Some(from), format!("{}, {}", to, amount)))
}
