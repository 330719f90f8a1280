//! Recursive call normalization.
//!
//! Turns a [`RawCall`] into a [`NormalizedCall`] tree. Nested calls (batches,
//! proxies, multisig) are expanded recursively; opaque payloads named `call`
//! are speculatively decoded as a runtime call and kept as raw bytes if that
//! fails.

use heck::ToLowerCamelCase;
use tracing::trace;

use crate::metrics::record_decode_error;
use crate::models::{ArgValue, NormalizedCall};
use crate::ports::{ChainClient, RawArg, RawCall};

/// Speculative decoding stops below this many call levels.
pub const MAX_CALL_DEPTH: usize = 32;

/// Methods whose arguments are stored as a `dest, value` pair.
pub const TRANSFER_METHODS: &[&str] = &[
    "balances.transfer",
    "balances.transferKeepAlive",
    "balances.transferAllowDeath",
];

/// `section.method` with both parts in lowerCamelCase.
pub fn method_name(pallet: &str, call: &str) -> String {
    format!("{}.{}", pallet.to_lower_camel_case(), call.to_lower_camel_case())
}

/// Decodes calls of one network.
pub struct CallDecoder<'a> {
    chain: &'a dyn ChainClient,
    network: &'a str,
}

impl<'a> CallDecoder<'a> {
    pub fn new(chain: &'a dyn ChainClient, network: &'a str) -> Self {
        Self { chain, network }
    }

    /// Normalize a call and all calls nested inside it.
    ///
    /// Never fails: argument bytes that do not decode are kept as
    /// [`ArgValue::Opaque`].
    pub fn decode(&self, call: &RawCall) -> NormalizedCall {
        self.decode_at(call, 1)
    }

    fn decode_at(&self, call: &RawCall, depth: usize) -> NormalizedCall {
        let args = call
            .args
            .iter()
            .map(|(name, arg)| (name.clone(), self.decode_arg(name, arg, depth)))
            .collect();

        NormalizedCall {
            method: method_name(&call.pallet, &call.name),
            call_index: format!("0x{}", hex::encode(call.call_index)),
            args,
        }
    }

    fn decode_arg(&self, name: &str, arg: &RawArg, depth: usize) -> ArgValue {
        match arg {
            RawArg::Value(value) => ArgValue::Scalar(value.clone()),
            RawArg::Call(inner) => ArgValue::Call(Box::new(self.decode_at(inner, depth + 1))),
            RawArg::Array(items) => ArgValue::List(
                items
                    .iter()
                    .map(|item| self.decode_arg(name, item, depth))
                    .collect(),
            ),
            RawArg::Bytes(bytes) if is_call_field(name) => self.decode_opaque(bytes, depth),
            RawArg::Bytes(bytes) => ArgValue::Opaque(bytes.clone()),
        }
    }

    fn decode_opaque(&self, bytes: &[u8], depth: usize) -> ArgValue {
        if depth >= MAX_CALL_DEPTH {
            trace!(depth, "Call nesting too deep, keeping raw bytes");
            return ArgValue::Opaque(bytes.to_vec());
        }

        match self.chain.decode_call(bytes) {
            Ok(inner) => ArgValue::Call(Box::new(self.decode_at(&inner, depth + 1))),
            Err(e) => {
                trace!(network = %self.network, len = bytes.len(), error = %e, "Opaque call kept as bytes");
                record_decode_error("call", self.network);
                ArgValue::Opaque(bytes.to_vec())
            }
        }
    }
}

fn is_call_field(name: &str) -> bool {
    name == "call" || name == "calls"
}

/// Flatten arguments for storage.
///
/// Transfers become `"{dest}, {value}"`; everything else the JSON object of
/// the normalized arguments.
pub fn render_args(call: &NormalizedCall) -> String {
    if TRANSFER_METHODS.contains(&call.method.as_str())
        && let (Some(dest), Some(value)) = (call.arg("dest"), call.arg("value"))
    {
        return format!("{}, {}", dest.display(), value.display());
    }
    call.args_json().to_string()
}
