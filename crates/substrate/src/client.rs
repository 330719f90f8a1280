//! Substrate RPC client with dynamic metadata decoding.

use std::convert::Infallible;
use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parity_scale_codec::Decode;
use scale_info::{PortableRegistry, TypeDef, TypeDefPrimitive};
use sp_core::crypto::{AccountId32, Ss58AddressFormat, Ss58Codec};
use subxt::backend::legacy::LegacyRpcMethods;
use subxt::backend::rpc::RpcClient;
use subxt::backend::rpc::reconnecting_rpc_client::{
    ExponentialBackoff, RpcClient as ReconnectingRpcClient,
};
use subxt::blocks::ExtrinsicDetails;
use subxt::config::substrate::DigestItem;
use subxt::ext::scale_value::{At, Composite, Primitive, Value, ValueDef};
use subxt::utils::{H256, MultiAddress};
use subxt::{Metadata, OnlineClient, PolkadotConfig};
use tracing::{debug, instrument, trace, warn};

use tessera_core::error::{ChainError, ChainResult};
use tessera_core::metrics::record_decode_error;
use tessera_core::models::BlockHash;
use tessera_core::ports::{
    ChainClient, DigestKind, DigestLog, EventPhase, NewHead, NewHeadStream, RawArg, RawBlock,
    RawCall, RawEvent, RawExtrinsic, RawHeader, TokenInfo,
};

/// Configuration for the Substrate client.
#[derive(Debug, Clone)]
pub struct SubstrateClientConfig {
    /// Network name, used in logs and metrics.
    pub network: String,
    /// WebSocket URL (e.g., "ws://localhost:9944").
    pub ws_url: String,
    /// Upper bound of the delay between reconnection attempts.
    pub max_reconnect_delay: Duration,
}

impl Default for SubstrateClientConfig {
    fn default() -> Self {
        Self {
            network: "LOCAL".to_string(),
            ws_url: "ws://127.0.0.1:9944".to_string(),
            max_reconnect_delay: Duration::from_secs(10),
        }
    }
}

type SubstrateExtrinsic = ExtrinsicDetails<PolkadotConfig, OnlineClient<PolkadotConfig>>;

/// Substrate client adapter implementing the ChainClient port.
pub struct SubstrateClient {
    network: String,
    client: OnlineClient<PolkadotConfig>,
    rpc: LegacyRpcMethods<PolkadotConfig>,
    token: TokenInfo,
}

impl SubstrateClient {
    /// Connect to a Substrate node and read its token properties.
    ///
    /// The underlying socket reconnects on its own with exponential backoff;
    /// requests in flight during a reconnect fail and are retried by the
    /// caller.
    #[instrument(skip_all, fields(network = %config.network, url = %config.ws_url))]
    pub async fn connect(config: SubstrateClientConfig) -> ChainResult<Self> {
        debug!("Connecting to node");

        let reconnecting = ReconnectingRpcClient::builder()
            .retry_policy(ExponentialBackoff::from_millis(100).max_delay(config.max_reconnect_delay))
            .build(config.ws_url.clone())
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let rpc_client = RpcClient::new(reconnecting);

        let client = OnlineClient::<PolkadotConfig>::from_rpc_client(rpc_client.clone())
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        let rpc = LegacyRpcMethods::<PolkadotConfig>::new(rpc_client);

        let properties = rpc
            .system_properties()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        let token = token_from_properties(&properties);

        // Keep metadata current across runtime upgrades.
        let updater = client.updater();
        let network = config.network.clone();
        tokio::spawn(async move {
            if let Err(e) = updater.perform_runtime_updates().await {
                warn!(network = %network, error = %e, "Runtime update watcher stopped");
            }
        });

        debug!(
            symbol = %token.symbol,
            decimals = token.decimals,
            ss58 = token.ss58_prefix,
            "Connected successfully"
        );

        Ok(Self {
            network: config.network,
            client,
            rpc,
            token,
        })
    }

    fn converter<'a>(&self, metadata: &'a Metadata) -> ValueConverter<'a> {
        ValueConverter {
            metadata,
            types: metadata.types(),
            call_ty: metadata.outer_enums().call_enum_ty(),
            ss58: Ss58AddressFormat::custom(self.token.ss58_prefix),
        }
    }

    fn has_storage(&self, pallet: &str, entry: &str) -> bool {
        self.client
            .metadata()
            .pallet_by_name(pallet)
            .and_then(|p| p.storage())
            .is_some_and(|s| s.entry_by_name(entry).is_some())
    }

    fn raw_extrinsic(
        &self,
        hash: BlockHash,
        conv: &ValueConverter<'_>,
        ext: &SubstrateExtrinsic,
    ) -> ChainResult<RawExtrinsic> {
        let index = ext.index();
        let failed = |e: subxt::Error| decode_error(hash, "extrinsic", index, e);

        let call = RawCall {
            pallet: ext.pallet_name().map_err(failed)?.to_string(),
            name: ext.variant_name().map_err(failed)?.to_string(),
            call_index: [ext.pallet_index(), ext.variant_index()],
            args: conv.fields(&ext.field_values().map_err(failed)?),
        };

        let signer = ext
            .address_bytes()
            .and_then(signer_public)
            .map(|public| self.to_address(&public));
        let signature = ext
            .signature_bytes()
            .map(|bytes| format!("0x{}", hex::encode(bytes)));
        let extensions = ext.signed_extensions();

        Ok(RawExtrinsic {
            index,
            bytes: ext.bytes().to_vec(),
            call,
            signer,
            signature,
            nonce: extensions.as_ref().and_then(|e| e.nonce()),
            tip: extensions.as_ref().and_then(|e| e.tip()),
        })
    }
}

#[async_trait]
impl ChainClient for SubstrateClient {
    async fn block_hash(&self, height: u64) -> ChainResult<Option<BlockHash>> {
        let hash = self
            .rpc
            .chain_get_block_hash(Some(height.into()))
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        Ok(hash.map(|h| BlockHash(h.0)))
    }

    async fn best_head(&self) -> ChainResult<u64> {
        let header = self
            .rpc
            .chain_get_header(None)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?
            .ok_or_else(|| ChainError::RpcError("node returned no best header".into()))?;
        Ok(header.number as u64)
    }

    async fn block(&self, hash: BlockHash) -> ChainResult<RawBlock> {
        let fetch_error = |e: subxt::Error| ChainError::BlockFetchError {
            hash: hash.to_string(),
            message: e.to_string(),
        };

        let block = self
            .client
            .blocks()
            .at(H256(hash.0))
            .await
            .map_err(fetch_error)?;
        let extrinsics = block.extrinsics().await.map_err(fetch_error)?;

        let metadata = self.client.metadata();
        let conv = self.converter(&metadata);
        let header = block.header();

        Ok(RawBlock {
            header: RawHeader {
                number: block.number() as u64,
                parent_hash: BlockHash(header.parent_hash.0),
                state_root: BlockHash(header.state_root.0),
                extrinsics_root: BlockHash(header.extrinsics_root.0),
                digest: header.digest.logs.iter().map(digest_log).collect(),
            },
            extrinsics: decode_all(
                &self.network,
                hash,
                "extrinsic",
                extrinsics.iter().map(Ok::<_, Infallible>),
                |ext| self.raw_extrinsic(hash, &conv, &ext),
            )?,
        })
    }

    async fn events_at(&self, hash: BlockHash) -> ChainResult<Vec<RawEvent>> {
        let events = self
            .client
            .events()
            .at(H256(hash.0))
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        let metadata = self.client.metadata();
        let conv = self.converter(&metadata);
        // the event iterator stops at the first undecodable event
        decode_all(&self.network, hash, "event", events.iter(), |ev| {
            let data = ev
                .field_values()
                .map(|composite| conv.composite_json(&composite))
                .map_err(|e| decode_error(hash, "event", ev.index(), e))?;

            let phase = match ev.phase() {
                subxt::events::Phase::ApplyExtrinsic(idx) => EventPhase::ApplyExtrinsic(idx),
                subxt::events::Phase::Finalization => EventPhase::Finalization,
                subxt::events::Phase::Initialization => EventPhase::Initialization,
            };

            Ok(RawEvent {
                index: ev.index(),
                phase,
                pallet: ev.pallet_name().to_string(),
                name: ev.variant_name().to_string(),
                data,
            })
        })
    }

    async fn timestamp_at(&self, hash: BlockHash) -> ChainResult<Option<u64>> {
        let address = subxt::dynamic::storage("Timestamp", "Now", ());
        let value = self
            .client
            .storage()
            .at(H256(hash.0))
            .fetch(&address)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        match value {
            Some(thunk) => {
                let now = thunk
                    .to_value()
                    .map_err(|e| ChainError::RpcError(e.to_string()))?;
                Ok(now.as_u128().and_then(|ms| u64::try_from(ms).ok()))
            }
            None => Ok(None),
        }
    }

    async fn session_validators_at(&self, hash: BlockHash) -> ChainResult<Vec<String>> {
        // Aura-only chains without a session pallet expose their set directly.
        let (pallet, entry) = if self.has_storage("Session", "Validators") {
            ("Session", "Validators")
        } else if self.has_storage("Aura", "Authorities") {
            ("Aura", "Authorities")
        } else {
            return Ok(Vec::new());
        };

        let address = subxt::dynamic::storage(pallet, entry, ());
        let value = self
            .client
            .storage()
            .at(H256(hash.0))
            .fetch(&address)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        let Some(thunk) = value else {
            return Ok(Vec::new());
        };
        let set = thunk
            .to_value()
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        let metadata = self.client.metadata();
        let conv = self.converter(&metadata);
        Ok(conv
            .members(&set)
            .into_iter()
            .filter_map(|member| conv.public_key(member))
            .map(|public| self.to_address(&public))
            .collect())
    }

    async fn free_balance(&self, address: &str) -> ChainResult<u128> {
        let (account, _) = AccountId32::from_ss58check_with_version(address)
            .map_err(|e| ChainError::InvalidAddress(format!("{address}: {e:?}")))?;
        let public: &[u8; 32] = account.as_ref();

        let key = subxt::dynamic::storage("System", "Account", vec![Value::from_bytes(public)]);
        let storage = self
            .client
            .storage()
            .at_latest()
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;
        let value = storage
            .fetch(&key)
            .await
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        let Some(thunk) = value else {
            return Ok(0);
        };
        let info = thunk
            .to_value()
            .map_err(|e| ChainError::RpcError(e.to_string()))?;

        info.at("data")
            .and_then(|data| data.at("free"))
            .and_then(|free| free.as_u128())
            .ok_or_else(|| ChainError::RpcError("System.Account has no data.free".into()))
    }

    async fn subscribe_new_heads(&self) -> ChainResult<NewHeadStream> {
        let subscription = self
            .client
            .blocks()
            .subscribe_best()
            .await
            .map_err(|e| ChainError::SubscriptionError(e.to_string()))?;

        let stream = subscription.map(|result| {
            result
                .map(|block| NewHead {
                    number: block.number() as u64,
                    hash: BlockHash(block.hash().0),
                })
                .map_err(|e| ChainError::SubscriptionError(e.to_string()))
        });

        Ok(Box::pin(stream))
    }

    fn decode_call(&self, bytes: &[u8]) -> ChainResult<RawCall> {
        let metadata = self.client.metadata();
        let conv = self.converter(&metadata);

        let input = &mut &bytes[..];
        let value = subxt::ext::scale_value::scale::decode_as_type(input, conv.call_ty, conv.types)
            .map_err(|e| ChainError::CallDecodeError(e.to_string()))?;
        if !input.is_empty() {
            return Err(ChainError::CallDecodeError(format!(
                "{} trailing bytes after call",
                input.len()
            )));
        }

        conv.call(&value)
    }

    fn to_address(&self, public: &[u8; 32]) -> String {
        AccountId32::from(*public)
            .to_ss58check_with_version(Ss58AddressFormat::custom(self.token.ss58_prefix))
    }

    fn token(&self) -> TokenInfo {
        self.token.clone()
    }
}

// =============================================================================
// Header & signer helpers
// =============================================================================

fn decode_error(hash: BlockHash, what: &str, index: u32, err: impl Display) -> ChainError {
    ChainError::BlockFetchError {
        hash: hash.to_string(),
        message: format!("{what} {index} could not be decoded: {err}"),
    }
}

/// Decode every item of a block. The first failure fails the whole block.
fn decode_all<T, U, E: Display>(
    network: &str,
    hash: BlockHash,
    what: &str,
    items: impl IntoIterator<Item = Result<T, E>>,
    mut decode: impl FnMut(T) -> ChainResult<U>,
) -> ChainResult<Vec<U>> {
    let mut decoded = Vec::new();
    for (position, item) in items.into_iter().enumerate() {
        let result = item
            .map_err(|e| decode_error(hash, what, position as u32, e))
            .and_then(&mut decode);
        match result {
            Ok(value) => decoded.push(value),
            Err(e) => {
                warn!(network, error = %e, "⚠️  Undecodable {what}, block not indexed");
                record_decode_error(what, network);
                return Err(e);
            }
        }
    }
    Ok(decoded)
}

fn digest_log(item: &DigestItem) -> DigestLog {
    let (kind, engine, payload) = match item {
        DigestItem::PreRuntime(engine, data) => (DigestKind::PreRuntime, Some(*engine), data),
        DigestItem::Consensus(engine, data) => (DigestKind::Consensus, Some(*engine), data),
        DigestItem::Seal(engine, data) => (DigestKind::Seal, Some(*engine), data),
        DigestItem::Other(data) => (DigestKind::Other, None, data),
        DigestItem::RuntimeEnvironmentUpdated => {
            return DigestLog {
                kind: DigestKind::RuntimeEnvironmentUpdated,
                engine: None,
                payload: Vec::new(),
            };
        }
    };
    DigestLog {
        kind,
        engine,
        payload: payload.clone(),
    }
}

/// Public key of a signer, from its encoded address.
///
/// Accepts `MultiAddress::Id` and chains that use the bare account id as
/// address.
fn signer_public(address: &[u8]) -> Option<[u8; 32]> {
    if let Ok(MultiAddress::Id(account)) =
        MultiAddress::<subxt::utils::AccountId32, u32>::decode(&mut &address[..])
    {
        return Some(account.0);
    }
    match <[u8; 32]>::try_from(address) {
        Ok(public) => Some(public),
        Err(_) => {
            trace!(len = address.len(), "Unsupported signer address");
            None
        }
    }
}

/// Token properties from `system_properties`, falling back to defaults.
fn token_from_properties(properties: &serde_json::Map<String, serde_json::Value>) -> TokenInfo {
    // Multi-token chains report arrays; the native token comes first.
    fn first(value: &serde_json::Value) -> Option<&serde_json::Value> {
        match value {
            serde_json::Value::Array(items) => items.first(),
            other => Some(other),
        }
    }

    let defaults = TokenInfo::default();
    TokenInfo {
        decimals: properties
            .get("tokenDecimals")
            .and_then(first)
            .and_then(|v| v.as_u64())
            .and_then(|d| u8::try_from(d).ok())
            .unwrap_or(defaults.decimals),
        symbol: properties
            .get("tokenSymbol")
            .and_then(first)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(defaults.symbol),
        ss58_prefix: properties
            .get("ss58Format")
            .and_then(|v| v.as_u64())
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(defaults.ss58_prefix),
    }
}

// =============================================================================
// SCALE Value conversion
// =============================================================================

/// Converts decoded values using their type ids to find calls, byte
/// payloads and account ids.
struct ValueConverter<'a> {
    metadata: &'a Metadata,
    types: &'a PortableRegistry,
    call_ty: u32,
    ss58: Ss58AddressFormat,
}

impl ValueConverter<'_> {
    /// A value of the outer call enum: `Pallet(call(fields))`.
    fn call(&self, value: &Value<u32>) -> ChainResult<RawCall> {
        let ValueDef::Variant(pallet) = &value.value else {
            return Err(ChainError::CallDecodeError("expected a pallet variant".into()));
        };
        let Some(ValueDef::Variant(call)) = pallet.values.values().next().map(|v| &v.value) else {
            return Err(ChainError::CallDecodeError(format!(
                "pallet {} holds no call variant",
                pallet.name
            )));
        };

        let pallet_meta = self.metadata.pallet_by_name(&pallet.name).ok_or_else(|| {
            ChainError::MetadataError(format!("unknown pallet {}", pallet.name))
        })?;
        let variant = pallet_meta.call_variant_by_name(&call.name).ok_or_else(|| {
            ChainError::MetadataError(format!("unknown call {}.{}", pallet.name, call.name))
        })?;

        Ok(RawCall {
            pallet: pallet.name.clone(),
            name: call.name.clone(),
            call_index: [pallet_meta.index(), variant.index],
            args: self.fields(&call.values),
        })
    }

    fn fields(&self, fields: &Composite<u32>) -> Vec<(String, RawArg)> {
        match fields {
            Composite::Named(named) => named
                .iter()
                .map(|(name, value)| (name.clone(), self.arg(value)))
                .collect(),
            Composite::Unnamed(values) => values
                .iter()
                .enumerate()
                .map(|(i, value)| (i.to_string(), self.arg(value)))
                .collect(),
        }
    }

    fn arg(&self, value: &Value<u32>) -> RawArg {
        if value.context == self.call_ty {
            match self.call(value) {
                Ok(call) => return RawArg::Call(call),
                Err(e) => trace!(error = %e, "Nested call not convertible"),
            }
        }
        if let Some(bytes) = self.bytes(value) {
            return RawArg::Bytes(bytes);
        }
        if self.element_ty(value.context) == Some(self.call_ty) {
            return RawArg::Array(self.items(value).into_iter().map(|v| self.arg(v)).collect());
        }
        RawArg::Value(self.json(value))
    }

    /// Element type of a sequence or array type.
    fn element_ty(&self, id: u32) -> Option<u32> {
        match &self.types.resolve(id)?.type_def {
            TypeDef::Sequence(seq) => Some(seq.type_param.id),
            TypeDef::Array(arr) => Some(arr.type_param.id),
            _ => None,
        }
    }

    fn is_u8(&self, id: u32) -> bool {
        matches!(
            self.types.resolve(id).map(|ty| &ty.type_def),
            Some(TypeDef::Primitive(TypeDefPrimitive::U8))
        )
    }

    fn is_account(&self, id: u32) -> bool {
        self.types
            .resolve(id)
            .and_then(|ty| ty.path.segments.last())
            .is_some_and(|ident| ident == "AccountId32")
    }

    fn items<'v>(&self, value: &'v Value<u32>) -> Vec<&'v Value<u32>> {
        match &value.value {
            ValueDef::Composite(composite) => composite.values().collect(),
            _ => Vec::new(),
        }
    }

    /// Elements of a sequence, seen through single-field wrappers.
    fn members<'v>(&self, value: &'v Value<u32>) -> Vec<&'v Value<u32>> {
        match self.types.resolve(value.context).map(|ty| &ty.type_def) {
            Some(TypeDef::Sequence(_) | TypeDef::Array(_)) => self.items(value),
            Some(TypeDef::Composite(composite)) if composite.fields.len() == 1 => {
                match self.items(value).as_slice() {
                    [only] => self.members(only),
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    /// Raw bytes of a `u8` sequence, seen through single-field wrappers
    /// such as `BoundedVec`.
    fn bytes(&self, value: &Value<u32>) -> Option<Vec<u8>> {
        let ty = self.types.resolve(value.context)?;
        match &ty.type_def {
            TypeDef::Sequence(_) | TypeDef::Array(_)
                if self.element_ty(value.context).is_some_and(|el| self.is_u8(el)) =>
            {
                self.items(value)
                    .into_iter()
                    .map(|v| match &v.value {
                        ValueDef::Primitive(Primitive::U128(n)) => u8::try_from(*n).ok(),
                        _ => None,
                    })
                    .collect()
            }
            TypeDef::Composite(composite) if composite.fields.len() == 1 => {
                let inner = self.items(value);
                match inner.as_slice() {
                    [only] => self.bytes(only),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn public_key(&self, value: &Value<u32>) -> Option<[u8; 32]> {
        self.bytes(value).and_then(|b| <[u8; 32]>::try_from(b).ok())
    }

    fn json(&self, value: &Value<u32>) -> serde_json::Value {
        if self.is_account(value.context)
            && let Some(public) = self.public_key(value)
        {
            return serde_json::Value::String(
                AccountId32::from(public).to_ss58check_with_version(self.ss58),
            );
        }
        if let Some(bytes) = self.bytes(value) {
            return serde_json::Value::String(format!("0x{}", hex::encode(bytes)));
        }

        match &value.value {
            ValueDef::Composite(composite) => self.composite_json(composite),
            ValueDef::Variant(variant) => {
                let inner = self.composite_json(&variant.values);
                match variant.name.as_str() {
                    "None" => serde_json::Value::Null,
                    // Option and MultiAddress wrappers carry their payload only
                    "Some" | "Id" => inner,
                    name => {
                        let mut map = serde_json::Map::new();
                        map.insert(name.to_string(), inner);
                        serde_json::Value::Object(map)
                    }
                }
            }
            ValueDef::Primitive(primitive) => primitive_to_json(primitive),
            ValueDef::BitSequence(bits) => serde_json::Value::String(format!("{:?}", bits)),
        }
    }

    fn composite_json(&self, composite: &Composite<u32>) -> serde_json::Value {
        match composite {
            Composite::Unnamed(values) => {
                // Unwrap single-element tuples (newtypes, Compact)
                if let [only] = values.as_slice() {
                    return self.json(only);
                }
                serde_json::Value::Array(values.iter().map(|v| self.json(v)).collect())
            }
            Composite::Named(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(name, v)| (name.clone(), self.json(v)))
                    .collect(),
            ),
        }
    }
}

/// Convert a Primitive to a JSON value. Integers become strings.
fn primitive_to_json(primitive: &Primitive) -> serde_json::Value {
    match primitive {
        Primitive::Bool(b) => serde_json::Value::Bool(*b),
        Primitive::Char(c) => serde_json::Value::String(c.to_string()),
        Primitive::String(s) => serde_json::Value::String(s.clone()),
        Primitive::U128(n) => serde_json::Value::String(n.to_string()),
        Primitive::I128(n) => serde_json::Value::String(n.to_string()),
        Primitive::U256(n) => serde_json::Value::String(format!("0x{}", hex::encode(n))),
        Primitive::I256(n) => serde_json::Value::String(format!("0x{}", hex::encode(n))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_scale_codec::Encode;
    use serde_json::json;

    #[test]
    fn test_signer_from_multiaddress_id() {
        let encoded =
            MultiAddress::<subxt::utils::AccountId32, u32>::Id(subxt::utils::AccountId32([7; 32]))
                .encode();
        assert_eq!(encoded.len(), 33);
        assert_eq!(signer_public(&encoded), Some([7; 32]));
    }

    #[test]
    fn test_signer_from_bare_account() {
        assert_eq!(signer_public(&[9; 32]), Some([9; 32]));
    }

    // Test critique: une adresse Index (non Id) ne doit pas produire de signataire
    #[test]
    fn test_signer_index_address_is_ignored() {
        let encoded = MultiAddress::<subxt::utils::AccountId32, u32>::Index(5).encode();
        assert_eq!(signer_public(&encoded), None);
    }

    #[test]
    fn test_token_properties_scalar() {
        let props = json!({ "tokenDecimals": 10, "tokenSymbol": "CERE", "ss58Format": 54 });
        let token = token_from_properties(props.as_object().unwrap());
        assert_eq!(
            token,
            TokenInfo {
                decimals: 10,
                symbol: "CERE".into(),
                ss58_prefix: 54
            }
        );
    }

    #[test]
    fn test_token_properties_multi_token_takes_first() {
        let props = json!({ "tokenDecimals": [12, 18], "tokenSymbol": ["ACA", "AUSD"] });
        let token = token_from_properties(props.as_object().unwrap());
        assert_eq!(token.decimals, 12);
        assert_eq!(token.symbol, "ACA");
        assert_eq!(token.ss58_prefix, 42);
    }

    #[test]
    fn test_token_properties_missing_uses_defaults() {
        let token = token_from_properties(&serde_json::Map::new());
        assert_eq!(token, TokenInfo::default());
    }

    #[test]
    fn test_digest_log_keeps_engine() {
        let babe = DigestItem::PreRuntime(*b"BABE", vec![1, 2, 3]);
        assert_eq!(
            digest_log(&babe),
            DigestLog {
                kind: DigestKind::PreRuntime,
                engine: Some(*b"BABE"),
                payload: vec![1, 2, 3],
            }
        );

        let updated = digest_log(&DigestItem::RuntimeEnvironmentUpdated);
        assert_eq!(updated.kind, DigestKind::RuntimeEnvironmentUpdated);
        assert!(updated.engine.is_none());
    }

    #[test]
    fn test_primitive_integers_are_strings() {
        assert_eq!(
            primitive_to_json(&Primitive::U128(1_000_000_000_000)),
            json!("1000000000000")
        );
        assert_eq!(primitive_to_json(&Primitive::I128(-5)), json!("-5"));
        assert_eq!(primitive_to_json(&Primitive::Bool(true)), json!(true));
    }

    #[test]
    fn test_undecodable_item_fails_the_block() {
        let hash = BlockHash([3; 32]);
        let items: Vec<Result<u32, &str>> = vec![Ok(1), Err("unknown variant"), Ok(3)];

        let err = decode_all("TESTNET", hash, "event", items, Ok).unwrap_err();
        let ChainError::BlockFetchError { hash: failed, message } = err else {
            panic!("expected a block fetch error");
        };
        assert_eq!(failed, hash.to_string());
        assert!(message.contains("event 1"));
        assert!(message.contains("unknown variant"));
    }

    #[test]
    fn test_field_decode_error_fails_the_block() {
        let hash = BlockHash([3; 32]);
        let items = vec![Ok::<u32, Infallible>(1), Ok(2)];

        let result = decode_all("TESTNET", hash, "extrinsic", items, |n| {
            if n == 2 {
                Err(decode_error(hash, "extrinsic", n, "bad compact"))
            } else {
                Ok(n)
            }
        });
        assert!(matches!(result, Err(ChainError::BlockFetchError { .. })));

        let all = decode_all("TESTNET", hash, "extrinsic", vec![Ok::<u32, Infallible>(1)], Ok);
        assert_eq!(all.unwrap(), vec![1]);
    }
}
