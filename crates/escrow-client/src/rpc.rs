//! escrow node RPC client
//!
//! JSON-RPC 2.0 gateway implementation against a wallet-enabled test
//! network node. all failure classification happens here, in one
//! place: the rest of the crate never looks at raw RPC error text.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{EscrowClientError, Result};
use crate::gateway::{ChainEvent, CreateRequest, EscrowGateway, TxHandle, TxReceipt};
use crate::types::{Address, ConversationKey, Escrow, EscrowId, EscrowState};

/// EIP-1193: the user declined the signing request
const CODE_USER_REJECTED: i64 = 4001;
/// EIP-1474: execution reverted; revert reason travels in `data`
const CODE_EXECUTION_REVERTED: i64 = 3;
/// JSON-RPC: invalid params
const CODE_INVALID_PARAMS: i64 = -32602;

/// JSON-RPC client for the escrow contract's node surface
#[derive(Clone)]
pub struct EscrowNodeClient {
    url: String,
    caller: Address,
    client: Client,
    receipt_attempts: u32,
    receipt_interval_ms: u64,
}

impl EscrowNodeClient {
    pub fn new(config: &ClientConfig, caller: Address) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EscrowClientError::Transport(e.to_string()))?;
        Ok(Self {
            url: config.node_endpoint.clone(),
            caller,
            client,
            receipt_attempts: config.receipt_attempts,
            receipt_interval_ms: config.receipt_interval_ms,
        })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": "barterbox",
            "method": method,
            "params": params,
        });
        debug!(method, "rpc call");

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| EscrowClientError::Transport(e.to_string()))?;

        let envelope: RpcResponse = response
            .json()
            .await
            .map_err(|e| EscrowClientError::Transport(e.to_string()))?;

        if let Some(error) = envelope.error {
            return Err(classify_rpc_error(
                error.code,
                &error.message,
                error.data.as_ref(),
            ));
        }

        envelope
            .result
            .ok_or_else(|| EscrowClientError::Transport("no result in response".into()))
    }

    /// submit a mutating call and decode the returned transaction hash
    async fn send(&self, method: &str, params: Value) -> Result<TxHandle> {
        let result = self.call(method, vec![params]).await?;
        let hash: String = decode(result)?;
        Ok(TxHandle(wire::parse_bytes32(&hash)?))
    }
}

#[async_trait::async_trait]
impl EscrowGateway for EscrowNodeClient {
    async fn get_escrow(&self, id: EscrowId) -> Result<Option<Escrow>> {
        let result = self
            .call("escrow_getEscrow", vec![json!(wire::quantity(id.0 as u128))])
            .await;
        match result {
            Ok(Value::Null) => Ok(None),
            Ok(value) => {
                let record: wire::WireEscrow = decode(value)?;
                Ok(Some(record.into_escrow()?))
            }
            // a reverted read means "no such record", not a failure
            Err(EscrowClientError::Revert { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_user_escrows(&self, address: Address) -> Result<Vec<EscrowId>> {
        let result = self
            .call("escrow_getUserEscrows", vec![json!(address.to_string())])
            .await?;
        let raw: Vec<String> = decode(result)?;
        raw.iter().map(|s| wire::parse_id(s)).collect()
    }

    async fn get_conversation_escrows(&self, key: ConversationKey) -> Result<Vec<EscrowId>> {
        let result = self
            .call(
                "escrow_getConversationEscrows",
                vec![json!(key.to_string())],
            )
            .await?;
        let raw: Vec<String> = decode(result)?;
        raw.iter().map(|s| wire::parse_id(s)).collect()
    }

    async fn get_escrow_by_conversation(&self, key: ConversationKey) -> Result<Option<Escrow>> {
        let result = self
            .call(
                "escrow_getEscrowByConversation",
                vec![json!(key.to_string())],
            )
            .await;
        match result {
            Ok(Value::Null) => Ok(None),
            Ok(value) => {
                let record: wire::WireEscrow = decode(value)?;
                Ok(Some(record.into_escrow()?))
            }
            Err(EscrowClientError::Revert { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_total_escrows(&self) -> Result<u64> {
        let result = self.call("escrow_getTotalEscrows", vec![]).await?;
        let raw: String = decode(result)?;
        wire::parse_u64(&raw)
    }

    async fn dispute_fee(&self) -> Result<u128> {
        let result = self.call("escrow_disputeFee", vec![]).await?;
        let raw: String = decode(result)?;
        wire::parse_quantity(&raw)
    }

    async fn create_escrow(&self, request: CreateRequest) -> Result<TxHandle> {
        self.send(
            "escrow_createEscrow",
            json!({
                "from": self.caller.to_string(),
                "seller": request.seller.to_string(),
                "buyer": request.buyer.to_string(),
                "nftContract": request.nft_contract.to_string(),
                "tokenId": wire::quantity(request.token_id as u128),
                "price": wire::quantity(request.price),
                "duration": wire::quantity(request.duration_secs as u128),
                "conversationId": request.conversation.to_string(),
                "metadataRef": request.metadata_ref.unwrap_or_default(),
            }),
        )
        .await
    }

    async fn deposit_payment(&self, id: EscrowId, value: u128) -> Result<TxHandle> {
        self.send(
            "escrow_depositPayment",
            json!({
                "from": self.caller.to_string(),
                "escrowId": wire::quantity(id.0 as u128),
                "value": wire::quantity(value),
            }),
        )
        .await
    }

    async fn approve_nft(&self, nft_contract: Address, token_id: u64) -> Result<TxHandle> {
        self.send(
            "nft_approve",
            json!({
                "from": self.caller.to_string(),
                "contract": nft_contract.to_string(),
                "tokenId": wire::quantity(token_id as u128),
            }),
        )
        .await
    }

    async fn deposit_nft(&self, id: EscrowId) -> Result<TxHandle> {
        self.send(
            "escrow_depositNFT",
            json!({
                "from": self.caller.to_string(),
                "escrowId": wire::quantity(id.0 as u128),
            }),
        )
        .await
    }

    async fn complete_escrow(&self, id: EscrowId) -> Result<TxHandle> {
        self.send(
            "escrow_completeEscrow",
            json!({
                "from": self.caller.to_string(),
                "escrowId": wire::quantity(id.0 as u128),
            }),
        )
        .await
    }

    async fn cancel_escrow(&self, id: EscrowId, reason: &str) -> Result<TxHandle> {
        self.send(
            "escrow_cancelEscrow",
            json!({
                "from": self.caller.to_string(),
                "escrowId": wire::quantity(id.0 as u128),
                "reason": reason,
            }),
        )
        .await
    }

    async fn raise_dispute(&self, id: EscrowId, reason: &str, fee: u128) -> Result<TxHandle> {
        self.send(
            "escrow_raiseDispute",
            json!({
                "from": self.caller.to_string(),
                "escrowId": wire::quantity(id.0 as u128),
                "reason": reason,
                "value": wire::quantity(fee),
            }),
        )
        .await
    }

    async fn resolve_expired_dispute(&self, id: EscrowId) -> Result<TxHandle> {
        self.send(
            "escrow_resolveExpiredDispute",
            json!({
                "from": self.caller.to_string(),
                "escrowId": wire::quantity(id.0 as u128),
            }),
        )
        .await
    }

    async fn cancel_expired_escrow(&self, id: EscrowId) -> Result<TxHandle> {
        self.send(
            "escrow_cancelExpiredEscrow",
            json!({
                "from": self.caller.to_string(),
                "escrowId": wire::quantity(id.0 as u128),
            }),
        )
        .await
    }

    async fn wait_receipt(&self, tx: &TxHandle) -> Result<TxReceipt> {
        for _ in 0..self.receipt_attempts {
            let result = self
                .call("escrow_getTransactionReceipt", vec![json!(tx.to_string())])
                .await?;
            if !result.is_null() {
                let receipt: wire::WireReceipt = decode(result)?;
                return receipt.into_receipt();
            }
            tokio::time::sleep(std::time::Duration::from_millis(self.receipt_interval_ms)).await;
        }
        Err(EscrowClientError::Transport(format!(
            "timed out waiting for receipt of {tx}"
        )))
    }
}

/// map a JSON-RPC error object into the client taxonomy
///
/// the revert reason comes from the structured `data` field, never from
/// substring matching on the free-text message
fn classify_rpc_error(code: i64, message: &str, data: Option<&Value>) -> EscrowClientError {
    match code {
        CODE_USER_REJECTED => EscrowClientError::UserRejected,
        CODE_EXECUTION_REVERTED => EscrowClientError::Revert {
            reason: data.and_then(Value::as_str).map(str::to_owned),
        },
        CODE_INVALID_PARAMS => EscrowClientError::Encoding(format!("invalid params: {message}")),
        _ => EscrowClientError::Transport(format!("RPC error {code}: {message}")),
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| EscrowClientError::Encoding(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

/// wire representations: hex quantities and camelCase field names
pub(crate) mod wire {
    use super::*;

    pub fn quantity(value: u128) -> String {
        format!("0x{value:x}")
    }

    pub fn parse_quantity(s: &str) -> Result<u128> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        if raw.is_empty() {
            return Err(EscrowClientError::Encoding(format!("empty quantity {s:?}")));
        }
        u128::from_str_radix(raw, 16)
            .map_err(|e| EscrowClientError::Encoding(format!("bad quantity {s:?}: {e}")))
    }

    pub fn parse_u64(s: &str) -> Result<u64> {
        let value = parse_quantity(s)?;
        u64::try_from(value)
            .map_err(|_| EscrowClientError::Encoding(format!("quantity {s:?} exceeds u64")))
    }

    pub fn parse_id(s: &str) -> Result<EscrowId> {
        Ok(EscrowId(parse_u64(s)?))
    }

    pub fn parse_address(s: &str) -> Result<Address> {
        Address::parse(s).map_err(|e| EscrowClientError::Encoding(e.to_string()))
    }

    pub fn parse_bytes32(s: &str) -> Result<[u8; 32]> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(raw).map_err(|e| EscrowClientError::Encoding(format!("bad hash: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| EscrowClientError::Encoding(format!("{s:?} is not 32 bytes")))
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WireEscrow {
        pub id: String,
        pub seller: String,
        pub buyer: String,
        pub nft_contract: String,
        pub token_id: String,
        pub price: String,
        pub deadline: String,
        pub dispute_deadline: String,
        pub created_at: String,
        pub state: String,
        pub seller_agreed: bool,
        pub buyer_agreed: bool,
        pub conversation_id: String,
        #[serde(default)]
        pub metadata_ref: Option<String>,
    }

    impl WireEscrow {
        pub fn into_escrow(self) -> Result<Escrow> {
            let state_code = parse_u64(&self.state)?;
            let state = u8::try_from(state_code)
                .ok()
                .and_then(EscrowState::from_code)
                .ok_or_else(|| {
                    EscrowClientError::Encoding(format!("unknown state code {state_code}"))
                })?;
            Ok(Escrow {
                id: parse_id(&self.id)?,
                seller: parse_address(&self.seller)?,
                buyer: parse_address(&self.buyer)?,
                nft_contract: parse_address(&self.nft_contract)?,
                token_id: parse_u64(&self.token_id)?,
                price: parse_quantity(&self.price)?,
                deadline: parse_u64(&self.deadline)?,
                dispute_deadline: parse_u64(&self.dispute_deadline)?,
                created_at: parse_u64(&self.created_at)?,
                state,
                seller_agreed: self.seller_agreed,
                buyer_agreed: self.buyer_agreed,
                conversation: ConversationKey(parse_bytes32(&self.conversation_id)?),
                metadata_ref: self.metadata_ref.filter(|s| !s.is_empty()),
            })
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WireReceipt {
        pub transaction_hash: String,
        pub block_number: String,
        pub status: String,
        #[serde(default)]
        pub logs: Vec<WireLog>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WireLog {
        pub event: String,
        #[serde(default)]
        pub escrow_id: Option<String>,
        #[serde(default)]
        pub seller: Option<String>,
        #[serde(default)]
        pub buyer: Option<String>,
    }

    impl WireReceipt {
        pub fn into_receipt(self) -> Result<TxReceipt> {
            let mut events = Vec::new();
            for log in &self.logs {
                if let Some(event) = log.decode()? {
                    events.push(event);
                }
            }
            Ok(TxReceipt {
                tx: TxHandle(parse_bytes32(&self.transaction_hash)?),
                block: parse_u64(&self.block_number)?,
                success: parse_quantity(&self.status)? == 1,
                events,
            })
        }
    }

    impl WireLog {
        /// decode a known contract event; unknown events are skipped
        pub fn decode(&self) -> Result<Option<ChainEvent>> {
            let id = |field: &Option<String>| -> Result<EscrowId> {
                field
                    .as_deref()
                    .ok_or_else(|| {
                        EscrowClientError::Encoding(format!(
                            "{} log without escrowId",
                            self.event
                        ))
                    })
                    .and_then(parse_id)
            };
            match self.event.as_str() {
                "EscrowCreated" => {
                    let seller = self.seller.as_deref().ok_or_else(|| {
                        EscrowClientError::Encoding("EscrowCreated log without seller".into())
                    })?;
                    let buyer = self.buyer.as_deref().ok_or_else(|| {
                        EscrowClientError::Encoding("EscrowCreated log without buyer".into())
                    })?;
                    Ok(Some(ChainEvent::EscrowCreated {
                        id: id(&self.escrow_id)?,
                        seller: parse_address(seller)?,
                        buyer: parse_address(buyer)?,
                    }))
                }
                "EscrowCancelled" => Ok(Some(ChainEvent::EscrowCancelled {
                    id: id(&self.escrow_id)?,
                })),
                "DisputeExpired" => Ok(Some(ChainEvent::DisputeExpired {
                    id: id(&self.escrow_id)?,
                })),
                _ => Ok(None),
            }
        }
    }
}
