//! contract gateway trait
//!
//! the seam between the coordinator and the chain. the live
//! implementation is [`crate::rpc::EscrowNodeClient`]; tests swap in an
//! in-memory chain. mutating calls return a [`TxHandle`] without
//! blocking for confirmation; confirmation waiting goes through
//! [`EscrowGateway::wait_receipt`] so the coordinator stays
//! transport-agnostic.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Address, ConversationKey, Escrow, EscrowId};

/// handle for a broadcast transaction (32-byte hash)
///
/// a broadcast transaction cannot be retracted; dropping the handle
/// abandons the wait, not the transaction
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(pub [u8; 32]);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHandle({self})")
    }
}

/// events the contract emits, decoded from receipt logs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChainEvent {
    EscrowCreated {
        id: EscrowId,
        seller: Address,
        buyer: Address,
    },
    EscrowCancelled {
        id: EscrowId,
    },
    DisputeExpired {
        id: EscrowId,
    },
}

/// mined-transaction receipt
#[derive(Clone, Debug)]
pub struct TxReceipt {
    pub tx: TxHandle,
    pub block: u64,
    /// false when the transaction was mined but reverted
    pub success: bool,
    pub events: Vec<ChainEvent>,
}

impl TxReceipt {
    /// the escrow id assigned by an `EscrowCreated` event, if present
    pub fn created_escrow(&self) -> Option<EscrowId> {
        self.events.iter().find_map(|event| match event {
            ChainEvent::EscrowCreated { id, .. } => Some(*id),
            _ => None,
        })
    }
}

/// parameters for `createEscrow`, already converted to contract units
#[derive(Clone, Debug)]
pub struct CreateRequest {
    pub seller: Address,
    pub buyer: Address,
    pub nft_contract: Address,
    pub token_id: u64,
    /// price in the smallest currency unit
    pub price: u128,
    /// escrow lifetime in seconds
    pub duration_secs: u64,
    pub conversation: ConversationKey,
    pub metadata_ref: Option<String>,
}

/// read/write surface of the escrow contract
///
/// reads return `Ok(None)` for a missing record; errors are reserved
/// for transport faults and classified rejections
#[async_trait::async_trait]
pub trait EscrowGateway: Send + Sync {
    async fn get_escrow(&self, id: EscrowId) -> Result<Option<Escrow>>;

    async fn get_user_escrows(&self, address: Address) -> Result<Vec<EscrowId>>;

    async fn get_conversation_escrows(&self, key: ConversationKey) -> Result<Vec<EscrowId>>;

    /// the most recently created escrow bound to a conversation
    async fn get_escrow_by_conversation(&self, key: ConversationKey) -> Result<Option<Escrow>>;

    async fn get_total_escrows(&self) -> Result<u64>;

    /// fixed fee the contract requires with `raiseDispute`
    async fn dispute_fee(&self) -> Result<u128>;

    async fn create_escrow(&self, request: CreateRequest) -> Result<TxHandle>;

    async fn deposit_payment(&self, id: EscrowId, value: u128) -> Result<TxHandle>;

    /// authorize the escrow contract to transfer one specific token
    async fn approve_nft(&self, nft_contract: Address, token_id: u64) -> Result<TxHandle>;

    async fn deposit_nft(&self, id: EscrowId) -> Result<TxHandle>;

    async fn complete_escrow(&self, id: EscrowId) -> Result<TxHandle>;

    async fn cancel_escrow(&self, id: EscrowId, reason: &str) -> Result<TxHandle>;

    async fn raise_dispute(&self, id: EscrowId, reason: &str, fee: u128) -> Result<TxHandle>;

    async fn resolve_expired_dispute(&self, id: EscrowId) -> Result<TxHandle>;

    async fn cancel_expired_escrow(&self, id: EscrowId) -> Result<TxHandle>;

    /// block until the transaction is mined and return its receipt
    async fn wait_receipt(&self, tx: &TxHandle) -> Result<TxReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_escrow_from_events() {
        let receipt = TxReceipt {
            tx: TxHandle([0; 32]),
            block: 10,
            success: true,
            events: vec![
                ChainEvent::EscrowCancelled { id: EscrowId(3) },
                ChainEvent::EscrowCreated {
                    id: EscrowId(7),
                    seller: Address([1; 20]),
                    buyer: Address([2; 20]),
                },
            ],
        };
        assert_eq!(receipt.created_escrow(), Some(EscrowId(7)));

        let empty = TxReceipt {
            tx: TxHandle([0; 32]),
            block: 10,
            success: true,
            events: vec![],
        };
        assert_eq!(empty.created_escrow(), None);
    }
}
