//! escrow-client: client-side coordination of P2P NFT escrow trades
//!
//! a thin, typed client for the barterbox escrow contract. the
//! contract holds the canonical trade record; this crate reads and
//! writes it through a JSON-RPC gateway, enforces the lifecycle rules
//! client-side for UI gating, and papers over the read lag that
//! follows every confirmed transaction.
//!
//! ## usage
//!
//! ```rust,ignore
//! let config = ClientConfig::testnet();
//! let gateway = Arc::new(EscrowNodeClient::new(&config, caller)?);
//! let coordinator = EscrowCoordinator::new(gateway, caller, config);
//!
//! let outcome = coordinator.fund(EscrowId(7)).await?;
//! ```
//!
//! reads return `Option` for missing records; every other failure is
//! classified into [`EscrowClientError`] at the gateway boundary.

pub mod binding;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod rpc;
pub mod types;

pub use commands::EscrowCommand;
pub use config::ClientConfig;
pub use coordinator::{
    check_permitted, is_permitted, next_action, CreateParams, EscrowCoordinator, TxOutcome,
};
pub use error::{EscrowClientError, Result};
pub use gateway::{ChainEvent, CreateRequest, EscrowGateway, TxHandle, TxReceipt};
pub use rpc::EscrowNodeClient;
pub use types::{
    format_price, parse_price, Address, ConversationKey, Escrow, EscrowAction, EscrowId,
    EscrowState, Role,
};
