//! error taxonomy for the escrow client
//!
//! every failure out of the gateway is classified into exactly one of
//! these kinds at the RPC boundary; nothing upstream inspects raw error
//! strings. "not found" is not an error (reads return `Option`), and a
//! convergence timeout is a soft outcome, see
//! [`crate::coordinator::TxOutcome`].

use thiserror::Error;

use crate::types::{Address, EscrowAction, EscrowId, EscrowState, Role};

#[derive(Error, Debug)]
pub enum EscrowClientError {
    /// the signing party declined the wallet prompt; a neutral notice,
    /// not a failure
    #[error("signing request was rejected by the user")]
    UserRejected,

    /// RPC unreachable or timed out; safe to retry
    #[error("transport failure: {0}")]
    Transport(String),

    /// the chain rejected the call because a precondition failed; not
    /// retried, the precondition will not change on its own
    #[error("contract rejected the call: {}", reason.as_deref().unwrap_or("no reason given"))]
    Revert { reason: Option<String> },

    /// client-side predicate: the escrow is not in a state that allows
    /// the action
    #[error("escrow {id} is {state}, cannot {action}")]
    NotInState {
        id: EscrowId,
        action: EscrowAction,
        state: EscrowState,
    },

    /// client-side predicate: the action belongs to the other role
    #[error("only the {required} may {action} escrow {id}")]
    WrongRole {
        id: EscrowId,
        action: EscrowAction,
        required: Role,
    },

    /// client-side predicate: the caller is neither seller nor buyer
    #[error("{0} is not a participant in this escrow")]
    NotParticipant(Address),

    /// client-side predicate: the deadline has passed
    #[error("escrow {0} has passed its deadline")]
    Expired(EscrowId),

    /// client-side predicate: expiry-only action before the deadline
    #[error("escrow {0} has not expired yet")]
    NotExpired(EscrowId),

    /// the record is terminal; attempting a transition is a logic
    /// error, never a retryable failure
    #[error("escrow {0} is terminal, no further transitions")]
    Terminal(EscrowId),

    /// a mutating action for this escrow is already running
    #[error("an action for escrow {0} is already in flight")]
    InFlight(EscrowId),

    /// no record with this id
    #[error("escrow {0} not found")]
    NotFound(EscrowId),

    /// malformed wire data from the node
    #[error("encoding error: {0}")]
    Encoding(String),

    /// malformed user input (addresses, amounts, command text)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl EscrowClientError {
    /// only transport faults are worth an automatic retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// true for the client-side predicate rejections that never reached
    /// the chain
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotInState { .. }
                | Self::WrongRole { .. }
                | Self::NotParticipant(_)
                | Self::Expired(_)
                | Self::NotExpired(_)
                | Self::Terminal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EscrowClientError>;
