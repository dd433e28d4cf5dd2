//! escrow lifecycle coordination
//!
//! the state machine over the on-chain escrow record: who may perform
//! which transition, what each party should do next, and the
//! post-transaction convergence polling that bridges the gap between
//! transaction finality and read availability.
//!
//! lawful transitions:
//!
//! ```text
//! Created ──fund──▶ Funded ──deposit nft──▶ Active ──complete──▶ Completed
//!    │                                        ▲
//!    └──deposit nft──▶ NftDeposited ──fund────┘
//!
//! any non-terminal ──cancel / cancel expired──▶ Cancelled
//! Funded | NftDeposited | Active ──dispute──▶ Disputed
//! Disputed ──resolve expired dispute──▶ Cancelled
//! ```
//!
//! deposit order between payment and NFT is not fixed; `Active` is
//! reached once both are in, whichever came first.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::binding;
use crate::config::ClientConfig;
use crate::error::{EscrowClientError, Result};
use crate::gateway::{CreateRequest, EscrowGateway, TxHandle};
use crate::types::{
    hours_to_seconds, parse_price, unix_now, Address, Escrow, EscrowAction, EscrowId, EscrowState,
    Role,
};

/// soft warning attached to a transaction whose effect was not yet
/// observable through the read path
pub const CONVERGENCE_WARNING: &str =
    "transaction confirmed, but the on-chain state has not caught up yet; refresh to see the final state";

/// outcome of a mutating flow
///
/// a convergence timeout is not a failure: the transaction is mined,
/// the read path is merely lagging. callers surface the warning and
/// keep the record refreshable.
#[derive(Clone, Debug)]
pub enum TxOutcome {
    /// the expected post-state was observed
    Confirmed(Escrow),
    /// mined, but the expected state was not observed within the
    /// polling budget
    Submitted { tx: TxHandle, warning: &'static str },
}

impl TxOutcome {
    pub fn escrow(&self) -> Option<&Escrow> {
        match self {
            TxOutcome::Confirmed(escrow) => Some(escrow),
            TxOutcome::Submitted { .. } => None,
        }
    }
}

/// user-facing parameters for a new escrow, in human units
#[derive(Clone, Debug)]
pub struct CreateParams {
    pub seller: Address,
    pub buyer: Address,
    pub nft_contract: Address,
    pub token_id: u64,
    /// decimal price string, e.g. `"1.5"`
    pub price: String,
    /// escrow lifetime in hours
    pub duration_hours: u64,
    /// messaging conversation this trade is negotiated in
    pub conversation_id: String,
    pub metadata_ref: Option<String>,
}

/// check whether `caller` may perform `action` on `escrow` at `now`
///
/// pure predicate, evaluated client-side for gating only; the contract
/// independently re-validates every condition. rejections carry the
/// precise reason so callers can render it.
pub fn check_permitted(
    escrow: &Escrow,
    action: EscrowAction,
    caller: Address,
    now: u64,
) -> Result<()> {
    use EscrowAction::*;
    use EscrowState::*;

    let id = escrow.id;
    let role = escrow
        .role_of(caller)
        .ok_or(EscrowClientError::NotParticipant(caller))?;

    if escrow.state.is_terminal() {
        return Err(EscrowClientError::Terminal(id));
    }

    let not_in_state = || {
        Err(EscrowClientError::NotInState {
            id,
            action,
            state: escrow.state,
        })
    };

    match action {
        Fund => {
            if !matches!(escrow.state, Created | NftDeposited) {
                return not_in_state();
            }
            if role != Role::Buyer {
                return Err(EscrowClientError::WrongRole {
                    id,
                    action,
                    required: Role::Buyer,
                });
            }
            if escrow.is_expired(now) {
                return Err(EscrowClientError::Expired(id));
            }
            Ok(())
        }
        DepositNft => {
            if !matches!(escrow.state, Created | Funded) {
                return not_in_state();
            }
            if role != Role::Seller {
                return Err(EscrowClientError::WrongRole {
                    id,
                    action,
                    required: Role::Seller,
                });
            }
            if escrow.is_expired(now) {
                return Err(EscrowClientError::Expired(id));
            }
            Ok(())
        }
        Complete => {
            if escrow.state != Active {
                return not_in_state();
            }
            Ok(())
        }
        Cancel => {
            // terminal states already rejected above
            if escrow.state == Disputed {
                return not_in_state();
            }
            Ok(())
        }
        Dispute => {
            if !matches!(escrow.state, Funded | NftDeposited | Active) {
                return not_in_state();
            }
            if escrow.is_expired(now) {
                return Err(EscrowClientError::Expired(id));
            }
            Ok(())
        }
        CancelExpired => {
            if escrow.state == Disputed {
                if escrow.is_dispute_expired(now) {
                    Ok(())
                } else {
                    Err(EscrowClientError::NotExpired(id))
                }
            } else if escrow.is_expired(now) {
                Ok(())
            } else {
                Err(EscrowClientError::NotExpired(id))
            }
        }
    }
}

/// convenience wrapper over [`check_permitted`]
pub fn is_permitted(escrow: &Escrow, action: EscrowAction, caller: Address, now: u64) -> bool {
    check_permitted(escrow, action, caller, now).is_ok()
}

/// human-readable "what should this party do now"
///
/// total over the full `(state, expired, role)` product and free of
/// side effects. terminal states win over expiry, expiry wins over
/// state guidance.
pub fn next_action(state: EscrowState, expired: bool, role: Role) -> &'static str {
    use EscrowState::*;
    use Role::*;

    match state {
        Completed => return "Trade complete. The NFT and payment have been exchanged.",
        Cancelled => return "This escrow was cancelled.",
        _ => {}
    }

    if expired {
        return match state {
            Disputed => {
                "The dispute window has elapsed. Either party can cancel the expired dispute to recover deposits."
            }
            _ => "This escrow expired before completion. Either party can cancel it to recover deposits.",
        };
    }

    match (state, role) {
        (Created, Buyer) => "Deposit the payment to fund this escrow.",
        (Created, Seller) => "Deposit the NFT to lock in your side of the trade.",
        (Funded, Seller) => "Payment received. Deposit the NFT to activate the trade.",
        (Funded, Buyer) => "Waiting for the seller to deposit the NFT.",
        (NftDeposited, Buyer) => "NFT deposited. Fund the escrow to activate the trade.",
        (NftDeposited, Seller) => "Waiting for the buyer to deposit the payment.",
        (Active, _) => "Both deposits are in. Confirm completion to settle the trade.",
        (Disputed, _) => {
            "A dispute is under review. Wait for resolution or for the dispute deadline to pass."
        }
        _ => "No action required.",
    }
}

/// session object coordinating one caller's escrow actions
///
/// explicitly constructed and torn down (dropped); holds no global
/// state, so reconnects and multi-account scenarios are a matter of
/// building another coordinator.
pub struct EscrowCoordinator {
    gateway: Arc<dyn EscrowGateway>,
    caller: Address,
    config: ClientConfig,
    /// escrows with a mutating action in flight; a second submission is
    /// rejected rather than raced (reads are never guarded)
    in_flight: Mutex<HashSet<EscrowId>>,
}

/// clears the in-flight mark when a flow finishes or is abandoned
struct FlightGuard<'a> {
    set: &'a Mutex<HashSet<EscrowId>>,
    id: EscrowId,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        lock_set(self.set).remove(&self.id);
    }
}

fn lock_set(set: &Mutex<HashSet<EscrowId>>) -> MutexGuard<'_, HashSet<EscrowId>> {
    // the critical sections are tiny and never panic; recover the data
    // if a guard was ever poisoned anyway
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EscrowCoordinator {
    pub fn new(gateway: Arc<dyn EscrowGateway>, caller: Address, config: ClientConfig) -> Self {
        Self {
            gateway,
            caller,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn caller(&self) -> Address {
        self.caller
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gateway(&self) -> &dyn EscrowGateway {
        self.gateway.as_ref()
    }

    /// read the current snapshot; `None` when no record exists
    pub async fn refresh(&self, id: EscrowId) -> Result<Option<Escrow>> {
        self.gateway.get_escrow(id).await
    }

    /// all escrows the caller participates in, ascending by id
    pub async fn my_escrows(&self) -> Result<Vec<EscrowId>> {
        let mut ids = self.gateway.get_user_escrows(self.caller).await?;
        ids.sort_unstable();
        Ok(ids)
    }

    /// all escrows bound to a conversation, ascending by id
    pub async fn conversation_escrows(&self, conversation_id: &str) -> Result<Vec<EscrowId>> {
        binding::conversation_escrows(self.gateway.as_ref(), conversation_id).await
    }

    /// 1-based display number of an escrow within its conversation
    pub async fn escrow_number(
        &self,
        conversation_id: &str,
        id: EscrowId,
    ) -> Result<Option<usize>> {
        binding::escrow_number(self.gateway.as_ref(), conversation_id, id).await
    }

    /// the most recently created escrow in a conversation, if any
    pub async fn latest_conversation_escrow(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Escrow>> {
        self.gateway
            .get_escrow_by_conversation(binding::conversation_key(conversation_id))
            .await
    }

    /// guidance string for the caller's role on this escrow
    pub fn guidance(&self, escrow: &Escrow) -> &'static str {
        match escrow.role_of(self.caller) {
            Some(role) => next_action(escrow.state, escrow.is_expired(unix_now()), role),
            None => "No action required.",
        }
    }

    /// create a new escrow; on success the coordinator polls until the
    /// fresh record is readable
    pub async fn create(&self, params: CreateParams) -> Result<TxOutcome> {
        if params.seller == params.buyer {
            return Err(EscrowClientError::InvalidInput(
                "seller and buyer must be different addresses".into(),
            ));
        }
        if self.caller != params.seller && self.caller != params.buyer {
            return Err(EscrowClientError::InvalidInput(
                "the caller must be one of the trading parties".into(),
            ));
        }
        if params.duration_hours == 0 {
            return Err(EscrowClientError::InvalidInput(
                "escrow duration must be at least one hour".into(),
            ));
        }

        let price = parse_price(&params.price, self.config.currency_decimals)?;
        let request = CreateRequest {
            seller: params.seller,
            buyer: params.buyer,
            nft_contract: params.nft_contract,
            token_id: params.token_id,
            price,
            duration_secs: hours_to_seconds(params.duration_hours),
            conversation: binding::conversation_key(&params.conversation_id),
            metadata_ref: params.metadata_ref,
        };

        info!(
            seller = %request.seller,
            buyer = %request.buyer,
            token = request.token_id,
            "creating escrow"
        );
        let tx = self.gateway.create_escrow(request).await?;
        let receipt = self.gateway.wait_receipt(&tx).await?;
        if !receipt.success {
            return Err(EscrowClientError::Revert { reason: None });
        }

        let Some(id) = receipt.created_escrow() else {
            warn!(tx = %tx, "creation receipt carried no EscrowCreated event");
            return Ok(TxOutcome::Submitted {
                tx,
                warning: CONVERGENCE_WARNING,
            });
        };
        info!(escrow = id.0, tx = %tx, "escrow created");
        self.converge(id, tx, &[EscrowState::Created]).await
    }

    /// buyer deposits the full price into the escrow
    pub async fn fund(&self, id: EscrowId) -> Result<TxOutcome> {
        let escrow = self.require_escrow(id).await?;
        check_permitted(&escrow, EscrowAction::Fund, self.caller, unix_now())?;
        let _guard = self.begin(id)?;

        info!(escrow = id.0, value = escrow.price, "depositing payment");
        let tx = self.gateway.deposit_payment(id, escrow.price).await?;
        self.confirm_and_converge(id, tx, &[EscrowState::Funded, EscrowState::Active])
            .await
    }

    /// seller deposits the NFT: approve the escrow contract for the
    /// token, wait for that approval, then deposit
    ///
    /// a failed approval aborts the flow; the deposit call is never
    /// attempted on top of a rejected approval
    pub async fn deposit_nft(&self, id: EscrowId) -> Result<TxOutcome> {
        let escrow = self.require_escrow(id).await?;
        check_permitted(&escrow, EscrowAction::DepositNft, self.caller, unix_now())?;
        let _guard = self.begin(id)?;

        info!(
            escrow = id.0,
            nft = %escrow.nft_contract,
            token = escrow.token_id,
            "approving escrow contract for token"
        );
        let approve_tx = self
            .gateway
            .approve_nft(escrow.nft_contract, escrow.token_id)
            .await?;
        let approval = self.gateway.wait_receipt(&approve_tx).await?;
        if !approval.success {
            error!(escrow = id.0, tx = %approve_tx, "nft approval reverted, aborting deposit");
            return Err(EscrowClientError::Revert {
                reason: Some("NFT approval reverted".into()),
            });
        }

        info!(escrow = id.0, "depositing nft");
        let tx = self.gateway.deposit_nft(id).await?;
        self.confirm_and_converge(id, tx, &[EscrowState::NftDeposited, EscrowState::Active])
            .await
    }

    /// settle an active trade
    pub async fn complete(&self, id: EscrowId) -> Result<TxOutcome> {
        let escrow = self.require_escrow(id).await?;
        check_permitted(&escrow, EscrowAction::Complete, self.caller, unix_now())?;
        let _guard = self.begin(id)?;

        info!(escrow = id.0, "completing escrow");
        let tx = self.gateway.complete_escrow(id).await?;
        self.confirm_and_converge(id, tx, &[EscrowState::Completed])
            .await
    }

    /// cancel a non-disputed, non-terminal escrow
    pub async fn cancel(&self, id: EscrowId, reason: &str) -> Result<TxOutcome> {
        let escrow = self.require_escrow(id).await?;
        check_permitted(&escrow, EscrowAction::Cancel, self.caller, unix_now())?;
        let _guard = self.begin(id)?;

        info!(escrow = id.0, reason, "cancelling escrow");
        let tx = self.gateway.cancel_escrow(id, reason).await?;
        self.confirm_and_converge(id, tx, &[EscrowState::Cancelled])
            .await
    }

    /// escalate into a dispute, paying the contract's fixed fee
    pub async fn dispute(&self, id: EscrowId, reason: &str) -> Result<TxOutcome> {
        let escrow = self.require_escrow(id).await?;
        check_permitted(&escrow, EscrowAction::Dispute, self.caller, unix_now())?;
        let fee = self.gateway.dispute_fee().await?;
        let _guard = self.begin(id)?;

        info!(escrow = id.0, fee, reason, "raising dispute");
        let tx = self.gateway.raise_dispute(id, reason, fee).await?;
        self.confirm_and_converge(id, tx, &[EscrowState::Disputed])
            .await
    }

    /// recover deposits from an escrow whose deadline (or whose
    /// dispute's deadline) has passed
    pub async fn cancel_expired(&self, id: EscrowId) -> Result<TxOutcome> {
        let escrow = self.require_escrow(id).await?;
        check_permitted(&escrow, EscrowAction::CancelExpired, self.caller, unix_now())?;
        let _guard = self.begin(id)?;

        let tx = if escrow.state == EscrowState::Disputed {
            info!(escrow = id.0, "resolving expired dispute");
            self.gateway.resolve_expired_dispute(id).await?
        } else {
            info!(escrow = id.0, "cancelling expired escrow");
            self.gateway.cancel_expired_escrow(id).await?
        };
        self.confirm_and_converge(id, tx, &[EscrowState::Cancelled])
            .await
    }

    /// poll the record until it goes terminal, reporting each state
    /// change
    ///
    /// reads are idempotent and safe to interleave with an in-flight
    /// mutation; the latest read wins since the contract is
    /// authoritative. a missing record is polled through (creation
    /// indexing may lag), so callers should bound this externally when
    /// the id is unverified.
    pub async fn watch<F>(&self, id: EscrowId, mut on_change: F) -> Result<Escrow>
    where
        F: FnMut(&Escrow),
    {
        let mut last_state = None;
        loop {
            if let Some(escrow) = self.gateway.get_escrow(id).await? {
                if last_state != Some(escrow.state) {
                    last_state = Some(escrow.state);
                    on_change(&escrow);
                }
                if escrow.state.is_terminal() {
                    return Ok(escrow);
                }
            }
            sleep(Duration::from_millis(self.config.refresh_interval_ms)).await;
        }
    }

    async fn require_escrow(&self, id: EscrowId) -> Result<Escrow> {
        self.gateway
            .get_escrow(id)
            .await?
            .ok_or(EscrowClientError::NotFound(id))
    }

    fn begin(&self, id: EscrowId) -> Result<FlightGuard<'_>> {
        let mut set = lock_set(&self.in_flight);
        if !set.insert(id) {
            return Err(EscrowClientError::InFlight(id));
        }
        Ok(FlightGuard {
            set: &self.in_flight,
            id,
        })
    }

    /// wait for the receipt, then poll the read path for the expected
    /// post-state
    async fn confirm_and_converge(
        &self,
        id: EscrowId,
        tx: TxHandle,
        expected: &[EscrowState],
    ) -> Result<TxOutcome> {
        let receipt = self.gateway.wait_receipt(&tx).await?;
        if !receipt.success {
            return Err(EscrowClientError::Revert { reason: None });
        }
        self.converge(id, tx, expected).await
    }

    /// bounded convergence poll; exhaustion is a soft outcome, not an
    /// error, since the read path may simply be behind the chain
    async fn converge(
        &self,
        id: EscrowId,
        tx: TxHandle,
        expected: &[EscrowState],
    ) -> Result<TxOutcome> {
        for attempt in 1..=self.config.converge_attempts {
            if let Some(escrow) = self.gateway.get_escrow(id).await? {
                if expected.contains(&escrow.state) {
                    debug!(escrow = id.0, state = %escrow.state, attempt, "state converged");
                    return Ok(TxOutcome::Confirmed(escrow));
                }
            }
            if attempt < self.config.converge_attempts {
                sleep(Duration::from_millis(self.config.converge_interval_ms)).await;
            }
        }
        warn!(
            escrow = id.0,
            tx = %tx,
            attempts = self.config.converge_attempts,
            "expected state not observed within the polling budget"
        );
        Ok(TxOutcome::Submitted {
            tx,
            warning: CONVERGENCE_WARNING,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConversationKey;

    const SELLER: Address = Address([1; 20]);
    const BUYER: Address = Address([2; 20]);
    const STRANGER: Address = Address([9; 20]);
    const NOW: u64 = 1_000_000;

    fn make_escrow(state: EscrowState, expired: bool) -> Escrow {
        let (deadline, dispute_deadline) = if expired {
            (NOW - 100, NOW - 50)
        } else {
            (NOW + 1_000, NOW + 2_000)
        };
        Escrow {
            id: EscrowId(1),
            seller: SELLER,
            buyer: BUYER,
            nft_contract: Address([3; 20]),
            token_id: 42,
            price: 1_000,
            deadline,
            dispute_deadline,
            created_at: NOW - 500,
            state,
            seller_agreed: false,
            buyer_agreed: false,
            conversation: ConversationKey([0; 32]),
            metadata_ref: None,
        }
    }

    fn caller_for(role: Role) -> Address {
        match role {
            Role::Seller => SELLER,
            Role::Buyer => BUYER,
        }
    }

    /// the lawful graph, written out independently of the implementation
    fn lawful(state: EscrowState, role: Role, expired: bool, action: EscrowAction) -> bool {
        use EscrowAction::*;
        use EscrowState::*;
        match action {
            Fund => role == Role::Buyer && matches!(state, Created | NftDeposited) && !expired,
            DepositNft => role == Role::Seller && matches!(state, Created | Funded) && !expired,
            Complete => state == Active,
            Cancel => !matches!(state, Completed | Cancelled | Disputed),
            Dispute => matches!(state, Funded | NftDeposited | Active) && !expired,
            CancelExpired => expired && !matches!(state, Completed | Cancelled),
        }
    }

    #[test]
    fn test_permission_full_product() {
        // 7 states x 2 roles x 2 expiry flags x 6 actions
        for state in EscrowState::ALL {
            for role in [Role::Seller, Role::Buyer] {
                for expired in [false, true] {
                    for action in EscrowAction::ALL {
                        let escrow = make_escrow(state, expired);
                        let got = is_permitted(&escrow, action, caller_for(role), NOW);
                        let want = lawful(state, role, expired, action);
                        assert_eq!(
                            got, want,
                            "state={state:?} role={role:?} expired={expired} action={action:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_stranger_never_permitted() {
        for state in EscrowState::ALL {
            for action in EscrowAction::ALL {
                let escrow = make_escrow(state, true);
                let err = check_permitted(&escrow, action, STRANGER, NOW).unwrap_err();
                assert!(matches!(err, EscrowClientError::NotParticipant(_)));
            }
        }
    }

    #[test]
    fn test_rejection_reasons_are_precise() {
        // seller trying the buyer's move
        let escrow = make_escrow(EscrowState::Created, false);
        let err = check_permitted(&escrow, EscrowAction::Fund, SELLER, NOW).unwrap_err();
        assert!(matches!(
            err,
            EscrowClientError::WrongRole {
                required: Role::Buyer,
                ..
            }
        ));

        // terminal record
        let escrow = make_escrow(EscrowState::Completed, false);
        let err = check_permitted(&escrow, EscrowAction::Cancel, BUYER, NOW).unwrap_err();
        assert!(matches!(err, EscrowClientError::Terminal(_)));

        // disputed records cannot be plainly cancelled
        let escrow = make_escrow(EscrowState::Disputed, false);
        let err = check_permitted(&escrow, EscrowAction::Cancel, BUYER, NOW).unwrap_err();
        assert!(matches!(err, EscrowClientError::NotInState { .. }));

        // expiry-only action before the deadline
        let escrow = make_escrow(EscrowState::Active, false);
        let err = check_permitted(&escrow, EscrowAction::CancelExpired, BUYER, NOW).unwrap_err();
        assert!(matches!(err, EscrowClientError::NotExpired(_)));
    }

    #[test]
    fn test_fund_rejected_after_deadline() {
        // same contract state, only the clock moved
        let escrow = make_escrow(EscrowState::Created, false);
        assert!(check_permitted(&escrow, EscrowAction::Fund, BUYER, NOW).is_ok());
        let err =
            check_permitted(&escrow, EscrowAction::Fund, BUYER, escrow.deadline + 1).unwrap_err();
        assert!(matches!(err, EscrowClientError::Expired(_)));
    }

    #[test]
    fn test_dispute_needs_a_deposit_first() {
        let escrow = make_escrow(EscrowState::Created, false);
        let err = check_permitted(&escrow, EscrowAction::Dispute, BUYER, NOW).unwrap_err();
        assert!(matches!(err, EscrowClientError::NotInState { .. }));
    }

    #[test]
    fn test_expired_dispute_can_be_cancelled() {
        let mut escrow = make_escrow(EscrowState::Disputed, false);
        // main deadline passed but the dispute window is still open
        escrow.deadline = NOW - 10;
        let err = check_permitted(&escrow, EscrowAction::CancelExpired, BUYER, NOW).unwrap_err();
        assert!(matches!(err, EscrowClientError::NotExpired(_)));

        escrow.dispute_deadline = NOW - 1;
        assert!(check_permitted(&escrow, EscrowAction::CancelExpired, BUYER, NOW).is_ok());
    }

    #[test]
    fn test_next_action_total_and_deterministic() {
        for state in EscrowState::ALL {
            for expired in [false, true] {
                for role in [Role::Seller, Role::Buyer] {
                    let first = next_action(state, expired, role);
                    assert!(
                        !first.is_empty(),
                        "empty guidance for state={state:?} expired={expired} role={role:?}"
                    );
                    assert_eq!(first, next_action(state, expired, role));
                }
            }
        }
    }

    #[test]
    fn test_next_action_guides_each_party() {
        use EscrowState::*;

        // in Created the buyer funds while the seller can already deposit
        assert!(next_action(Created, false, Role::Buyer).contains("payment"));
        assert!(next_action(Created, false, Role::Seller).contains("NFT"));

        // waiting sides are told they are waiting
        assert!(next_action(Funded, false, Role::Buyer).contains("Waiting"));
        assert!(next_action(NftDeposited, false, Role::Seller).contains("Waiting"));

        // terminal states win over everything
        assert_eq!(
            next_action(Completed, true, Role::Buyer),
            next_action(Completed, false, Role::Buyer)
        );
    }
}
