//! core types for escrow trades
//!
//! application-level view of the on-chain escrow record. amounts are
//! carried in the smallest currency unit (u128); the decimal string
//! conversions live here so every surface renders prices the same way.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{EscrowClientError, Result};

/// 20-byte account address, rendered as `0x…` hex
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    /// parse from hex, with or without the `0x` prefix
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)
            .map_err(|e| EscrowClientError::InvalidInput(format!("bad address {s:?}: {e}")))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| EscrowClientError::InvalidInput(format!("address {s:?} is not 20 bytes")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = EscrowClientError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(de::Error::custom)
    }
}

/// escrow identifier assigned by the contract at creation
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EscrowId(pub u64);

impl fmt::Display for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// fixed-width 32-byte key the contract uses to index escrows by conversation
///
/// derived from the messaging conversation id, see [`crate::binding`]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey(pub [u8; 32]);

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConversationKey({self})")
    }
}

impl Serialize for ConversationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ConversationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let raw = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(raw).map_err(de::Error::custom)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| de::Error::custom("conversation key is not 32 bytes"))?;
        Ok(Self(bytes))
    }
}

/// lifecycle state of an escrow record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowState {
    /// created, neither deposit received
    Created,
    /// buyer payment locked, NFT still pending
    Funded,
    /// NFT locked, payment still pending
    NftDeposited,
    /// both deposits in, ready to complete
    Active,
    /// settled, terminal
    Completed,
    /// cancelled or refunded, terminal
    Cancelled,
    /// dispute raised, awaiting resolution or expiry
    Disputed,
}

impl EscrowState {
    /// decode the contract's numeric state code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Created),
            1 => Some(Self::Funded),
            2 => Some(Self::NftDeposited),
            3 => Some(Self::Active),
            4 => Some(Self::Completed),
            5 => Some(Self::Cancelled),
            6 => Some(Self::Disputed),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Funded => 1,
            Self::NftDeposited => 2,
            Self::Active => 3,
            Self::Completed => 4,
            Self::Cancelled => 5,
            Self::Disputed => 6,
        }
    }

    /// terminal records accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Funded => "funded",
            Self::NftDeposited => "nft deposited",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
        }
    }

    /// all states, for table-driven tests and displays
    pub const ALL: [EscrowState; 7] = [
        Self::Created,
        Self::Funded,
        Self::NftDeposited,
        Self::Active,
        Self::Completed,
        Self::Cancelled,
        Self::Disputed,
    ];
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// which side of the trade an address is on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Seller,
    Buyer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Seller => f.write_str("seller"),
            Role::Buyer => f.write_str("buyer"),
        }
    }
}

/// the six user-drivable transitions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscrowAction {
    Fund,
    DepositNft,
    Complete,
    Cancel,
    Dispute,
    CancelExpired,
}

impl EscrowAction {
    pub const ALL: [EscrowAction; 6] = [
        Self::Fund,
        Self::DepositNft,
        Self::Complete,
        Self::Cancel,
        Self::Dispute,
        Self::CancelExpired,
    ];
}

impl fmt::Display for EscrowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fund => "fund",
            Self::DepositNft => "deposit nft",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::Dispute => "dispute",
            Self::CancelExpired => "cancel expired",
        };
        f.write_str(s)
    }
}

/// one peer-to-peer trade agreement, as read from the contract
///
/// the canonical record lives on-chain; this is a snapshot and must be
/// re-read after every mutation (the contract is always authoritative).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub seller: Address,
    pub buyer: Address,
    pub nft_contract: Address,
    pub token_id: u64,
    /// price in the smallest currency unit
    pub price: u128,
    /// unix seconds after which the escrow is expired if not completed
    pub deadline: u64,
    /// unix seconds bounding how long a raised dispute stays open
    pub dispute_deadline: u64,
    pub created_at: u64,
    pub state: EscrowState,
    pub seller_agreed: bool,
    pub buyer_agreed: bool,
    pub conversation: ConversationKey,
    /// off-chain metadata pointer, opaque to this client
    pub metadata_ref: Option<String>,
}

impl Escrow {
    /// which role the address holds, if any
    pub fn role_of(&self, address: Address) -> Option<Role> {
        if address == self.seller {
            Some(Role::Seller)
        } else if address == self.buyer {
            Some(Role::Buyer)
        } else {
            None
        }
    }

    pub fn is_participant(&self, address: Address) -> bool {
        self.role_of(address).is_some()
    }

    /// the other party of the trade
    pub fn counterparty(&self, address: Address) -> Option<Address> {
        match self.role_of(address)? {
            Role::Seller => Some(self.buyer),
            Role::Buyer => Some(self.seller),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.deadline
    }

    pub fn is_dispute_expired(&self, now: u64) -> bool {
        now > self.dispute_deadline
    }
}

/// current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// convert a human decimal amount (e.g. `"1.5"`) to the integer base unit
///
/// rejects empty input, malformed decimals, more fractional digits than
/// `decimals`, and values that overflow u128
pub fn parse_price(s: &str, decimals: u32) -> Result<u128> {
    let s = s.trim();
    let bad = |why: &str| EscrowClientError::InvalidInput(format!("bad amount {s:?}: {why}"));

    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(bad("empty"));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad("not a decimal number"));
    }
    if frac.len() as u32 > decimals {
        return Err(bad("too many fractional digits"));
    }

    let scale = 10u128
        .checked_pow(decimals)
        .ok_or_else(|| bad("decimals out of range"))?;
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| bad("whole part overflows"))?
    };
    let frac_scaled = if frac.is_empty() {
        0
    } else {
        let frac_value: u128 = frac.parse().map_err(|_| bad("fraction overflows"))?;
        frac_value * 10u128.pow(decimals - frac.len() as u32)
    };

    whole
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_scaled))
        .ok_or_else(|| bad("amount overflows"))
}

/// render a base-unit amount as a decimal string, trailing zeros trimmed
pub fn format_price(value: u128, decimals: u32) -> String {
    let divisor = 10u128.pow(decimals);
    let whole = value / divisor;
    let frac = value % divisor;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:0>width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// duration conversion used by escrow creation (contract wants seconds)
pub fn hours_to_seconds(hours: u64) -> u64 {
    hours * 3600
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_address_roundtrip() {
        let addr = Address([0xab; 20]);
        let parsed = Address::parse(&addr.to_string()).unwrap();
        assert_eq!(addr, parsed);

        // without the 0x prefix
        let parsed = Address::parse(&hex::encode([0xab; 20])).unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn test_address_rejects_wrong_length() {
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("zz").is_err());
    }

    #[test]
    fn test_state_codes_roundtrip() {
        for state in EscrowState::ALL {
            assert_eq!(EscrowState::from_code(state.code()), Some(state));
        }
        assert_eq!(EscrowState::from_code(7), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(EscrowState::Completed.is_terminal());
        assert!(EscrowState::Cancelled.is_terminal());
        assert!(!EscrowState::Disputed.is_terminal());
        assert!(!EscrowState::Created.is_terminal());
    }

    #[test]
    fn test_parse_price_basic() {
        assert_eq!(parse_price("1.5", 18).unwrap(), 1_500_000_000_000_000_000);
        assert_eq!(parse_price("0.5", 18).unwrap(), 500_000_000_000_000_000);
        assert_eq!(parse_price("2", 18).unwrap(), 2_000_000_000_000_000_000);
        assert_eq!(parse_price("0", 18).unwrap(), 0);
        assert_eq!(parse_price(".5", 18).unwrap(), 500_000_000_000_000_000);
    }

    #[test]
    fn test_parse_price_rejects_garbage() {
        assert!(parse_price("", 18).is_err());
        assert!(parse_price(".", 18).is_err());
        assert!(parse_price("1.2.3", 18).is_err());
        assert!(parse_price("1,5", 18).is_err());
        assert!(parse_price("-1", 18).is_err());
        assert!(parse_price("abc", 18).is_err());
        // 19 fractional digits against 18 decimals
        assert!(parse_price("0.1234567890123456789", 18).is_err());
    }

    #[test]
    fn test_format_price_trims_zeros() {
        assert_eq!(format_price(1_500_000_000_000_000_000, 18), "1.5");
        assert_eq!(format_price(2_000_000_000_000_000_000, 18), "2");
        assert_eq!(format_price(0, 18), "0");
        assert_eq!(format_price(1, 18), "0.000000000000000001");
    }

    #[test]
    fn test_price_scenario_one_point_five() {
        // the contract stores 1.5 units as the base-unit integer and it
        // renders back identically
        let stored = parse_price("1.5", 18).unwrap();
        assert_eq!(stored, 1_500_000_000_000_000_000);
        assert_eq!(format_price(stored, 18), "1.5");
    }

    #[test]
    fn test_expiry_boundaries() {
        let escrow = sample_escrow();
        assert!(!escrow.is_expired(escrow.deadline));
        assert!(escrow.is_expired(escrow.deadline + 1));
        assert!(!escrow.is_dispute_expired(escrow.dispute_deadline));
        assert!(escrow.is_dispute_expired(escrow.dispute_deadline + 1));
    }

    #[test]
    fn test_roles() {
        let escrow = sample_escrow();
        assert_eq!(escrow.role_of(escrow.seller), Some(Role::Seller));
        assert_eq!(escrow.role_of(escrow.buyer), Some(Role::Buyer));
        assert_eq!(escrow.role_of(Address([9; 20])), None);
        assert_eq!(escrow.counterparty(escrow.seller), Some(escrow.buyer));
        assert_eq!(escrow.counterparty(Address([9; 20])), None);
    }

    fn sample_escrow() -> Escrow {
        Escrow {
            id: EscrowId(1),
            seller: Address([1; 20]),
            buyer: Address([2; 20]),
            nft_contract: Address([3; 20]),
            token_id: 7,
            price: 1_000_000_000_000_000_000,
            deadline: 1_000_000,
            dispute_deadline: 2_000_000,
            created_at: 900_000,
            state: EscrowState::Created,
            seller_agreed: false,
            buyer_agreed: false,
            conversation: ConversationKey([0; 32]),
            metadata_ref: None,
        }
    }

    proptest! {
        #[test]
        fn prop_price_roundtrip(whole in 0u128..1_000_000, frac in 0u32..1000) {
            // any "w.fff" formats and parses back to the same base units
            let s = format!("{whole}.{frac:03}");
            let parsed = parse_price(&s, 18).unwrap();
            let rendered = format_price(parsed, 18);
            let reparsed = parse_price(&rendered, 18).unwrap();
            prop_assert_eq!(parsed, reparsed);
        }
    }
}
