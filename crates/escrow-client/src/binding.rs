//! conversation ↔ escrow binding
//!
//! the contract indexes escrows by a fixed 32-byte key derived from the
//! messaging conversation id. one conversation can carry any number of
//! concurrent trades; displays refer to them by a 1-based number in
//! creation order.

use crate::error::Result;
use crate::gateway::EscrowGateway;
use crate::types::{ConversationKey, EscrowId};

/// encode a conversation id into the contract's fixed-width key
///
/// UTF-8 bytes, left-justified into a zero-padded 32-byte buffer,
/// truncated past 32 bytes. deterministic but lossy: two ids sharing
/// the same 32-byte prefix collide. this mirrors the key convention of
/// the deployed contract and is a known limitation; hashing instead
/// would break compatibility with records already on chain.
pub fn conversation_key(conversation_id: &str) -> ConversationKey {
    let mut key = [0u8; 32];
    let bytes = conversation_id.as_bytes();
    let n = bytes.len().min(32);
    key[..n].copy_from_slice(&bytes[..n]);
    ConversationKey(key)
}

/// all escrow ids bound to a conversation, ascending by id
///
/// the contract appends in creation order; the sort is a client-side
/// guarantee so numbering stays stable regardless of node behavior
pub async fn conversation_escrows(
    gateway: &dyn EscrowGateway,
    conversation_id: &str,
) -> Result<Vec<EscrowId>> {
    let mut ids = gateway
        .get_conversation_escrows(conversation_key(conversation_id))
        .await?;
    ids.sort_unstable();
    Ok(ids)
}

/// 1-based position of an escrow within its conversation
///
/// display convenience only, recomputed per query. positions of earlier
/// escrows never shift when a later one is appended.
pub async fn escrow_number(
    gateway: &dyn EscrowGateway,
    conversation_id: &str,
    id: EscrowId,
) -> Result<Option<usize>> {
    let ids = conversation_escrows(gateway, conversation_id).await?;
    Ok(ids.iter().position(|&candidate| candidate == id).map(|p| p + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_short_id_zero_padded() {
        let key = conversation_key("chat-1");
        assert_eq!(&key.0[..6], b"chat-1");
        assert!(key.0[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_exactly_32_bytes() {
        let id = "a".repeat(32);
        let key = conversation_key(&id);
        assert_eq!(&key.0[..], id.as_bytes());
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(conversation_key("topic/v2/abc"), conversation_key("topic/v2/abc"));
        assert_ne!(conversation_key("topic/v2/abc"), conversation_key("topic/v2/abd"));
    }

    #[test]
    fn test_long_ids_collide_on_shared_prefix() {
        // documented limitation: identifiers longer than 32 bytes are
        // truncated, so a shared prefix collides
        let prefix = "x".repeat(32);
        let a = format!("{prefix}-conversation-a");
        let b = format!("{prefix}-conversation-b");
        assert_ne!(a, b);
        assert_eq!(conversation_key(&a), conversation_key(&b));
    }

    #[test]
    fn test_multibyte_truncation_is_bytewise() {
        // 16 two-byte chars fill the buffer exactly; one more is cut
        let id = "é".repeat(17);
        let key = conversation_key(&id);
        assert_eq!(&key.0[..], &id.as_bytes()[..32]);
    }

    proptest! {
        #[test]
        fn prop_key_deterministic(id in "[ -~]{0,64}") {
            prop_assert_eq!(conversation_key(&id), conversation_key(&id));
        }

        #[test]
        fn prop_short_ids_injective(a in "[a-z]{1,32}", b in "[a-z]{1,32}") {
            // at or under 32 bytes the encoding is collision-free
            if a != b {
                prop_assert_ne!(conversation_key(&a), conversation_key(&b));
            }
        }
    }
}
