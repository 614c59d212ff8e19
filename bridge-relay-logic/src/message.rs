use std::fmt;

use alloy::primitives::keccak256;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bridge_relay_entity::sea_orm_active_enums::{MessageStatus as EntityStatus, MessageType as EntityType};

/// One of the four bridge intents this pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    TokenLock,
    TokenUnlock,
    NftLock,
    NftUnlock,
}

impl From<MessageKind> for EntityType {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::TokenLock => EntityType::TokenLock,
            MessageKind::TokenUnlock => EntityType::TokenUnlock,
            MessageKind::NftLock => EntityType::NftLock,
            MessageKind::NftUnlock => EntityType::NftUnlock,
        }
    }
}

impl From<EntityType> for MessageKind {
    fn from(t: EntityType) -> Self {
        match t {
            EntityType::TokenLock => MessageKind::TokenLock,
            EntityType::TokenUnlock => MessageKind::TokenUnlock,
            EntityType::NftLock => MessageKind::NftLock,
            EntityType::NftUnlock => MessageKind::NftUnlock,
        }
    }
}

/// Wire-exact status values (ties to the queue payload and the HTTP/API surface
/// described as out of scope, but the string values themselves are part of the
/// cross-component contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Detected,
    Queued,
    Batched,
    Submitted,
    Confirmed,
    Failed,
    Expired,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Detected => "detected",
            Status::Queued => "queued",
            Status::Batched => "batched",
            Status::Submitted => "submitted",
            Status::Confirmed => "confirmed",
            Status::Failed => "failed",
            Status::Expired => "expired",
        };
        f.write_str(s)
    }
}

impl From<Status> for EntityStatus {
    fn from(s: Status) -> Self {
        match s {
            Status::Detected => EntityStatus::Detected,
            Status::Queued => EntityStatus::Queued,
            Status::Batched => EntityStatus::Batched,
            Status::Submitted => EntityStatus::Submitted,
            Status::Confirmed => EntityStatus::Confirmed,
            Status::Failed => EntityStatus::Failed,
            Status::Expired => EntityStatus::Expired,
        }
    }
}

impl From<EntityStatus> for Status {
    fn from(s: EntityStatus) -> Self {
        match s {
            EntityStatus::Detected => Status::Detected,
            EntityStatus::Queued => Status::Queued,
            EntityStatus::Batched => Status::Batched,
            EntityStatus::Submitted => Status::Submitted,
            EntityStatus::Confirmed => Status::Confirmed,
            EntityStatus::Failed => Status::Failed,
            EntityStatus::Expired => Status::Expired,
        }
    }
}

/// Returns whether `from -> to` is a legal edge in the status state graph.
///
/// Detected -> Queued -> Batched -> Submitted -> {Confirmed, Failed}
/// Any non-terminal state may also move to Expired (reorg/grace-period timeout).
pub fn is_legal_transition(from: Status, to: Status) -> bool {
    use Status::*;
    match (from, to) {
        (Detected, Queued) => true,
        (Queued, Batched) => true,
        (Batched, Submitted) => true,
        (Submitted, Confirmed) => true,
        (Submitted, Failed) => true,
        (Batched, Failed) => true,
        (_, Expired) if from != Confirmed && from != Failed && from != Expired => true,
        _ => false,
    }
}

/// The canonical chain-agnostic bridge intent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossChainMessage {
    pub id: String,
    pub kind: MessageKind,
    pub source_chain: String,
    pub destination_chain: String,
    pub source_tx_hash: String,
    pub source_block: u64,
    pub source_log_index: u32,
    pub sender: String,
    pub recipient: String,
    pub token_contract: String,
    pub amount: Decimal,
    pub nonce: u64,
    pub timestamp: DateTime<Utc>,
    pub status: Status,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub batch_id: Option<String>,
}

impl CrossChainMessage {
    /// Derives the stable, deterministic message id from origin coordinates.
    ///
    /// Hashing (rather than simple concatenation) keeps the id a fixed-width
    /// opaque token regardless of how wide `source_tx_hash` is per chain family.
    pub fn derive_id(source_chain: &str, source_tx_hash: &str, source_log_index: u32) -> String {
        let mut preimage = Vec::with_capacity(source_chain.len() + source_tx_hash.len() + 5);
        preimage.extend_from_slice(source_chain.as_bytes());
        preimage.push(b':');
        preimage.extend_from_slice(source_tx_hash.as_bytes());
        preimage.push(b':');
        preimage.extend_from_slice(&source_log_index.to_be_bytes());
        format!("msg_{}", hex::encode(keccak256(preimage)))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.source_chain == self.destination_chain {
            return Err(format!(
                "source_chain and destination_chain must differ, got {}",
                self.source_chain
            ));
        }
        if self.amount.is_sign_negative() {
            return Err(format!("amount must be non-negative, got {}", self.amount));
        }
        let expected_id = Self::derive_id(&self.source_chain, &self.source_tx_hash, self.source_log_index);
        if self.id != expected_id {
            return Err(format!("id {} does not match derived id {expected_id}", self.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample(status: Status) -> CrossChainMessage {
        let id = CrossChainMessage::derive_id("ethereum", "0xabc", 3);
        CrossChainMessage {
            id,
            kind: MessageKind::TokenLock,
            source_chain: "ethereum".into(),
            destination_chain: "avalanche".into(),
            source_tx_hash: "0xabc".into(),
            source_block: 100,
            source_log_index: 3,
            sender: "0x1".into(),
            recipient: "0x2".into(),
            token_contract: "0xtoken".into(),
            amount: Decimal::new(1000, 0),
            nonce: 1,
            timestamp: Utc::now(),
            status,
            attempts: 0,
            last_error: None,
            batch_id: None,
        }
    }

    #[test]
    fn derive_id_is_deterministic() {
        let a = CrossChainMessage::derive_id("ethereum", "0xabc", 3);
        let b = CrossChainMessage::derive_id("ethereum", "0xabc", 3);
        assert_eq!(a, b);
        let c = CrossChainMessage::derive_id("ethereum", "0xabc", 4);
        assert_ne!(a, c);
    }

    #[test]
    fn rejects_same_source_and_destination() {
        let mut msg = sample(Status::Detected);
        msg.destination_chain = msg.source_chain.clone();
        assert!(msg.validate().is_err());
    }

    #[rstest]
    #[case::detect_to_queue(Status::Detected, Status::Queued, true)]
    #[case::queue_to_batch(Status::Queued, Status::Batched, true)]
    #[case::batch_to_submit(Status::Batched, Status::Submitted, true)]
    #[case::submit_to_confirm(Status::Submitted, Status::Confirmed, true)]
    #[case::submit_to_fail(Status::Submitted, Status::Failed, true)]
    #[case::skip_queue(Status::Detected, Status::Batched, false)]
    #[case::backwards(Status::Batched, Status::Queued, false)]
    #[case::confirmed_is_terminal(Status::Confirmed, Status::Expired, false)]
    #[case::failed_is_terminal(Status::Failed, Status::Queued, false)]
    #[case::expire_from_queued(Status::Queued, Status::Expired, true)]
    fn transition_table(#[case] from: Status, #[case] to: Status, #[case] expected: bool) {
        assert_eq!(is_legal_transition(from, to), expected);
    }
}
