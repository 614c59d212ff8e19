use sea_orm::entity::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize, serde::Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum MessageType {
    #[sea_orm(string_value = "token_lock")]
    TokenLock,
    #[sea_orm(string_value = "token_unlock")]
    TokenUnlock,
    #[sea_orm(string_value = "nft_lock")]
    NftLock,
    #[sea_orm(string_value = "nft_unlock")]
    NftUnlock,
}

/// Wire-exact status values; the string representations here are part of the
/// cross-component contract and must not change independently of the queue payload.
#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize, serde::Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum MessageStatus {
    #[sea_orm(string_value = "detected")]
    Detected,
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "batched")]
    Batched,
    #[sea_orm(string_value = "submitted")]
    Submitted,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "expired")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize, serde::Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum BatchState {
    #[sea_orm(string_value = "accumulating")]
    Accumulating,
    #[sea_orm(string_value = "ready")]
    Ready,
    #[sea_orm(string_value = "dispatched")]
    Dispatched,
    #[sea_orm(string_value = "acknowledged")]
    Acknowledged,
    #[sea_orm(string_value = "failed")]
    Failed,
}
