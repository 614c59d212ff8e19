use sea_orm::entity::prelude::*;

use crate::sea_orm_active_enums::{MessageStatus, MessageType};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize, serde::Deserialize)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    /// Deterministic from (source_chain, source_tx_hash, source_log_index).
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub r#type: MessageType,
    pub source_chain: String,
    pub destination_chain: String,
    pub source_tx_hash: String,
    pub source_block: i64,
    pub source_log_index: i32,
    pub sender: String,
    pub recipient: String,
    pub token_contract: String,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub amount: Decimal,
    pub nonce: i64,
    pub timestamp: DateTimeUtc,
    pub status: MessageStatus,
    #[sea_orm(default_value = 0)]
    pub attempts: i32,
    pub last_error: Option<String>,
    pub batch_id: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "crate::batches::Entity",
        from = "Column::BatchId",
        to = "crate::batches::Column::BatchId",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Batch,
}

impl Related<crate::batches::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Batch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
