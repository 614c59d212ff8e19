use sea_orm::entity::prelude::*;

use crate::sea_orm_active_enums::BatchState;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize, serde::Deserialize)]
#[sea_orm(table_name = "batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub batch_id: String,
    pub source: String,
    pub destination: String,
    pub state: BatchState,
    pub created_at: DateTimeUtc,
    pub dispatched_at: Option<DateTimeUtc>,
    pub message_count: i32,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub total_value: Decimal,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "crate::messages::Entity")]
    Message,
}

impl Related<crate::messages::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Message.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
