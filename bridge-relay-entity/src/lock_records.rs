use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize, serde::Deserialize)]
#[sea_orm(table_name = "lock_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub chain: String,
    pub contract: String,
    pub sender: String,
    pub token: String,
    #[sea_orm(column_type = "Decimal(Some((78, 0)))")]
    pub amount: Decimal,
    pub block: i64,
    pub timestamp: DateTimeUtc,
    /// Set once a matching CrossChainMessage exists; used by `list_unmatched_locks`.
    pub matched_message_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
